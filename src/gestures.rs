//! Joint-angle gesture classification for a single pose.

use serde::{Deserialize, Serialize};

use crate::config::GestureThresholds;
use crate::pose::{BodyPart, Keypoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GestureLabel {
    ElevateRight,
    ElevateLeft,
    TStopRight,
    TStopLeft,
    WaveRight,
    WaveLeft,
    Rotation,
    MarchRight,
    MarchLeft,
}

impl GestureLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElevateRight => "ELEVATE_RIGHT",
            Self::ElevateLeft => "ELEVATE_LEFT",
            Self::TStopRight => "T_STOP_RIGHT",
            Self::TStopLeft => "T_STOP_LEFT",
            Self::WaveRight => "WAVE_RIGHT",
            Self::WaveLeft => "WAVE_LEFT",
            Self::Rotation => "ROTATION",
            Self::MarchRight => "MARCH_RIGHT",
            Self::MarchLeft => "MARCH_LEFT",
        }
    }
}

/// Classification result for one track in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Gesture {
    pub label: Option<GestureLabel>,
    pub score: u32,
}

impl Gesture {
    pub const NONE: Gesture = Gesture {
        label: None,
        score: 0,
    };

    fn of(label: GestureLabel, score: u32) -> Self {
        Self {
            label: Some(label),
            score,
        }
    }
}

/// Highest keypoint index any rule reads.
const REQUIRED_POINTS: usize = BodyPart::RightAnkle as usize + 1;

/// Angle at `b` in degrees, folded into [0, 180].
pub fn joint_angle(a: (f32, f32), b: (f32, f32), c: (f32, f32)) -> f32 {
    let radians = (c.1 - b.1).atan2(c.0 - b.0) - (a.1 - b.1).atan2(a.0 - b.0);
    let angle = radians.to_degrees().abs();
    if angle > 180.0 { 360.0 - angle } else { angle }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Right,
    Left,
}

struct Arm {
    shoulder: (f32, f32),
    wrist: (f32, f32),
    elbow_angle: f32,
}

impl Arm {
    fn of(kps: &[Keypoint], side: Side) -> Self {
        let (s, e, w) = match side {
            Side::Right => (
                BodyPart::RightShoulder,
                BodyPart::RightElbow,
                BodyPart::RightWrist,
            ),
            Side::Left => (
                BodyPart::LeftShoulder,
                BodyPart::LeftElbow,
                BodyPart::LeftWrist,
            ),
        };
        let shoulder = kps[s.index()].xy();
        let elbow = kps[e.index()].xy();
        let wrist = kps[w.index()].xy();
        Self {
            shoulder,
            wrist,
            elbow_angle: joint_angle(shoulder, elbow, wrist),
        }
    }

    /// How far the wrist sits above the shoulder (y grows downward).
    fn rise(&self) -> f32 {
        self.shoulder.1 - self.wrist.1
    }
}

fn knee_angle(kps: &[Keypoint], side: Side) -> f32 {
    let (h, k, a) = match side {
        Side::Right => (BodyPart::RightHip, BodyPart::RightKnee, BodyPart::RightAnkle),
        Side::Left => (BodyPart::LeftHip, BodyPart::LeftKnee, BodyPart::LeftAnkle),
    };
    joint_angle(kps[h.index()].xy(), kps[k.index()].xy(), kps[a.index()].xy())
}

#[derive(Debug, Clone)]
pub struct GestureClassifier {
    th: GestureThresholds,
}

impl Default for GestureClassifier {
    fn default() -> Self {
        Self::new(GestureThresholds::default())
    }
}

impl GestureClassifier {
    pub fn new(th: GestureThresholds) -> Self {
        Self { th }
    }

    /// Ordered cascade; the first rule that holds decides the gesture.
    pub fn classify(&self, kps: &[Keypoint]) -> Gesture {
        if kps.len() < REQUIRED_POINTS {
            return Gesture::NONE;
        }
        let th = &self.th;
        let right = Arm::of(kps, Side::Right);
        let left = Arm::of(kps, Side::Left);

        if right.elbow_angle > th.elevate_elbow_deg && right.rise() > th.elevate_rise {
            return Gesture::of(GestureLabel::ElevateRight, th.elevate_score);
        }
        if left.elbow_angle > th.elevate_elbow_deg && left.rise() > th.elevate_rise {
            return Gesture::of(GestureLabel::ElevateLeft, th.elevate_score);
        }

        if right.elbow_angle > th.t_stop_elbow_deg && right.rise().abs() < th.t_stop_band {
            return Gesture::of(GestureLabel::TStopRight, th.t_stop_score);
        }
        if left.elbow_angle > th.t_stop_elbow_deg && left.rise().abs() < th.t_stop_band {
            return Gesture::of(GestureLabel::TStopLeft, th.t_stop_score);
        }

        let waving = |arm: &Arm| {
            arm.elbow_angle > th.wave_elbow_min_deg
                && arm.elbow_angle < th.wave_elbow_max_deg
                && arm.rise() > th.wave_rise
        };
        if waving(&right) {
            return Gesture::of(GestureLabel::WaveRight, th.wave_score);
        }
        if waving(&left) {
            return Gesture::of(GestureLabel::WaveLeft, th.wave_score);
        }

        // shoulders stacked in x: the body is turned sideways to the camera
        let span = (kps[BodyPart::LeftShoulder.index()].x
            - kps[BodyPart::RightShoulder.index()].x)
            .abs();
        if span < th.rotation_shoulder_span {
            return Gesture::of(GestureLabel::Rotation, th.rotation_score);
        }

        if knee_angle(kps, Side::Right) < th.march_knee_deg {
            return Gesture::of(GestureLabel::MarchRight, th.march_score);
        }
        if knee_angle(kps, Side::Left) < th.march_knee_deg {
            return Gesture::of(GestureLabel::MarchLeft, th.march_score);
        }

        Gesture::NONE
    }
}

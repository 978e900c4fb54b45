//! Body keypoint schema, poses and per-frame candidates.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Indices of the 33-point body schema the pose model emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BodyPart {
    Nose = 0,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
}

impl BodyPart {
    /// Keypoints per pose in the full schema.
    pub const COUNT: usize = 33;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Single landmark in normalized image coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default = "full_visibility")]
    pub visibility: f32,
}

fn full_visibility() -> f32 {
    1.0
}

impl Keypoint {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self { x, y, visibility }
    }

    pub fn xy(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility >= threshold
    }
}

impl Default for Keypoint {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            visibility: 0.0,
        }
    }
}

/// One detected body in one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pose {
    keypoints: Vec<Keypoint>,
}

impl Pose {
    /// Checks raw model output against the body schema.
    ///
    /// Short poses are accepted; anything the classifier needs is bound
    /// checked there.
    pub fn from_keypoints(keypoints: Vec<Keypoint>) -> Result<Self, SchemaError> {
        if keypoints.len() > BodyPart::COUNT {
            return Err(SchemaError::TooManyKeypoints {
                got: keypoints.len(),
                max: BodyPart::COUNT,
            });
        }
        for (index, kp) in keypoints.iter().enumerate() {
            if !(kp.x.is_finite() && kp.y.is_finite() && kp.visibility.is_finite()) {
                return Err(SchemaError::NonFinite { index });
            }
        }
        Ok(Self { keypoints })
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Mean position over keypoints strictly above `min_visibility`.
    ///
    /// Falls back to all keypoints when none qualify, and to the frame
    /// center for an empty pose.
    pub fn centroid(&self, min_visibility: f32) -> (f32, f32) {
        let visible: Vec<&Keypoint> = self
            .keypoints
            .iter()
            .filter(|k| k.visibility > min_visibility)
            .collect();
        let pool: Vec<&Keypoint> = if visible.is_empty() {
            self.keypoints.iter().collect()
        } else {
            visible
        };
        if pool.is_empty() {
            return (0.5, 0.5);
        }
        let n = pool.len() as f32;
        let sx: f32 = pool.iter().map(|k| k.x).sum();
        let sy: f32 = pool.iter().map(|k| k.y).sum();
        (sx / n, sy / n)
    }
}

/// A frame's detection before it is linked to any track.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pose: Pose,
    pub centroid: (f32, f32),
}

impl Candidate {
    pub fn new(pose: Pose, min_visibility: f32) -> Self {
        let centroid = pose.centroid(min_visibility);
        Self { pose, centroid }
    }
}

pub(crate) fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

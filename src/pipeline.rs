//! One inference cycle: candidates in, tracks, slots and UI triggers out.

use log::warn;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::Profile;
use crate::debounce::{HoldToConfirm, MenuDebouncer, MenuEvent};
use crate::error::{SchemaError, SourceError};
use crate::gestures::{Gesture, GestureClassifier};
use crate::lobby::{LobbyGate, LobbyPhase};
use crate::pose::{Candidate, Keypoint, Pose};
use crate::score::{ScoreBoard, ScoreState};
use crate::slots::{NoPin, PinFirstTo, PinPolicy, SlotAssigner};
use crate::source::{PoseSource, RawFrame};
use crate::swipe::{SwipeDetector, SwipeDirection};
use crate::tracker::{TrackManager, TrackSnapshot};

/// Debounced trigger delivered to UI consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum UiEvent {
    Menu(MenuEvent),
    Confirm,
    Swipe(SwipeDirection),
}

/// Immutable per-cycle state published to consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameState {
    pub cycle: u64,
    pub timestamp_ms: u64,
    /// Left to right; the position is the person index.
    pub tracks: Vec<TrackSnapshot>,
    /// Slot per person, parallel to `tracks`.
    pub slots: Vec<Option<usize>>,
    pub lobby: LobbyPhase,
    /// Countdown left while the lobby is in `Countdown`.
    pub lobby_remaining_ms: Option<u64>,
    pub hold_progress: f32,
    pub hold_remaining_ms: u64,
    pub score: ScoreState,
}

impl FrameState {
    pub fn smoothed_poses(&self) -> Vec<Vec<Keypoint>> {
        self.tracks.iter().map(|t| t.smoothed.clone()).collect()
    }

    pub fn gestures(&self) -> Vec<Gesture> {
        self.tracks.iter().map(|t| t.gesture).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub frame: FrameState,
    pub swipe: Option<SwipeDirection>,
    pub menu: Option<MenuEvent>,
    pub confirmed: bool,
}

impl CycleOutput {
    pub fn events(&self) -> Vec<UiEvent> {
        let mut out = Vec::new();
        if let Some(m) = self.menu {
            out.push(UiEvent::Menu(m));
        }
        if let Some(d) = self.swipe {
            out.push(UiEvent::Swipe(d));
        }
        if self.confirmed {
            out.push(UiEvent::Confirm);
        }
        out
    }
}

pub struct Pipeline {
    min_visibility: f32,
    frame_interval_ms: u64,
    tracker: TrackManager,
    menu: MenuDebouncer,
    hold: HoldToConfirm,
    swipe: SwipeDetector,
    slots: SlotAssigner,
    lobby: LobbyGate,
    score: ScoreBoard,
    cycle: u64,
    last_timestamp_ms: Option<u64>,
}

impl Pipeline {
    pub fn new(profile: &Profile) -> Self {
        let classifier = GestureClassifier::new(profile.gestures.clone());
        let policy: Box<dyn PinPolicy> = match profile.slots.pin_first_to {
            Some(slot) => Box::new(PinFirstTo::new(slot)),
            None => Box::new(NoPin),
        };
        Self {
            min_visibility: profile.tracking.centroid_min_visibility,
            frame_interval_ms: profile.source.frame_interval_ms,
            tracker: TrackManager::new(profile.tracking.clone(), classifier),
            menu: MenuDebouncer::new(profile.menu.clone()),
            hold: HoldToConfirm::new(profile.hold.clone()),
            swipe: SwipeDetector::new(profile.swipe.threshold),
            slots: SlotAssigner::new(
                profile.slots.slot_centers(),
                profile.slots.stability_threshold,
                policy,
            ),
            lobby: LobbyGate::new(&profile.lobby),
            score: ScoreBoard::new(profile.score.clone()),
            cycle: 0,
            last_timestamp_ms: None,
        }
    }

    /// Validates the model output; a malformed frame yields no candidates.
    pub fn ingest_frame(&mut self, frame: RawFrame, now: Instant) -> CycleOutput {
        let candidates = match self.candidates(frame.poses) {
            Ok(c) => c,
            Err(e) => {
                warn!("frame at {} ms dropped: {e}", frame.timestamp_ms);
                Vec::new()
            }
        };
        self.step(frame.timestamp_ms, candidates, frame.hand_tip_x, now)
    }

    /// A cycle whose inference failed.
    pub fn empty_cycle(&mut self, now: Instant) -> CycleOutput {
        let ts = self
            .last_timestamp_ms
            .map_or(0, |t| t.saturating_add(self.frame_interval_ms));
        self.step(ts, Vec::new(), None, now)
    }

    /// Back to `WaitingPlayers` with a fresh score.
    pub fn reset_session(&mut self) {
        self.lobby.reset();
        self.score.reset();
    }

    fn candidates(&self, poses: Vec<Vec<Keypoint>>) -> Result<Vec<Candidate>, SchemaError> {
        poses
            .into_iter()
            .map(|kps| Pose::from_keypoints(kps).map(|p| Candidate::new(p, self.min_visibility)))
            .collect()
    }

    fn step(
        &mut self,
        timestamp_ms: u64,
        candidates: Vec<Candidate>,
        hand_tip_x: Option<f32>,
        now: Instant,
    ) -> CycleOutput {
        self.cycle += 1;
        self.last_timestamp_ms = Some(timestamp_ms);

        let swipe = self.swipe.update(hand_tip_x);
        self.tracker.ingest(candidates);
        let tracks = self.tracker.snapshot();

        let menu_pose = tracks
            .iter()
            .find(|t| t.missing_count == 0)
            .map(|t| t.latest.keypoints());
        let menu = self.menu.update(menu_pose, now);

        let gestures: Vec<Gesture> = tracks.iter().map(|t| t.gesture).collect();
        let confirmed = self.hold.update(&gestures, now);
        let score = self.score.update(&gestures, now);

        let people: Vec<_> = tracks.iter().map(|t| (t.id, t.centroid)).collect();
        let slots = self.slots.assign(&people);
        let lobby = self.lobby.update(tracks.len(), now);

        CycleOutput {
            frame: FrameState {
                cycle: self.cycle,
                timestamp_ms,
                tracks,
                slots,
                lobby,
                lobby_remaining_ms: self.lobby.remaining().map(as_millis),
                hold_progress: self.hold.progress(),
                hold_remaining_ms: as_millis(self.hold.remaining()),
                score,
            },
            swipe,
            menu,
            confirmed,
        }
    }
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Consecutive unreadable lines tolerated by `replay` before it gives up.
const MAX_READ_FAILURES: u32 = 64;

/// Runs an already opened source to exhaustion on the calling thread.
///
/// Frame timestamps drive the clock, so cooldowns and holds behave as they
/// did when the frames were recorded. Returns the number of cycles run.
pub fn replay(
    source: &mut dyn PoseSource,
    profile: &Profile,
    mut on_cycle: impl FnMut(&CycleOutput),
) -> Result<u64, SourceError> {
    let mut pipeline = Pipeline::new(profile);
    let base = Instant::now();
    let mut last = base;
    // timestamps past what `Instant` can represent keep the last clock value
    let mut clock = |ms: u64| {
        last = base.checked_add(Duration::from_millis(ms)).unwrap_or(last);
        last
    };
    let mut last_ts = 0u64;
    let mut read_failures = 0;
    loop {
        let polled = source.poll();
        if !matches!(polled, Err(SourceError::Read(_))) {
            read_failures = 0;
        }
        let out = match polled {
            Ok(Some(frame)) => {
                let now = clock(frame.timestamp_ms);
                pipeline.ingest_frame(frame, now)
            }
            Ok(None) => continue,
            Err(SourceError::Read(e)) => {
                read_failures += 1;
                if read_failures >= MAX_READ_FAILURES {
                    return Err(SourceError::Read(e));
                }
                warn!("skipping unreadable frame: {e}");
                continue;
            }
            Err(SourceError::Inference(e)) => {
                warn!("inference failed: {e}");
                let now = clock(last_ts.saturating_add(pipeline.frame_interval_ms));
                pipeline.empty_cycle(now)
            }
            Err(SourceError::Exhausted) => return Ok(pipeline.cycle),
            Err(e @ SourceError::Unavailable(_)) => return Err(e),
        };
        last_ts = out.frame.timestamp_ms;
        on_cycle(&out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gestures::GestureLabel;
    use crate::pose::BodyPart;
    use crate::pose::fixtures::{set, standing};
    use std::time::Duration;

    fn shifted(dx: f32) -> Vec<Keypoint> {
        standing()
            .into_iter()
            .map(|k| Keypoint::new(k.x + dx, k.y, k.visibility))
            .collect()
    }

    fn frame(ts: u64, poses: Vec<Vec<Keypoint>>, hand: Option<f32>) -> RawFrame {
        RawFrame {
            timestamp_ms: ts,
            poses,
            hand_tip_x: hand,
        }
    }

    #[test]
    fn test_two_people_get_slots_and_lobby_counts_them() {
        let profile = Profile {
            lobby: crate::config::LobbyConfig {
                required_people: 2,
                countdown_ms: 3000,
            },
            ..Profile::default()
        };
        let mut p = Pipeline::new(&profile);
        let base = Instant::now();
        let out = p.ingest_frame(frame(0, vec![shifted(-0.35), shifted(0.35)], None), base);
        assert_eq!(out.frame.tracks.len(), 2);
        assert_eq!(out.frame.slots, vec![Some(0), Some(4)]);
        assert_eq!(out.frame.lobby, LobbyPhase::Countdown);
        assert!(out.frame.tracks[0].centroid.0 < out.frame.tracks[1].centroid.0);
    }

    #[test]
    fn test_malformed_frame_counts_as_empty() {
        let mut p = Pipeline::new(&Profile::default());
        let base = Instant::now();
        p.ingest_frame(frame(0, vec![standing()], None), base);
        let mut bad = standing();
        bad[3].x = f32::INFINITY;
        let out = p.ingest_frame(frame(33, vec![bad], None), base + Duration::from_millis(33));
        assert_eq!(out.frame.tracks.len(), 1);
        assert_eq!(out.frame.tracks[0].missing_count, 1);
    }

    #[test]
    fn test_empty_cycle_advances_timestamp() {
        let mut p = Pipeline::new(&Profile::default());
        let base = Instant::now();
        p.ingest_frame(frame(330, vec![standing()], None), base);
        let out = p.empty_cycle(base);
        assert_eq!(out.frame.timestamp_ms, 363);
        assert_eq!(out.frame.cycle, 2);
    }

    #[test]
    fn test_menu_and_swipe_events() {
        let mut p = Pipeline::new(&Profile::default());
        let base = Instant::now();
        let mut kps = standing();
        set(&mut kps, BodyPart::LeftElbow, 0.6, 0.2);
        set(&mut kps, BodyPart::LeftWrist, 0.6, 0.1);
        let out = p.ingest_frame(frame(0, vec![kps], Some(0.2)), base);
        assert_eq!(out.frame.tracks[0].gesture.label, Some(GestureLabel::ElevateLeft));
        assert_eq!(out.events(), vec![UiEvent::Menu(MenuEvent::Next)]);

        let out = p.ingest_frame(
            frame(33, vec![standing()], Some(0.5)),
            base + Duration::from_millis(33),
        );
        assert_eq!(out.events(), vec![UiEvent::Swipe(SwipeDirection::Right)]);
    }

    #[test]
    fn test_empty_cycle_saturates_at_the_last_timestamp() {
        let mut p = Pipeline::new(&Profile::default());
        let base = Instant::now();
        p.ingest_frame(frame(u64::MAX, vec![standing()], None), base);
        assert_eq!(p.empty_cycle(base).frame.timestamp_ms, u64::MAX);
    }

    #[test]
    fn test_countdown_hold_and_score_are_published() {
        let mut p = Pipeline::new(&Profile::default());
        let base = Instant::now();
        let mut kps = standing();
        set(&mut kps, BodyPart::RightElbow, 0.4, 0.2);
        set(&mut kps, BodyPart::RightWrist, 0.4, 0.1);
        let out = p.ingest_frame(frame(0, vec![kps], None), base);
        assert_eq!(out.frame.lobby, LobbyPhase::Countdown);
        assert_eq!(out.frame.lobby_remaining_ms, Some(3000));
        assert_eq!(out.frame.hold_remaining_ms, 5000);
        assert_eq!(out.frame.score.recent, 15);
        assert_eq!(out.frame.score.total, 15);

        let out = p.ingest_frame(
            frame(1000, vec![standing()], None),
            base + Duration::from_millis(1000),
        );
        assert_eq!(out.frame.lobby_remaining_ms, Some(2000));
        assert_eq!(out.frame.score.recent, 0);
        assert_eq!(out.frame.score.idle_ms, 1000);

        p.reset_session();
        // the person is still tracked, so the countdown restarts in full
        let out = p.empty_cycle(base + Duration::from_millis(1033));
        assert_eq!(out.frame.lobby_remaining_ms, Some(3000));
        assert_eq!(out.frame.score.total, 0);
    }

    #[test]
    fn test_replay_gives_up_on_a_source_that_never_reads() {
        let mut src = crate::source::JsonLinesSource::from_path("/nonexistent/frames.jsonl", 33);
        let mut cycles = 0;
        let res = replay(&mut src, &Profile::default(), |_| cycles += 1);
        assert!(matches!(res, Err(SourceError::Read(_))));
        assert_eq!(cycles, 0);
    }

    #[test]
    fn test_ui_event_json_shape() {
        let v = serde_json::to_value(UiEvent::Menu(MenuEvent::Select)).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "menu", "value": "SELECT"}));
        let v = serde_json::to_value(UiEvent::Confirm).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "confirm"}));
    }
}

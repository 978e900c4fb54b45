use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use posectl::pose::{BodyPart, Keypoint};
use posectl::{EngineStatus, PoseEngine, PoseSource, Profile, RawFrame, SourceError};

fn standing(dx: f32) -> Vec<Keypoint> {
    let mut kps = vec![Keypoint::new(0.5 + dx, 0.5, 1.0); BodyPart::COUNT];
    let mut set = |p: BodyPart, x: f32, y: f32| kps[p.index()] = Keypoint::new(x + dx, y, 1.0);
    set(BodyPart::LeftShoulder, 0.6, 0.3);
    set(BodyPart::RightShoulder, 0.4, 0.3);
    set(BodyPart::LeftElbow, 0.6, 0.45);
    set(BodyPart::RightElbow, 0.4, 0.45);
    set(BodyPart::LeftWrist, 0.6, 0.6);
    set(BodyPart::RightWrist, 0.4, 0.6);
    set(BodyPart::LeftHip, 0.58, 0.6);
    set(BodyPart::RightHip, 0.42, 0.6);
    set(BodyPart::LeftKnee, 0.58, 0.75);
    set(BodyPart::RightKnee, 0.42, 0.75);
    set(BodyPart::LeftAnkle, 0.58, 0.9);
    set(BodyPart::RightAnkle, 0.42, 0.9);
    kps
}

#[derive(Default)]
struct Calls {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

struct Scripted {
    calls: Arc<Calls>,
    fail_opens: usize,
    poll_delay: Duration,
    frames: VecDeque<RawFrame>,
}

impl Scripted {
    fn new(calls: Arc<Calls>, frames: Vec<RawFrame>) -> Self {
        Self {
            calls,
            fail_opens: 0,
            poll_delay: Duration::ZERO,
            frames: frames.into(),
        }
    }
}

impl PoseSource for Scripted {
    fn open(&mut self) -> Result<(), SourceError> {
        let n = self.calls.opens.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_opens {
            return Err(SourceError::Unavailable("device busy".into()));
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<RawFrame>, SourceError> {
        if !self.poll_delay.is_zero() {
            thread::sleep(self.poll_delay);
        }
        Ok(self.frames.pop_front())
    }

    fn close(&mut self) {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

fn fast_profile() -> Profile {
    let mut p = Profile::default();
    p.source.retry_delay_ms = 1;
    p.source.idle_sleep_ms = 1;
    p
}

fn frames(n: u64, people: &[f32]) -> Vec<RawFrame> {
    (0..n)
        .map(|i| RawFrame {
            timestamp_ms: i * 33,
            poses: people.iter().map(|&dx| standing(dx)).collect(),
            hand_tip_x: None,
        })
        .collect()
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn acquisition_retries_then_runs() {
    let calls = Arc::new(Calls::default());
    let mut src = Scripted::new(calls.clone(), frames(3, &[0.0]));
    src.fail_opens = 2;
    let engine = PoseEngine::new(fast_profile(), Box::new(src));
    engine.start().unwrap();
    wait_until("three cycles", || engine.frame().cycle == 3);
    assert_eq!(calls.opens.load(Ordering::SeqCst), 3);
    assert_eq!(engine.status(), EngineStatus::Running);
    engine.stop();
    assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn snapshots_are_left_to_right_with_slots() {
    let calls = Arc::new(Calls::default());
    let src = Scripted::new(calls, frames(4, &[0.35, -0.35]));
    let engine = PoseEngine::new(fast_profile(), Box::new(src));
    engine.start().unwrap();
    wait_until("four cycles", || engine.frame().cycle == 4);

    let frame = engine.frame();
    assert_eq!(frame.tracks.len(), 2);
    assert!(frame.tracks[0].centroid.0 < frame.tracks[1].centroid.0);
    assert_eq!(frame.slots, vec![Some(0), Some(4)]);
    assert_eq!(engine.smoothed_poses().len(), 2);
    assert_eq!(engine.gestures().len(), 2);
    assert!(engine.gestures().iter().all(|g| g.label.is_none()));

    // an Arc handed out earlier is never mutated by later cycles
    let held = engine.frame();
    engine.stop();
    assert_eq!(held.cycle, 4);
}

#[test]
fn restart_with_new_profile() {
    let calls = Arc::new(Calls::default());
    let src = Scripted::new(calls.clone(), frames(2, &[0.0]));
    let engine = PoseEngine::new(fast_profile(), Box::new(src));
    engine.start().unwrap();
    wait_until("first run", || engine.frame().cycle == 2);
    engine.stop();
    assert_eq!(engine.status(), EngineStatus::Stopped);

    let mut p = fast_profile();
    p.meta.name = Some("second".into());
    engine.set_profile(p);
    engine.start().unwrap();
    wait_until("running again", || engine.status() == EngineStatus::Running);
    // a restart publishes from a fresh pipeline
    assert_eq!(engine.frame().cycle, 0);
    engine.stop();
    assert_eq!(calls.opens.load(Ordering::SeqCst), 2);
    assert_eq!(calls.closes.load(Ordering::SeqCst), 2);
}

#[test]
fn stop_is_bounded_by_timeout() {
    let calls = Arc::new(Calls::default());
    let mut src = Scripted::new(calls.clone(), Vec::new());
    src.poll_delay = Duration::from_millis(400);
    let mut profile = fast_profile();
    profile.source.stop_timeout_ms = 50;
    let engine = PoseEngine::new(profile, Box::new(src));
    engine.start().unwrap();
    wait_until("running", || engine.status() == EngineStatus::Running);

    let t0 = Instant::now();
    engine.stop();
    assert!(t0.elapsed() < Duration::from_millis(350));
    // the producer still owns the source, so it must not have been closed
    assert_eq!(calls.closes.load(Ordering::SeqCst), 0);
    assert!(engine.start().is_err());
}

#[test]
fn late_producer_is_reclaimed_on_next_start() {
    let calls = Arc::new(Calls::default());
    let mut src = Scripted::new(calls.clone(), Vec::new());
    src.poll_delay = Duration::from_millis(300);
    let mut profile = fast_profile();
    profile.source.stop_timeout_ms = 50;
    let engine = PoseEngine::new(profile, Box::new(src));
    engine.start().unwrap();
    wait_until("running", || engine.status() == EngineStatus::Running);

    engine.stop();
    assert!(engine.start().is_err());
    wait_until("late producer exit", || !engine.is_running());

    engine.start().unwrap();
    assert_eq!(calls.closes.load(Ordering::SeqCst), 1);
    wait_until("second open", || calls.opens.load(Ordering::SeqCst) == 2);
    assert!(engine.is_running());
}

#[test]
fn stop_before_start_is_harmless() {
    let calls = Arc::new(Calls::default());
    let engine = PoseEngine::new(fast_profile(), Box::new(Scripted::new(calls.clone(), vec![])));
    engine.stop();
    assert_eq!(calls.opens.load(Ordering::SeqCst), 0);
    assert!(engine.poll_events().is_empty());
    assert_eq!(engine.take_swipe(), None);
    assert!(!engine.take_confirm());
    assert_eq!(engine.status(), EngineStatus::Idle);
}

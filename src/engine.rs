//! Background producer thread and the consumer-facing engine handle.
//!
//! The producer owns the pose source and the [`Pipeline`]; after every cycle
//! it swaps a fresh [`FrameState`] into shared state. Consumers on any thread
//! read snapshots, take one-shot triggers, or drain the event queue.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::config::Profile;
use crate::error::{EngineError, SourceError};
use crate::gestures::Gesture;
use crate::pipeline::{CycleOutput, FrameState, Pipeline, UiEvent};
use crate::pose::Keypoint;
use crate::source::{PoseSource, acquire};
use crate::swipe::SwipeDirection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Running,
    /// Acquisition gave up; the engine stays up and serves empty snapshots.
    Unavailable(String),
    Stopped,
}

struct Shared {
    frame: Arc<FrameState>,
    swipe: Option<SwipeDirection>,
    confirm: bool,
    lobby_reset: bool,
    status: EngineStatus,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type Worker = JoinHandle<Box<dyn PoseSource>>;

pub struct PoseEngine {
    profile: Mutex<Profile>,
    shared: Arc<Mutex<Shared>>,
    stop: Arc<AtomicBool>,
    source: Mutex<Option<Box<dyn PoseSource>>>,
    worker: Mutex<Option<Worker>>,
    events_tx: Sender<UiEvent>,
    events_rx: Mutex<Receiver<UiEvent>>,
}

impl PoseEngine {
    pub fn new(profile: Profile, source: Box<dyn PoseSource>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            profile: Mutex::new(profile),
            shared: Arc::new(Mutex::new(Shared {
                frame: Arc::new(FrameState::default()),
                swipe: None,
                confirm: false,
                lobby_reset: false,
                status: EngineStatus::Idle,
            })),
            stop: Arc::new(AtomicBool::new(false)),
            source: Mutex::new(Some(source)),
            worker: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(events_rx),
        }
    }

    /// Spawns the producer. A no-op while a producer is already running.
    ///
    /// Fails with `SourceBusy` while a producer that was told to stop still
    /// holds the source.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            if self.stop.load(Ordering::SeqCst) {
                return Err(EngineError::SourceBusy);
            }
            return Ok(());
        }
        // a producer that ended on its own still holds the source
        if let Some(handle) = worker.take() {
            self.reclaim(handle);
        }
        let source = lock(&self.source).take().ok_or(EngineError::SourceBusy)?;

        self.stop.store(false, Ordering::SeqCst);
        {
            let mut s = lock(&self.shared);
            s.frame = Arc::new(FrameState::default());
            s.swipe = None;
            s.confirm = false;
            s.status = EngineStatus::Idle;
        }
        // triggers from a previous run are stale
        lock(&self.events_rx).try_iter().for_each(drop);

        let producer = Producer {
            profile: lock(&self.profile).clone(),
            shared: self.shared.clone(),
            stop: self.stop.clone(),
            events: self.events_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name("posectl-producer".into())
            .spawn(move || producer.run(source))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Signals the producer and waits up to `stop_timeout_ms` for it.
    ///
    /// The source is closed only after the producer has exited. A producer
    /// that misses the deadline keeps the source; the next `start` or `stop`
    /// after it exits joins it and closes the source.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let mut worker = lock(&self.worker);
        let Some(handle) = worker.take() else {
            return;
        };
        let timeout = Duration::from_millis(lock(&self.profile).source.stop_timeout_ms);
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            self.reclaim(handle);
        } else {
            warn!("producer did not stop within {timeout:?}; leaving it to finish");
            *worker = Some(handle);
        }
        drop(worker);

        let mut s = lock(&self.shared);
        if !matches!(s.status, EngineStatus::Unavailable(_)) {
            s.status = EngineStatus::Stopped;
        }
    }

    fn reclaim(&self, handle: Worker) {
        match handle.join() {
            Ok(mut source) => {
                source.close();
                debug!("closed {}", source.describe());
                *lock(&self.source) = Some(source);
            }
            Err(_) => {
                error!("producer thread panicked; pose source lost");
                lock(&self.shared).status = EngineStatus::Unavailable("producer panicked".into());
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Takes effect on the next `start`.
    pub fn set_profile(&self, profile: Profile) {
        *lock(&self.profile) = profile;
    }

    pub fn status(&self) -> EngineStatus {
        lock(&self.shared).status.clone()
    }

    /// Latest published cycle.
    pub fn frame(&self) -> Arc<FrameState> {
        lock(&self.shared).frame.clone()
    }

    /// Smoothed keypoints per tracked person, left to right.
    pub fn smoothed_poses(&self) -> Vec<Vec<Keypoint>> {
        self.frame().smoothed_poses()
    }

    /// Gesture per tracked person, parallel to `smoothed_poses`.
    pub fn gestures(&self) -> Vec<Gesture> {
        self.frame().gestures()
    }

    /// Read-and-clear: each swipe is returned once.
    pub fn take_swipe(&self) -> Option<SwipeDirection> {
        lock(&self.shared).swipe.take()
    }

    /// Read-and-clear of the hold-to-confirm pulse.
    pub fn take_confirm(&self) -> bool {
        std::mem::take(&mut lock(&self.shared).confirm)
    }

    /// Returns the lobby to `WaitingPlayers` on the next cycle.
    pub fn reset_lobby(&self) {
        lock(&self.shared).lobby_reset = true;
    }

    /// Drains every trigger emitted since the last call, oldest first.
    pub fn poll_events(&self) -> Vec<UiEvent> {
        lock(&self.events_rx).try_iter().collect()
    }
}

impl Drop for PoseEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Producer {
    profile: Profile,
    shared: Arc<Mutex<Shared>>,
    stop: Arc<AtomicBool>,
    events: Sender<UiEvent>,
}

impl Producer {
    fn set_status(&self, status: EngineStatus) {
        lock(&self.shared).status = status;
    }

    fn run(self, mut source: Box<dyn PoseSource>) -> Box<dyn PoseSource> {
        let cfg = &self.profile.source;
        if let Err(e) = acquire(source.as_mut(), cfg, &self.stop) {
            error!("giving up on {}: {e}", source.describe());
            self.set_status(EngineStatus::Unavailable(e.to_string()));
            return source;
        }
        if self.stop.load(Ordering::SeqCst) {
            return source;
        }
        self.set_status(EngineStatus::Running);
        info!(
            "producer running with profile '{}'",
            self.profile.meta.name.as_deref().unwrap_or("unnamed")
        );

        let idle = Duration::from_millis(cfg.idle_sleep_ms);
        let mut pipeline = Pipeline::new(&self.profile);
        while !self.stop.load(Ordering::SeqCst) {
            if std::mem::take(&mut lock(&self.shared).lobby_reset) {
                info!("lobby reset");
                pipeline.reset_session();
            }
            let now = Instant::now();
            let out = match source.poll() {
                Ok(Some(frame)) => pipeline.ingest_frame(frame, now),
                Ok(None) => {
                    thread::sleep(idle);
                    continue;
                }
                Err(SourceError::Read(e)) => {
                    debug!("frame read failed: {e}");
                    thread::sleep(idle);
                    continue;
                }
                Err(SourceError::Inference(e)) => {
                    warn!("inference failed: {e}");
                    pipeline.empty_cycle(now)
                }
                Err(SourceError::Exhausted) => {
                    info!("{} exhausted", source.describe());
                    break;
                }
                Err(e @ SourceError::Unavailable(_)) => {
                    error!("lost {}: {e}", source.describe());
                    self.set_status(EngineStatus::Unavailable(e.to_string()));
                    return source;
                }
            };
            self.publish(out);
            thread::sleep(idle);
        }

        self.set_status(EngineStatus::Stopped);
        source
    }

    fn publish(&self, out: CycleOutput) {
        let events = out.events();
        let frame = Arc::new(out.frame);
        {
            let mut s = lock(&self.shared);
            s.frame = frame;
            if out.swipe.is_some() {
                s.swipe = out.swipe;
            }
            if out.confirmed {
                s.confirm = true;
            }
        }
        for ev in events {
            debug!("event {ev:?}");
            // the engine owns the receiver, so this only fails during teardown
            let _ = self.events.send(ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::fixtures::standing;
    use crate::source::RawFrame;
    use std::collections::VecDeque;

    /// Replays scripted poll results, then reports `Ok(None)` forever.
    struct Scripted {
        open_failures: usize,
        polls: VecDeque<Result<Option<RawFrame>, SourceError>>,
        closed: Arc<AtomicBool>,
    }

    impl Scripted {
        fn new(polls: Vec<Result<Option<RawFrame>, SourceError>>) -> Self {
            Self {
                open_failures: 0,
                polls: polls.into(),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl PoseSource for Scripted {
        fn open(&mut self) -> Result<(), SourceError> {
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(SourceError::Unavailable("camera busy".into()));
            }
            Ok(())
        }

        fn poll(&mut self) -> Result<Option<RawFrame>, SourceError> {
            self.polls.pop_front().unwrap_or(Ok(None))
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            "scripted source".into()
        }
    }

    fn fast_profile() -> Profile {
        let mut p = Profile::default();
        p.source.retry_delay_ms = 1;
        p.source.idle_sleep_ms = 1;
        p
    }

    fn frame(ts: u64, hand: Option<f32>) -> Result<Option<RawFrame>, SourceError> {
        Ok(Some(RawFrame {
            timestamp_ms: ts,
            poses: vec![standing()],
            hand_tip_x: hand,
        }))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_stop_closes_source_after_join() {
        let src = Scripted::new(vec![frame(0, None)]);
        let closed = src.closed.clone();
        let engine = PoseEngine::new(fast_profile(), Box::new(src));
        engine.start().unwrap();
        wait_for(|| engine.frame().cycle == 1);
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(engine.smoothed_poses().len(), 1);

        engine.stop();
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(engine.status(), EngineStatus::Stopped);
        // idempotent both ways
        engine.stop();
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        engine.stop();
    }

    #[test]
    fn test_swipe_is_taken_once() {
        let src = Scripted::new(vec![frame(0, Some(0.2)), frame(33, Some(0.5))]);
        let engine = PoseEngine::new(fast_profile(), Box::new(src));
        engine.start().unwrap();
        wait_for(|| engine.frame().cycle == 2);
        assert_eq!(engine.take_swipe(), Some(SwipeDirection::Right));
        assert_eq!(engine.take_swipe(), None);
        assert_eq!(
            engine.poll_events(),
            vec![UiEvent::Swipe(SwipeDirection::Right)]
        );
        assert!(engine.poll_events().is_empty());
        engine.stop();
    }

    #[test]
    fn test_restart_drops_stale_events() {
        let src = Scripted::new(vec![frame(0, Some(0.2)), frame(33, Some(0.5))]);
        let engine = PoseEngine::new(fast_profile(), Box::new(src));
        engine.start().unwrap();
        wait_for(|| engine.frame().cycle == 2);
        engine.stop();
        engine.start().unwrap();
        assert!(engine.poll_events().is_empty());
        engine.stop();
    }

    struct Panicking;

    impl PoseSource for Panicking {
        fn open(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        fn poll(&mut self) -> Result<Option<RawFrame>, SourceError> {
            panic!("decoder crashed");
        }

        fn close(&mut self) {}

        fn describe(&self) -> String {
            "panicking source".into()
        }
    }

    #[test]
    fn test_producer_panic_marks_unavailable() {
        let engine = PoseEngine::new(fast_profile(), Box::new(Panicking));
        engine.start().unwrap();
        wait_for(|| !engine.is_running());
        engine.stop();
        assert_eq!(
            engine.status(),
            EngineStatus::Unavailable("producer panicked".into())
        );
        assert!(matches!(engine.start(), Err(EngineError::SourceBusy)));
    }

    #[test]
    fn test_acquisition_failure_marks_unavailable() {
        let mut src = Scripted::new(vec![]);
        src.open_failures = 5;
        let engine = PoseEngine::new(fast_profile(), Box::new(src));
        engine.start().unwrap();
        wait_for(|| matches!(engine.status(), EngineStatus::Unavailable(_)));
        assert!(engine.smoothed_poses().is_empty());
        engine.stop();
        assert!(matches!(engine.status(), EngineStatus::Unavailable(_)));
    }

    #[test]
    fn test_inference_failure_keeps_running() {
        let src = Scripted::new(vec![
            frame(0, None),
            Err(SourceError::Inference("bad tensor".into())),
            frame(66, None),
        ]);
        let engine = PoseEngine::new(fast_profile(), Box::new(src));
        engine.start().unwrap();
        wait_for(|| engine.frame().cycle == 3);
        let f = engine.frame();
        assert_eq!(f.tracks.len(), 1);
        assert_eq!(f.tracks[0].missing_count, 0);
        assert_eq!(engine.status(), EngineStatus::Running);
        engine.stop();
    }

    #[test]
    fn test_exhausted_source_stops_cleanly() {
        let src = Scripted::new(vec![frame(0, None), Err(SourceError::Exhausted)]);
        let engine = PoseEngine::new(fast_profile(), Box::new(src));
        engine.start().unwrap();
        wait_for(|| engine.status() == EngineStatus::Stopped);
        assert_eq!(engine.frame().cycle, 1);
        assert!(!engine.is_running());
        engine.stop();
    }
}

//! Session score fed by the per-person gesture scores.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::ScoreConfig;
use crate::gestures::Gesture;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreState {
    pub total: u64,
    /// Sum of this cycle's gesture scores.
    pub recent: u32,
    /// Grows with every scored gesture, capped at 1.0.
    pub accuracy: f32,
    /// Time since the last cycle with a nonzero score.
    pub idle_ms: u64,
    pub idle: bool,
}

#[derive(Debug, Clone)]
pub struct ScoreBoard {
    cfg: ScoreConfig,
    state: ScoreState,
    idle_for: Duration,
    last_update: Option<Instant>,
}

impl ScoreBoard {
    pub fn new(cfg: ScoreConfig) -> Self {
        let state = ScoreState {
            accuracy: cfg.initial_accuracy,
            ..ScoreState::default()
        };
        Self {
            cfg,
            state,
            idle_for: Duration::ZERO,
            last_update: None,
        }
    }

    pub fn state(&self) -> ScoreState {
        self.state
    }

    pub fn update(&mut self, gestures: &[Gesture], now: Instant) -> ScoreState {
        let dt = self
            .last_update
            .map(|prev| now.saturating_duration_since(prev))
            .unwrap_or(Duration::ZERO);
        self.last_update = Some(now);

        let recent: u32 = gestures
            .iter()
            .filter(|g| g.label.is_some())
            .map(|g| g.score)
            .sum();
        let s = &mut self.state;
        s.recent = recent;
        s.total = s.total.saturating_add(u64::from(recent));
        s.accuracy = (s.accuracy + recent as f32 * self.cfg.accuracy_per_point).min(1.0);

        if recent > 0 {
            self.idle_for = Duration::ZERO;
        } else {
            self.idle_for += dt;
        }
        s.idle_ms = self.idle_for.as_millis() as u64;
        s.idle = self.idle_for > self.cfg.idle_after();
        self.state
    }

    /// Starts a new session.
    pub fn reset(&mut self) {
        *self = Self::new(self.cfg.clone());
    }
}

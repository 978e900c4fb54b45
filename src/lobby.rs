//! Required-player gate in front of a session.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::LobbyConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyPhase {
    #[default]
    WaitingPlayers,
    Countdown,
    Starting,
}

#[derive(Debug, Clone)]
pub struct LobbyGate {
    required: usize,
    countdown: Duration,
    phase: LobbyPhase,
    countdown_started: Option<Instant>,
    now: Option<Instant>,
}

impl LobbyGate {
    pub fn new(cfg: &LobbyConfig) -> Self {
        Self {
            required: cfg.required_people,
            countdown: cfg.countdown(),
            phase: LobbyPhase::WaitingPlayers,
            countdown_started: None,
            now: None,
        }
    }

    pub fn phase(&self) -> LobbyPhase {
        self.phase
    }

    /// Time left on the countdown as of the last update.
    pub fn remaining(&self) -> Option<Duration> {
        match (self.phase, self.countdown_started, self.now) {
            (LobbyPhase::Countdown, Some(start), Some(now)) => {
                Some(self.countdown.saturating_sub(now.saturating_duration_since(start)))
            }
            _ => None,
        }
    }

    pub fn update(&mut self, people: usize, now: Instant) -> LobbyPhase {
        self.now = Some(now);
        match self.phase {
            LobbyPhase::WaitingPlayers => {
                if people >= self.required {
                    self.phase = LobbyPhase::Countdown;
                    self.countdown_started = Some(now);
                }
            }
            LobbyPhase::Countdown => {
                if people < self.required {
                    self.phase = LobbyPhase::WaitingPlayers;
                    self.countdown_started = None;
                } else if self
                    .countdown_started
                    .is_some_and(|start| now.saturating_duration_since(start) >= self.countdown)
                {
                    self.phase = LobbyPhase::Starting;
                }
            }
            LobbyPhase::Starting => {}
        }
        self.phase
    }

    /// Starts a new session.
    pub fn reset(&mut self) {
        self.phase = LobbyPhase::WaitingPlayers;
        self.countdown_started = None;
    }
}

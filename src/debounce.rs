//! Turning per-cycle gesture streams into discrete UI triggers.
//!
//! Two independent strategies: a cooldown that lets one event through and
//! then suppresses input for a fixed period, and a hold timer that fires once
//! a composite gesture condition has persisted long enough.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::{HoldConfig, HoldMode, MenuConfig};
use crate::gestures::{Gesture, GestureLabel};
use crate::pose::{BodyPart, Keypoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MenuEvent {
    Next,
    Prev,
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownState {
    Idle,
    Suppressed { until: Instant },
}

/// Single-shot emitter: one event, then silence for `cooldown`.
#[derive(Debug, Clone)]
pub struct Cooldown {
    cooldown: Duration,
    state: CooldownState,
}

impl Cooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: CooldownState::Idle,
        }
    }

    pub fn state(&self) -> CooldownState {
        self.state
    }

    /// Passes `input` through if idle; anything offered while suppressed is
    /// dropped.
    pub fn offer<E>(&mut self, input: Option<E>, now: Instant) -> Option<E> {
        if let CooldownState::Suppressed { until } = self.state {
            if now < until {
                return None;
            }
            self.state = CooldownState::Idle;
        }
        let event = input?;
        self.state = CooldownState::Suppressed {
            until: now + self.cooldown,
        };
        Some(event)
    }
}

/// Arms-up menu mapping for the single-person scheme.
///
/// Both wrists above their shoulders select; left alone is NEXT, right alone
/// is PREV. Low wrist visibility reads as no gesture.
pub fn menu_gesture(kps: &[Keypoint], cfg: &MenuConfig) -> Option<MenuEvent> {
    let get = |p: BodyPart| kps.get(p.index());
    let (ls, rs) = (get(BodyPart::LeftShoulder)?, get(BodyPart::RightShoulder)?);
    let (lw, rw) = (get(BodyPart::LeftWrist)?, get(BodyPart::RightWrist)?);

    if !lw.is_visible(cfg.min_wrist_visibility) || !rw.is_visible(cfg.min_wrist_visibility) {
        return None;
    }

    let left_up = lw.y < ls.y - cfg.shoulder_margin;
    let right_up = rw.y < rs.y - cfg.shoulder_margin;
    match (left_up, right_up) {
        (true, true) => Some(MenuEvent::Select),
        (true, false) => Some(MenuEvent::Next),
        (false, true) => Some(MenuEvent::Prev),
        (false, false) => None,
    }
}

/// Menu scheme: arms-up mapping gated by a cooldown.
#[derive(Debug, Clone)]
pub struct MenuDebouncer {
    cfg: MenuConfig,
    cooldown: Cooldown,
}

impl MenuDebouncer {
    pub fn new(cfg: MenuConfig) -> Self {
        let cooldown = Cooldown::new(cfg.cooldown());
        Self { cfg, cooldown }
    }

    pub fn update(&mut self, pose: Option<&[Keypoint]>, now: Instant) -> Option<MenuEvent> {
        let input = pose.and_then(|kps| menu_gesture(kps, &self.cfg));
        self.cooldown.offer(input, now)
    }
}

/// Sustained multi-gesture hold with a grace period for short drops.
#[derive(Debug, Clone)]
pub struct HoldToConfirm {
    cfg: HoldConfig,
    last_seen: HashMap<GestureLabel, Instant>,
    last_update: Option<Instant>,
    elapsed: Duration,
    dropped_for: Duration,
    active: bool,
}

impl HoldToConfirm {
    pub fn new(cfg: HoldConfig) -> Self {
        Self {
            cfg,
            last_seen: HashMap::new(),
            last_update: None,
            elapsed: Duration::ZERO,
            dropped_for: Duration::ZERO,
            active: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Fraction of the hold completed, in [0, 1].
    pub fn progress(&self) -> f32 {
        (self.elapsed.as_secs_f32() / self.cfg.hold().as_secs_f32()).min(1.0)
    }

    pub fn remaining(&self) -> Duration {
        self.cfg.hold().saturating_sub(self.elapsed)
    }

    pub fn reset(&mut self) {
        self.last_seen.clear();
        self.elapsed = Duration::ZERO;
        self.dropped_for = Duration::ZERO;
        self.active = false;
    }

    fn condition(&self, now: Instant) -> bool {
        let recent = |label: &GestureLabel| {
            self.last_seen
                .get(label)
                .is_some_and(|&t| now.saturating_duration_since(t) < self.cfg.recency())
        };
        match self.cfg.mode {
            HoldMode::All => self.cfg.required.iter().all(recent),
            HoldMode::Any => self.cfg.required.iter().any(recent),
        }
    }

    /// Feeds one cycle's gestures; returns true on the cycle the hold fires.
    pub fn update(&mut self, gestures: &[Gesture], now: Instant) -> bool {
        let dt = self
            .last_update
            .map(|prev| now.saturating_duration_since(prev))
            .unwrap_or(Duration::ZERO);
        self.last_update = Some(now);

        for g in gestures {
            if let Some(label) = g.label {
                if g.score >= self.cfg.min_score && self.cfg.required.contains(&label) {
                    self.last_seen.insert(label, now);
                }
            }
        }

        if self.condition(now) {
            // the first cycle of a fresh hold only starts the clock
            if self.active {
                self.elapsed += dt;
            }
            self.active = true;
            self.dropped_for = Duration::ZERO;
            if self.elapsed >= self.cfg.hold() {
                self.reset();
                return true;
            }
        } else if self.active {
            self.dropped_for += dt;
            if self.dropped_for >= self.cfg.drop_grace() {
                self.active = false;
                self.elapsed = Duration::ZERO;
                self.dropped_for = Duration::ZERO;
            }
        }
        false
    }
}

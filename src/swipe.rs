//! Horizontal swipe detection from a single hand's index fingertip.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeDirection {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct SwipeDetector {
    threshold: f32,
    reference_x: Option<f32>,
    pending: Option<SwipeDirection>,
}

impl SwipeDetector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            reference_x: None,
            pending: None,
        }
    }

    /// Feeds one frame; `None` means no hand was detected.
    ///
    /// Returns the swipe fired on this frame, if any. The reference is rebased
    /// on every swipe so a reversal needs the full threshold again.
    pub fn update(&mut self, tip_x: Option<f32>) -> Option<SwipeDirection> {
        let Some(x) = tip_x else {
            self.reference_x = None;
            return None;
        };
        let reference = *self.reference_x.get_or_insert(x);
        let diff = x - reference;
        let fired = if diff > self.threshold {
            Some(SwipeDirection::Right)
        } else if diff < -self.threshold {
            Some(SwipeDirection::Left)
        } else {
            None
        };
        if fired.is_some() {
            self.reference_x = Some(x);
            self.pending = fired;
        }
        fired
    }

    /// Read-and-clear of the last unconsumed swipe.
    pub fn take(&mut self) -> Option<SwipeDirection> {
        self.pending.take()
    }
}

//! Per-track moving-average smoothing.

use std::collections::VecDeque;

use crate::pose::{Keypoint, Pose};

/// Bounded FIFO of raw poses averaged into one smoothed pose.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    capacity: usize,
    history: VecDeque<Pose>,
}

impl SmoothingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, pose: Pose) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(pose);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Pose> {
        self.history.back()
    }

    /// Per-index mean over the poses currently held.
    ///
    /// Divides by the number of entries present, not the capacity. Smoothed
    /// keypoints are always reported visible.
    pub fn smoothed(&self) -> Vec<Keypoint> {
        let n = self.history.len();
        if n == 0 {
            return Vec::new();
        }
        let points = self.history.iter().map(Pose::len).min().unwrap_or(0);
        (0..points)
            .map(|j| {
                let (sx, sy) = self.history.iter().fold((0.0f32, 0.0f32), |acc, p| {
                    let kp = p.keypoints()[j];
                    (acc.0 + kp.x, acc.1 + kp.y)
                });
                Keypoint::new(sx / n as f32, sy / n as f32, 1.0)
            })
            .collect()
    }
}

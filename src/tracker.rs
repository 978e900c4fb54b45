//! Frame-to-frame person tracking and read-only snapshots.

use log::debug;
use serde::Serialize;

use crate::config::TrackingConfig;
use crate::gestures::{Gesture, GestureClassifier};
use crate::pose::{Candidate, Keypoint, Pose, distance};
use crate::smoothing::SmoothingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrackId(pub u64);

#[derive(Debug)]
struct Track {
    id: TrackId,
    history: SmoothingBuffer,
    last_centroid: (f32, f32),
    gesture: Gesture,
    missing_count: u32,
}

/// Read-only view of one live track.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub centroid: (f32, f32),
    pub smoothed: Vec<Keypoint>,
    /// Most recent raw pose; stale when `missing_count > 0`.
    #[serde(skip)]
    pub latest: Pose,
    pub gesture: Gesture,
    pub missing_count: u32,
}

#[derive(Debug)]
pub struct TrackManager {
    cfg: TrackingConfig,
    classifier: GestureClassifier,
    tracks: Vec<Track>,
    next_id: u64,
}

impl TrackManager {
    pub fn new(cfg: TrackingConfig, classifier: GestureClassifier) -> Self {
        Self {
            cfg,
            classifier,
            tracks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn live_count(&self) -> usize {
        self.tracks.len()
    }

    /// Drops every track; ids keep increasing afterwards.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    /// Greedy nearest-centroid association, eviction, then birth.
    pub fn ingest(&mut self, candidates: Vec<Candidate>) {
        let mut claimed = vec![false; candidates.len()];

        // tracks are kept in creation order
        for track in self.tracks.iter_mut() {
            let mut best: Option<(usize, f32)> = None;
            for (i, cand) in candidates.iter().enumerate() {
                if claimed[i] {
                    continue;
                }
                let d = distance(cand.centroid, track.last_centroid);
                if d < self.cfg.reassociation_threshold && best.is_none_or(|(_, bd)| d < bd) {
                    best = Some((i, d));
                }
            }

            match best {
                Some((i, _)) => {
                    claimed[i] = true;
                    let cand = &candidates[i];
                    track.gesture = self.classifier.classify(cand.pose.keypoints());
                    track.history.push(cand.pose.clone());
                    track.last_centroid = cand.centroid;
                    track.missing_count = 0;
                }
                None => {
                    track.missing_count += 1;
                    track.gesture = Gesture::NONE;
                }
            }
        }

        let max_missing = self.cfg.max_missing_cycles;
        self.tracks.retain(|t| {
            let keep = t.missing_count <= max_missing;
            if !keep {
                debug!("track {} evicted after {} missed cycles", t.id.0, t.missing_count);
            }
            keep
        });

        for (cand, taken) in candidates.into_iter().zip(claimed) {
            if taken {
                continue;
            }
            if self.tracks.len() >= self.cfg.max_people {
                debug!("dropping candidate at {:?}: tracker full", cand.centroid);
                continue;
            }
            let id = TrackId(self.next_id);
            self.next_id += 1;
            let gesture = self.classifier.classify(cand.pose.keypoints());
            let mut history = SmoothingBuffer::new(self.cfg.history_capacity);
            history.push(cand.pose);
            debug!("track {} born at {:?}", id.0, cand.centroid);
            self.tracks.push(Track {
                id,
                history,
                last_centroid: cand.centroid,
                gesture,
                missing_count: 0,
            });
        }
    }

    /// Live tracks ordered left to right by centroid x.
    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        let mut out: Vec<TrackSnapshot> = self
            .tracks
            .iter()
            .filter(|t| !t.history.is_empty())
            .map(|t| TrackSnapshot {
                id: t.id,
                centroid: t.last_centroid,
                smoothed: t.history.smoothed(),
                latest: t.history.latest().cloned().unwrap_or_default(),
                gesture: t.gesture,
                missing_count: t.missing_count,
            })
            .collect();
        out.sort_by(|a, b| a.centroid.0.total_cmp(&b.centroid.0));
        out
    }
}

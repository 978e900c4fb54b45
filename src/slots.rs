//! Binding tracked people to fixed display slots with hysteresis.

use std::collections::HashMap;

use crate::pose::distance;
use crate::tracker::TrackId;

/// Reference centers of an evenly divided `cols` x `rows` grid, row-major.
pub fn grid_centers(cols: usize, rows: usize) -> Vec<(f32, f32)> {
    let mut out = Vec::with_capacity(cols * rows);
    for r in 0..rows {
        for c in 0..cols {
            out.push((
                (c as f32 + 0.5) / cols as f32,
                (r as f32 + 0.5) / rows as f32,
            ));
        }
    }
    out
}

/// Decides a slot for someone who has no previous slot, before the
/// nearest-free pass runs.
pub trait PinPolicy: Send {
    fn pinned_slot(&mut self, person: TrackId, free: &[bool]) -> Option<usize>;
}

#[derive(Debug, Default)]
pub struct NoPin;

impl PinPolicy for NoPin {
    fn pinned_slot(&mut self, _person: TrackId, _free: &[bool]) -> Option<usize> {
        None
    }
}

/// The first person ever assigned goes to `slot` (the center of the lobby
/// layout); everyone after that is matched by distance.
#[derive(Debug)]
pub struct PinFirstTo {
    slot: usize,
    used: bool,
}

impl PinFirstTo {
    pub fn new(slot: usize) -> Self {
        Self { slot, used: false }
    }
}

impl PinPolicy for PinFirstTo {
    fn pinned_slot(&mut self, _person: TrackId, free: &[bool]) -> Option<usize> {
        if self.used || !free.get(self.slot).copied().unwrap_or(false) {
            return None;
        }
        self.used = true;
        Some(self.slot)
    }
}

pub struct SlotAssigner {
    centers: Vec<(f32, f32)>,
    stability_threshold: f32,
    policy: Box<dyn PinPolicy>,
    previous: HashMap<TrackId, usize>,
}

impl SlotAssigner {
    pub fn new(
        centers: Vec<(f32, f32)>,
        stability_threshold: f32,
        policy: Box<dyn PinPolicy>,
    ) -> Self {
        Self {
            centers,
            stability_threshold,
            policy,
            previous: HashMap::new(),
        }
    }

    /// Assigns slots for this frame's people, given in display order.
    ///
    /// Returns a slot per person (parallel to `people`); people beyond the
    /// slot count get `None`.
    pub fn assign(&mut self, people: &[(TrackId, (f32, f32))]) -> Vec<Option<usize>> {
        let mut out = vec![None; people.len()];
        let mut free = vec![true; self.centers.len()];

        // keep previous slots that are still close enough
        for (i, (id, centroid)) in people.iter().enumerate() {
            let Some(&slot) = self.previous.get(id) else {
                continue;
            };
            if slot < free.len()
                && free[slot]
                && distance(*centroid, self.centers[slot]) < self.stability_threshold
            {
                out[i] = Some(slot);
                free[slot] = false;
            }
        }

        for (i, (id, centroid)) in people.iter().enumerate() {
            if out[i].is_some() {
                continue;
            }
            let slot = if self.previous.contains_key(id) {
                None
            } else {
                self.policy.pinned_slot(*id, &free)
            }
            .or_else(|| nearest_free(&self.centers, &free, *centroid));
            if let Some(slot) = slot {
                out[i] = Some(slot);
                free[slot] = false;
            }
        }

        self.previous = people
            .iter()
            .zip(&out)
            .filter_map(|((id, _), slot)| slot.map(|s| (*id, s)))
            .collect();
        out
    }
}

fn nearest_free(centers: &[(f32, f32)], free: &[bool], p: (f32, f32)) -> Option<usize> {
    centers
        .iter()
        .enumerate()
        .filter(|(i, _)| free[*i])
        .map(|(i, c)| (i, distance(p, *c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

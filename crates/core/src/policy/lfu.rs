//! Least-frequently-used replacement (§4.1). Not present in the teacher's
//! policy set; modeled after its `ReplacementPolicy` shape with a saturating
//! per-way access counter stored directly in `ReplacementMeta::counter`.

use super::ReplacementPolicy;
use crate::block::ReplacementMeta;

/// Stateless beyond the shared `meta` counters; kept as a unit struct so the
/// trait object has somewhere to live.
pub struct LfuPolicy;

impl LfuPolicy {
    /// `num_sets`/`associativity` are unused (all state lives in `meta`) but
    /// kept in the constructor signature for symmetry with the other policies.
    #[must_use]
    pub fn new(_num_sets: usize, _associativity: usize) -> Self {
        Self
    }
}

impl ReplacementPolicy for LfuPolicy {
    fn on_hit(&mut self, _set: usize, way: usize, meta: &mut [ReplacementMeta]) {
        meta[way].counter = meta[way].counter.saturating_add(1);
    }

    fn on_install(&mut self, _set: usize, way: usize, meta: &mut [ReplacementMeta]) {
        meta[way].counter = 0;
    }

    fn choose_victim(&mut self, _set: usize, meta: &[ReplacementMeta]) -> usize {
        self.preview_victim(_set, meta)
    }

    fn preview_victim(&self, _set: usize, meta: &[ReplacementMeta]) -> usize {
        meta.iter()
            .enumerate()
            .min_by_key(|(_, m)| m.counter)
            .map_or(0, |(way, _)| way)
    }
}

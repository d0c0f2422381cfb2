//! True-LRU replacement, grounded in the teacher's `LruPolicy` (a per-set
//! recency stack rather than per-way counters — simpler to keep correct and
//! equivalent to the counter formulation described in prose).

use super::ReplacementPolicy;
use crate::block::ReplacementMeta;

/// Per-set most-recently-used-first list of ways.
pub struct LruPolicy {
    order: Vec<Vec<usize>>,
    associativity: usize,
}

impl LruPolicy {
    /// Build empty recency lists for `num_sets` sets of `associativity` ways each.
    #[must_use]
    pub fn new(num_sets: usize, associativity: usize) -> Self {
        Self {
            order: vec![Vec::with_capacity(associativity); num_sets],
            associativity,
        }
    }

    fn touch(&mut self, set: usize, way: usize) {
        let order = &mut self.order[set];
        if let Some(pos) = order.iter().position(|&w| w == way) {
            order.remove(pos);
        }
        order.insert(0, way);
    }
}

impl ReplacementPolicy for LruPolicy {
    fn on_hit(&mut self, set: usize, way: usize, _meta: &mut [ReplacementMeta]) {
        self.touch(set, way);
    }

    fn on_install(&mut self, set: usize, way: usize, _meta: &mut [ReplacementMeta]) {
        self.touch(set, way);
    }

    fn choose_victim(&mut self, set: usize, _meta: &[ReplacementMeta]) -> usize {
        self.order[set]
            .last()
            .copied()
            .unwrap_or(self.associativity - 1)
    }

    fn preview_victim(&self, set: usize, _meta: &[ReplacementMeta]) -> usize {
        self.order[set]
            .last()
            .copied()
            .unwrap_or(self.associativity - 1)
    }
}

//! Snoop filter (C6): a global coherence directory over the "snooped" set of
//! private caches. Grounded directly in the original tool's `snoop_filter_t`
//! (`snoop`, `snoop_eviction`, lazily-allocated per-tag entries).

use std::collections::HashMap;

use crate::block::TagId;

/// Per-tag coherence state: which snooped caches currently hold the line,
/// and whether it is dirty.
#[derive(Debug, Default, Clone)]
struct SnoopEntry {
    sharers: Vec<bool>,
    dirty: bool,
}

impl SnoopEntry {
    fn new(num_snooped: usize) -> Self {
        Self {
            sharers: vec![false; num_snooped],
            dirty: false,
        }
    }

    fn num_sharers(&self) -> usize {
        self.sharers.iter().filter(|&&s| s).count()
    }
}

/// Aggregate coherence traffic counters, reported alongside a device's own
/// stats when it is coherent (§6 "stats output").
#[derive(Debug, Default, Clone, Copy)]
pub struct SnoopStats {
    /// Writes observed across all snooped caches.
    pub writes: i64,
    /// Times a dirty line changed hands without an intervening write.
    pub writebacks: i64,
    /// Coherence invalidations issued to sharers.
    pub invalidates: i64,
}

/// Coherence directory shared by every cache in one "snooped" set (§4.3).
/// Device ids are dense indices into this filter's own sharer bitmaps,
/// assigned by the hierarchy at placement time.
pub struct SnoopFilter {
    num_snooped: usize,
    entries: HashMap<TagId, SnoopEntry>,
    stats: SnoopStats,
}

/// One consequence the caller (the hierarchy driver) must carry out: tell a
/// sharer's device to drop its copy. The filter never reaches back into
/// devices directly — it hands the caller a list of `(device_id, tag)` pairs
/// to invalidate, keeping arena access centralized in the hierarchy driver.
pub struct SnoopOutcome {
    /// Sharers that must now invalidate `tag` with reason `Coherence`.
    pub invalidate: Vec<usize>,
}

impl SnoopFilter {
    /// Build an empty filter over `num_snooped` dense device ids.
    #[must_use]
    pub fn new(num_snooped: usize) -> Self {
        Self {
            num_snooped,
            entries: HashMap::new(),
            stats: SnoopStats::default(),
        }
    }

    /// Number of dense device ids this filter tracks.
    #[must_use]
    pub const fn num_snooped(&self) -> usize {
        self.num_snooped
    }

    /// Current aggregate coherence counters.
    #[must_use]
    pub const fn stats(&self) -> SnoopStats {
        self.stats
    }

    fn entry(&mut self, tag: TagId) -> &mut SnoopEntry {
        self.entries
            .entry(tag)
            .or_insert_with(|| SnoopEntry::new(self.num_snooped))
    }

    /// A device `requesting_id` just hit or missed on `tag` with access kind
    /// `is_write` (§4.3). Returns the set of other sharers that must now be
    /// invalidated locally.
    pub fn snoop(&mut self, tag: TagId, requesting_id: usize, is_write: bool) -> SnoopOutcome {
        let entry = self.entry(tag);

        // A non-sharer touching a dirty line forces a silent writeback and
        // takes over exclusive ownership of the (still dirty) data; the old
        // owner is dropped from the directory without a local invalidation.
        if entry.dirty && !entry.sharers[requesting_id] {
            self.stats.writebacks += 1;
            for is_sharer in &mut entry.sharers {
                *is_sharer = false;
            }
        }

        let mut invalidate = Vec::new();
        if is_write {
            self.stats.writes += 1;
            entry.dirty = true;
            for (other_id, is_sharer) in entry.sharers.iter_mut().enumerate() {
                if *is_sharer && other_id != requesting_id {
                    *is_sharer = false;
                    invalidate.push(other_id);
                }
            }
            self.stats.invalidates += invalidate.len() as i64;
        }

        entry.sharers[requesting_id] = true;
        SnoopOutcome { invalidate }
    }

    /// A device `evicter_id` is dropping `tag` from its own array without a
    /// coherence-triggered invalidation (a plain capacity/conflict eviction
    /// of a coherent line, §4.2.1 step 4).
    pub fn snoop_eviction(&mut self, tag: TagId, evicter_id: usize) {
        let Some(entry) = self.entries.get_mut(&tag) else {
            return;
        };
        if !entry.sharers[evicter_id] {
            return;
        }
        if entry.dirty {
            self.stats.writebacks += 1;
            entry.dirty = false;
        }
        entry.sharers[evicter_id] = false;
    }

    /// Current sharer set for `tag`, for invariant checks and tests.
    #[must_use]
    pub fn sharers(&self, tag: TagId) -> Vec<usize> {
        self.entries
            .get(&tag)
            .map(|e| {
                e.sharers
                    .iter()
                    .enumerate()
                    .filter(|&(_, &s)| s)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `tag` is currently marked dirty.
    #[must_use]
    pub fn is_dirty(&self, tag: TagId) -> bool {
        self.entries.get(&tag).is_some_and(|e| e.dirty)
    }

    /// Invariant check: every dirty entry has exactly one sharer (§8 invariant 6).
    #[must_use]
    pub fn check_dirty_invariant(&self) -> bool {
        self.entries
            .values()
            .all(|e| !e.dirty || e.num_sharers() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_c_two_core_coherence() {
        // L1s: 1-way/1-line, coherent. C0 = id 0, C1 = id 1.
        let mut filter = SnoopFilter::new(2);

        filter.snoop(0, 0, false);
        assert_eq!(filter.sharers(0), vec![0]);

        filter.snoop(0, 1, false);
        assert_eq!(filter.sharers(0), vec![0, 1]);

        let outcome = filter.snoop(0, 0, true);
        assert_eq!(outcome.invalidate, vec![1]);
        assert_eq!(filter.sharers(0), vec![0]);
        assert!(filter.is_dirty(0));

        let outcome = filter.snoop(0, 1, false);
        assert!(outcome.invalidate.is_empty());
        assert_eq!(filter.sharers(0), vec![1]);
        assert!(filter.is_dirty(0));

        let stats = filter.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.writebacks, 1);
        assert_eq!(stats.invalidates, 1);
    }

    #[test]
    fn eviction_clears_sharer_without_invalidate_count() {
        let mut filter = SnoopFilter::new(2);
        filter.snoop(5, 0, true);
        assert!(filter.is_dirty(5));
        filter.snoop_eviction(5, 0);
        assert!(!filter.is_dirty(5));
        assert!(filter.sharers(5).is_empty());
        assert_eq!(filter.stats().writebacks, 1);
        assert_eq!(filter.stats().invalidates, 0);
    }
}

//! Stats collector (C3): hit/miss/coherence counters, compulsory-miss
//! tracking via an address-interval set, and the optional miss-dump sink.
//!
//! Counter shape and the local/total rate distinction are grounded in the
//! original tool's `caching_device_stats_t` (`access`, `child_access`,
//! `print_rates`); the overall module style — a plain struct of public
//! counters plus a `print_sections`-like reporting method — follows the
//! teacher's own `stats::SimStats`.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use crate::error::InitError;
use crate::memref::MemRef;

/// Named counters exposed through the metric query API (§4.4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricName {
    /// Demand hits at this device.
    Hits,
    /// Demand misses at this device.
    Misses,
    /// Misses that were also compulsory (first touch of that block-aligned address).
    CompulsoryMisses,
    /// Hits credited up from a child device.
    ChildHits,
    /// Invalidations issued because an inclusive parent evicted the line.
    InclusiveInvalidates,
    /// Invalidations issued by the coherence protocol.
    CoherenceInvalidates,
    /// Hits on hardware-prefetched lines.
    PrefetchHits,
    /// Misses on hardware-prefetch requests.
    PrefetchMisses,
    /// Explicit flush operations handled.
    Flushes,
}

/// An ordered set of half-open, `block_size`-aligned address intervals,
/// used to tell a compulsory miss (first-ever touch of a block) from a
/// capacity/conflict miss (§4.4).
#[derive(Debug, Default, Clone)]
pub struct AccessCountSet {
    /// Interval starts, kept sorted; `ends` holds the matching interval end
    /// at the same index. Intervals are disjoint and non-adjacent once
    /// `insert` finishes merging.
    starts: Vec<u64>,
    ends: Vec<u64>,
}

impl AccessCountSet {
    /// Record a touch of the block starting at `block_start` (already
    /// aligned down to the device's block size by the caller). Returns
    /// `true` if this is the first time this block has ever been seen
    /// (i.e. a compulsory miss).
    pub fn insert(&mut self, block_start: u64, block_size: u64) -> bool {
        let block_end = block_start.saturating_add(block_size);

        let idx = match self.starts.binary_search(&block_start) {
            Ok(i) => {
                // Exact start match: block already recorded.
                debug_assert!(self.ends[i] >= block_end);
                return false;
            }
            Err(i) => i,
        };

        // Already covered by the interval immediately before `idx`?
        if idx > 0 && self.ends[idx - 1] >= block_end {
            return false;
        }

        let extends_prev = idx > 0 && self.ends[idx - 1] == block_start;
        let extends_next = idx < self.starts.len() && self.starts[idx] == block_end;

        match (extends_prev, extends_next) {
            (true, true) => {
                self.ends[idx - 1] = self.ends[idx];
                self.starts.remove(idx);
                self.ends.remove(idx);
            }
            (true, false) => {
                self.ends[idx - 1] = block_end;
            }
            (false, true) => {
                self.starts[idx] = block_start;
            }
            (false, false) => {
                self.starts.insert(idx, block_start);
                self.ends.insert(idx, block_end);
            }
        }
        true
    }
}

/// Append-only miss dump: `"0x<pc>,0x<addr>\n"` per recorded miss.
/// Opened close-on-exec so a forked child trace-replay process never
/// inherits the descriptor (§5).
pub struct MissDumpSink {
    file: std::fs::File,
}

impl MissDumpSink {
    /// Open (or truncate) `path` for append, marking it close-on-exec.
    pub fn open(path: &Path) -> Result<Self, InitError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|source| InitError::UnwritableFile {
                path: path.display().to_string(),
                source,
            })?;
        Self::set_close_on_exec(&file);
        Ok(Self { file })
    }

    #[cfg(unix)]
    fn set_close_on_exec(file: &std::fs::File) {
        use std::os::unix::io::AsRawFd;
        // SAFETY: `fd` is a valid, open descriptor owned by `file` for the
        // duration of this call; we only read/modify its FD_CLOEXEC flag.
        unsafe {
            let fd = file.as_raw_fd();
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }
    }

    #[cfg(not(unix))]
    fn set_close_on_exec(_file: &std::fs::File) {}

    fn record(&mut self, pc: u64, addr: u64) -> std::io::Result<()> {
        writeln!(self.file, "0x{pc:x},0x{addr:x}")
    }
}

/// Per-device statistics (C3).
pub struct DeviceStats {
    /// Demand hits.
    pub hits: i64,
    /// Demand misses.
    pub misses: i64,
    /// Misses that were also first-ever touches of their block.
    pub compulsory_misses: i64,
    /// Hits credited up from descendants (§4.2.7).
    pub child_hits: i64,
    /// Invalidations this device issued because of inclusion enforcement.
    pub inclusive_invalidates: i64,
    /// Invalidations this device issued because of coherence.
    pub coherence_invalidates: i64,
    /// Hits on hardware-prefetched lines.
    pub prefetch_hits: i64,
    /// Misses on hardware-prefetch requests.
    pub prefetch_misses: i64,
    /// Flush operations handled.
    pub flushes: i64,
    hits_at_reset: i64,
    misses_at_reset: i64,
    child_hits_at_reset: i64,
    access_set: AccessCountSet,
    block_size: u64,
    miss_dump: Option<MissDumpSink>,
    /// Set to `false` if the miss-dump file could not be kept open; the run
    /// continues without a dump rather than failing (§7).
    pub dump_healthy: bool,
}

impl DeviceStats {
    /// Create a stats object for a device with the given block size and an
    /// optional miss-dump path.
    pub fn new(block_size: u32, miss_file: Option<&Path>) -> Result<Self, InitError> {
        let miss_dump = miss_file.map(MissDumpSink::open).transpose()?;
        Ok(Self {
            hits: 0,
            misses: 0,
            compulsory_misses: 0,
            child_hits: 0,
            inclusive_invalidates: 0,
            coherence_invalidates: 0,
            prefetch_hits: 0,
            prefetch_misses: 0,
            flushes: 0,
            hits_at_reset: 0,
            misses_at_reset: 0,
            child_hits_at_reset: 0,
            access_set: AccessCountSet::default(),
            block_size: u64::from(block_size),
            dump_healthy: miss_dump.is_some() || miss_file.is_none(),
            miss_dump,
        })
    }

    /// Record one sub-request's outcome (§4.4). `pc`/`addr` are the raw
    /// trace values (not block-aligned); alignment happens internally.
    pub fn access(&mut self, memref: &MemRef, hit: bool, pc: u64, addr: u64) {
        if memref.is_prefetch() {
            if hit {
                self.prefetch_hits += 1;
            } else {
                self.prefetch_misses += 1;
                if !memref.is_hardware_prefetch() {
                    self.dump_miss(pc, addr);
                }
            }
            return;
        }

        if hit {
            self.hits += 1;
            return;
        }

        self.misses += 1;
        let block_start = addr - (addr % self.block_size);
        if self.access_set.insert(block_start, self.block_size) {
            self.compulsory_misses += 1;
        }
        self.dump_miss(pc, addr);
    }

    fn dump_miss(&mut self, pc: u64, addr: u64) {
        if let Some(sink) = self.miss_dump.as_mut() {
            if sink.record(pc, addr).is_err() {
                self.dump_healthy = false;
                self.miss_dump = None;
            }
        }
    }

    /// Credit a hit to an ancestor (§4.2.7: propagated to *all* ancestors).
    pub fn child_hit(&mut self) {
        self.child_hits += 1;
    }

    /// Bump the invalidation counter matching `reason`.
    pub fn record_invalidate(&mut self, reason: super::device::InvalidateReason) {
        match reason {
            super::device::InvalidateReason::InclusionForced => self.inclusive_invalidates += 1,
            super::device::InvalidateReason::Coherence => self.coherence_invalidates += 1,
        }
    }

    /// Record a flush operation.
    pub fn record_flush(&mut self) {
        self.flushes += 1;
    }

    /// Snapshot current hit/miss/child-hit counts and zero the live counters
    /// (called once, at the warm-up/sim-window boundary).
    pub fn reset(&mut self) {
        self.hits_at_reset = self.hits;
        self.misses_at_reset = self.misses;
        self.child_hits_at_reset = self.child_hits;
        self.hits = 0;
        self.misses = 0;
        self.compulsory_misses = 0;
        self.child_hits = 0;
        self.inclusive_invalidates = 0;
        self.coherence_invalidates = 0;
        self.prefetch_hits = 0;
        self.prefetch_misses = 0;
        self.flushes = 0;
    }

    /// Look up a single named counter.
    #[must_use]
    pub fn metric(&self, name: MetricName) -> i64 {
        match name {
            MetricName::Hits => self.hits,
            MetricName::Misses => self.misses,
            MetricName::CompulsoryMisses => self.compulsory_misses,
            MetricName::ChildHits => self.child_hits,
            MetricName::InclusiveInvalidates => self.inclusive_invalidates,
            MetricName::CoherenceInvalidates => self.coherence_invalidates,
            MetricName::PrefetchHits => self.prefetch_hits,
            MetricName::PrefetchMisses => self.prefetch_misses,
            MetricName::Flushes => self.flushes,
        }
    }

    /// Local hit rate: `hits / (hits + misses)`, ignoring child hits.
    #[must_use]
    pub fn local_hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total hit rate including hits credited from children, when this
    /// device has any (grounded in `print_rates`'s local-vs-total split).
    #[must_use]
    pub fn total_hit_rate(&self) -> Option<f64> {
        if self.child_hits == 0 {
            return None;
        }
        let total = self.hits + self.misses + self.child_hits;
        Some((self.hits + self.child_hits) as f64 / total as f64)
    }
}

/// A handful of block-aligned addresses are kept distinct in tests via a
/// plain set, to cross-check `AccessCountSet`'s merged-interval bookkeeping.
#[cfg(test)]
pub(crate) fn brute_force_distinct(addrs: &[u64], block_size: u64) -> usize {
    addrs
        .iter()
        .map(|a| a - (a % block_size))
        .collect::<BTreeSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compulsory_miss_is_first_touch_only() {
        let mut set = AccessCountSet::default();
        assert!(set.insert(0, 64));
        assert!(!set.insert(0, 64));
        assert!(set.insert(64, 64));
        assert!(!set.insert(64, 64));
    }

    #[test]
    fn adjacent_inserts_merge() {
        let mut set = AccessCountSet::default();
        assert!(set.insert(128, 64));
        assert!(set.insert(0, 64));
        assert!(set.insert(64, 64));
        assert_eq!(set.starts, vec![0]);
        assert_eq!(set.ends, vec![192]);
    }

    #[test]
    fn matches_brute_force_on_scattered_addresses() {
        let addrs = [0u64, 64, 4096, 4160, 128, 4096, 8192];
        let mut set = AccessCountSet::default();
        let mut compulsory = 0;
        for &a in &addrs {
            let block_start = a - (a % 64);
            if set.insert(block_start, 64) {
                compulsory += 1;
            }
        }
        assert_eq!(compulsory, brute_force_distinct(&addrs, 64));
    }
}

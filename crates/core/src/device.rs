//! Caching device (C5): the generic set-associative container described by
//! §3/§4.2. A single `CachingDevice<K>` serves both plain caches (`K =
//! TagId`) and TLBs (`K = TlbKey`) — the redesign §9 calls for replacing the
//! teacher's `CachingDevice → Cache → CacheLRU/CacheFIFO` inheritance chain
//! with exactly this: one struct parameterized by a replacement-policy
//! capability and a key capability.
//!
//! Per-device bookkeeping (lookup, install, local invalidate, policy victim
//! selection) lives here. Operations that must reach across the hierarchy —
//! `request`, `invalidate` propagation, `flush`, eviction routing to parents
//! or the snoop filter — are orchestrated by [`crate::hierarchy::Hierarchy`],
//! which owns the arena of devices and therefore is the only place that can
//! borrow two devices (parent and child) at once (§9's arena-ownership note).

use std::collections::HashMap;
use std::path::Path;

use crate::block::{Block, DeviceKey, TagId};
use crate::error::InitError;
use crate::policy::{self, ReplacementPolicy};
use crate::prefetcher::Prefetcher;
use crate::stats::DeviceStats;

/// Stable, non-owning reference to a device inside a [`crate::hierarchy::Hierarchy`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub usize);

/// Stable reference to a TLB inside a [`crate::hierarchy::Hierarchy`]'s
/// separate, flat TLB arena. Kept distinct from [`DeviceHandle`] since TLBs
/// have no parent/child wiring and index a different array (§4.2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TlbHandle(pub usize);

/// Whether a device must, must not, or may overlap the tags held by its children.
///
/// Modeled as a tri-state enum (§9) specifically so a device cannot declare
/// itself both inclusive and exclusive, which two independent booleans would
/// have allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Inclusion {
    /// No inclusion relationship is enforced.
    #[default]
    NonInclusiveNonExclusive,
    /// Every tag held by any child is also held here.
    Inclusive,
    /// No tag held by any direct child is held here.
    Exclusive,
}

/// Why a line is being invalidated (§4.2.2); determines which stats counter
/// is bumped and how far the invalidation recurses into children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateReason {
    /// An inclusive parent evicted the line, forcing children to drop it.
    InclusionForced,
    /// The coherence protocol (snoop filter) is invalidating a sharer.
    Coherence,
}

/// Construction parameters for a single device, already validated by the
/// config reader or the knobs path.
pub struct DeviceSpec {
    /// Unique name within the hierarchy.
    pub name: String,
    /// Ways per set.
    pub associativity: u32,
    /// Line size in bytes (power of two, ≥ 4).
    pub block_size: u32,
    /// Total blocks (must be a multiple of `associativity`).
    pub num_blocks: u32,
    /// Inclusion relationship with this device's children.
    pub inclusion: Inclusion,
    /// Whether this device participates in coherence.
    pub coherent: bool,
    /// Replacement policy name (`"LRU"`, `"FIFO"`, `"LFU"`, `"BIT_PLRU"`).
    pub replace_policy: String,
    /// Prefetcher name (`"none"`, `"nextline"`), or `None` for no prefetcher.
    pub prefetcher: Option<String>,
    /// Optional miss-dump file path.
    pub miss_file: Option<std::path::PathBuf>,
    /// Whether to maintain the `tag_hash` fast-lookup table (§4.2.6).
    pub use_tag_hash: bool,
}

/// A set-associative caching device, generic over its lookup key (§4.2.5).
pub struct CachingDevice<K: DeviceKey> {
    /// Unique name within the hierarchy.
    pub name: String,
    associativity: u32,
    block_size: u32,
    num_sets: u32,
    blocks: Vec<Block<K>>,
    loaded_blocks: u32,
    /// Non-owning handle to this device's parent, if it is not an LLC/root.
    pub parent: Option<DeviceHandle>,
    /// Owned list of this device's children.
    pub children: Vec<DeviceHandle>,
    /// Inclusion relationship with `children`.
    pub inclusion: Inclusion,
    /// Whether this device is wired into the snoop filter.
    pub coherent: bool,
    /// This device's index in the snoop filter's cache array, if snooped.
    pub snoop_id: Option<usize>,
    policy: Box<dyn ReplacementPolicy>,
    /// Attached prefetcher, if any (never present on TLBs, §4.2.5).
    pub prefetcher: Option<Box<dyn Prefetcher>>,
    /// This device's owned stats object.
    pub stats: DeviceStats,
    tag_hash: Option<HashMap<K, (usize, usize)>>,
    last_key: Option<K>,
    last_set: usize,
    last_way: usize,
}

impl<K: DeviceKey> CachingDevice<K> {
    /// Build a device from a validated spec. `num_sets` is derived as
    /// `num_blocks / associativity`, which the caller must already have
    /// checked is a power of two (§3 invariant 1).
    pub fn new(spec: &DeviceSpec) -> Result<Self, InitError> {
        let num_sets = spec.num_blocks / spec.associativity;
        let policy = policy::by_name(
            &spec.replace_policy,
            num_sets as usize,
            spec.associativity as usize,
        )
        .unwrap_or_else(|| {
            // Config validation is expected to have already rejected unknown
            // policy names; fall back to LRU defensively rather than panic.
            Box::new(policy::LruPolicy::new(
                num_sets as usize,
                spec.associativity as usize,
            ))
        });
        let prefetcher = spec.prefetcher.as_deref().and_then(|name| {
            crate::prefetcher::by_name(name, spec.block_size, 1)
        });
        let stats = DeviceStats::new(spec.block_size, spec.miss_file.as_deref())?;
        let tag_hash = spec
            .use_tag_hash
            .then(|| HashMap::with_capacity(1 << 16));

        Ok(Self {
            name: spec.name.clone(),
            associativity: spec.associativity,
            block_size: spec.block_size,
            num_sets,
            blocks: vec![Block::empty(); spec.num_blocks as usize],
            loaded_blocks: 0,
            parent: None,
            children: Vec::new(),
            inclusion: spec.inclusion,
            coherent: spec.coherent,
            snoop_id: None,
            policy,
            prefetcher,
            stats,
            tag_hash,
            last_key: None,
            last_set: 0,
            last_way: 0,
        })
    }

    /// Line size in bytes.
    #[must_use]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Ways per set.
    #[must_use]
    pub const fn associativity(&self) -> u32 {
        self.associativity
    }

    /// Total block slots.
    #[must_use]
    pub fn num_blocks(&self) -> u32 {
        self.blocks.len() as u32
    }

    /// Fraction of blocks that have ever been filled (used for warm-up-by-fraction, §4.5).
    #[must_use]
    pub fn loaded_fraction(&self) -> f64 {
        f64::from(self.loaded_blocks) / f64::from(self.num_blocks().max(1))
    }

    /// Map a tag to its set index (`tag mod num_sets`, §3 invariant 2).
    #[must_use]
    pub fn set_of_tag(&self, tag: TagId) -> usize {
        (tag % u64::from(self.num_sets)) as usize
    }

    fn set_base(&self, set: usize) -> usize {
        set * self.associativity as usize
    }

    /// Locate `(set, way)` for `key`, via the tag-hash if enabled, else a
    /// linear scan of the owning set (§4.2.1 step 2).
    #[must_use]
    pub fn lookup(&self, key: K) -> Option<(usize, usize)> {
        if let Some(hash) = &self.tag_hash {
            return hash.get(&key).copied();
        }
        let set = self.set_of_tag(key.tag());
        let base = self.set_base(set);
        (0..self.associativity as usize)
            .find(|&way| self.blocks[base + way].key == key)
            .map(|way| (set, way))
    }

    /// Whether this device currently holds `key` (used by exclusive-cache
    /// and inclusive-cache bookkeeping to query children, §4.2.1 step 4).
    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.lookup(key).is_some()
    }

    /// Fast-path check: is `key` the remembered last access?
    #[must_use]
    pub fn is_last_access(&self, key: K) -> bool {
        self.last_key == Some(key)
    }

    /// Replay the fast path: record a hit against the remembered block and
    /// update policy for `(last_set, last_way)` (§4.2.1 step 1).
    pub fn hit_fast_path(&mut self) {
        let (set, way) = (self.last_set, self.last_way);
        let base = self.set_base(set);
        let mut meta_buf: Vec<_> = self.blocks[base..base + self.associativity as usize]
            .iter()
            .map(|b| b.meta)
            .collect();
        self.policy.on_hit(set, way, &mut meta_buf);
        self.write_back_meta(base, &meta_buf);
    }

    /// Choose a victim way for `set`: any invalid way first (§4.1), else
    /// delegate to the policy.
    pub fn choose_victim(&mut self, set: usize) -> usize {
        let base = self.set_base(set);
        if let Some(way) =
            policy::first_invalid_way(&self.blocks, base, self.associativity as usize)
        {
            return way;
        }
        let meta_buf: Vec<_> = self.blocks[base..base + self.associativity as usize]
            .iter()
            .map(|b| b.meta)
            .collect();
        self.policy.choose_victim(set, &meta_buf)
    }

    /// Read-only preview of `choose_victim` (for tests and diagnostics).
    #[must_use]
    pub fn preview_victim(&self, set: usize) -> usize {
        let base = self.set_base(set);
        if let Some(way) =
            policy::first_invalid_way(&self.blocks, base, self.associativity as usize)
        {
            return way;
        }
        let meta_buf: Vec<_> = self.blocks[base..base + self.associativity as usize]
            .iter()
            .map(|b| b.meta)
            .collect();
        self.policy.preview_victim(set, &meta_buf)
    }

    fn write_back_meta(&mut self, base: usize, meta_buf: &[crate::block::ReplacementMeta]) {
        for (i, m) in meta_buf.iter().enumerate() {
            self.blocks[base + i].meta = *m;
        }
    }

    /// Record a hit for `(set, way)` on a real (non-fast-path) lookup hit.
    pub fn record_hit_update(&mut self, set: usize, way: usize) {
        let base = self.set_base(set);
        let mut meta_buf: Vec<_> = self.blocks[base..base + self.associativity as usize]
            .iter()
            .map(|b| b.meta)
            .collect();
        self.policy.on_hit(set, way, &mut meta_buf);
        self.write_back_meta(base, &meta_buf);
        self.last_key = Some(self.blocks[base + way].key);
        self.last_set = set;
        self.last_way = way;
    }

    /// Install `key` into `(set, way)`, evicting whatever was there.
    /// Returns `(evicted_key, was_invalid)`.
    pub fn install(&mut self, set: usize, way: usize, key: K) -> (K, bool) {
        let base = self.set_base(set);
        let evicted = self.blocks[base + way].key;
        let was_invalid = !self.blocks[base + way].is_valid();

        if let Some(hash) = self.tag_hash.as_mut() {
            if !was_invalid {
                hash.remove(&evicted);
            }
            hash.insert(key, (set, way));
        }

        self.blocks[base + way].key = key;
        self.blocks[base + way].dirty = false;
        if was_invalid {
            self.loaded_blocks += 1;
        }

        let mut meta_buf: Vec<_> = self.blocks[base..base + self.associativity as usize]
            .iter()
            .map(|b| b.meta)
            .collect();
        self.policy.on_install(set, way, &mut meta_buf);
        self.write_back_meta(base, &meta_buf);

        self.last_key = Some(key);
        self.last_set = set;
        self.last_way = way;

        (evicted, was_invalid)
    }

    /// Mark `(set, way)` dirty (a coherent write that hit locally).
    pub fn mark_dirty(&mut self, set: usize, way: usize) {
        let base = self.set_base(set);
        self.blocks[base + way].dirty = true;
    }

    /// Whether `(set, way)` is currently dirty.
    #[must_use]
    pub fn is_dirty(&self, set: usize, way: usize) -> bool {
        let base = self.set_base(set);
        self.blocks[base + way].dirty
    }

    /// Clear a block (invalidate it) if `key` is present. Returns whether it
    /// was present. Also clears the fast-path cache if it matched (§9's
    /// "`last_tag` racing with invalidation" note).
    pub fn invalidate_local(&mut self, key: K) -> bool {
        let Some((set, way)) = self.lookup(key) else {
            return false;
        };
        let base = self.set_base(set);
        self.blocks[base + way] = Block::empty();
        if let Some(hash) = self.tag_hash.as_mut() {
            hash.remove(&key);
        }
        if self.last_key == Some(key) {
            self.last_key = None;
        }
        true
    }

    /// Clear the fast-path remembered key without touching the block array
    /// (used by `flush`, which always invalidates the remembered state).
    pub fn clear_fast_path(&mut self) {
        self.last_key = None;
    }

    /// All currently-valid keys, for invariant checks and inclusive/exclusive
    /// property tests.
    pub fn resident_keys(&self) -> impl Iterator<Item = K> + '_ {
        self.blocks.iter().filter(|b| b.is_valid()).map(|b| b.key)
    }
}

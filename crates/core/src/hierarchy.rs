//! Hierarchy driver (C7): owns every cache and TLB in an arena, wires
//! parent/child relationships by stable handle, and drives a trace of
//! memrefs through the right device (§4.5, §9's arena-ownership redesign).
//!
//! Grounded in the original tool's `cache_simulator_t`: the two construction
//! paths (knobs vs. config), the snoop-filter placement walk, the per-memref
//! dispatch switch, and the warm-up/skip/sim-refs windowing are all carried
//! over; only the storage model changes; from parent/child pointers owned by
//! each node to an arena of devices indexed by [`DeviceHandle`].

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::block::{AddressSpaceId, TagId, TlbKey};
use crate::config::{CacheKind, HierarchyConfig};
use crate::device::{CachingDevice, DeviceHandle, DeviceSpec, Inclusion, InvalidateReason, TlbHandle};
use crate::error::{BuildError, ConfigError, MetricError, UnhandledRecord};
use crate::memref::{MarkerKind, MemRef};
use crate::miss_analyzer::MissStrideAnalyzer;
use crate::snoop_filter::SnoopFilter;
use crate::stats::MetricName;

/// Which split of a core's L1 a metric query or dispatch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// Instruction-side L1.
    Instruction,
    /// Data-side L1.
    Data,
}

/// Windowing and scheduling knobs that don't belong to any one device (§4.5, §4.7).
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// References to unconditionally skip before any processing.
    pub skip_refs: u64,
    /// References processed before stats reset, unless `warmup_fraction` finishes sooner.
    pub warmup_refs: u64,
    /// Fraction of LLC capacity loaded at which warm-up is also considered complete.
    pub warmup_fraction: f64,
    /// References counted after warm-up before the run is considered finished.
    pub sim_refs: u64,
    /// Honor trace CPU-ID markers to rebind shards to cores.
    pub cpu_scheduling: bool,
    /// Bind each shard to a fixed core index instead of following markers.
    pub core_sharded: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            skip_refs: 0,
            warmup_refs: 0,
            warmup_fraction: 0.0,
            sim_refs: u64::MAX,
            cpu_scheduling: false,
            core_sharded: false,
        }
    }
}

struct WindowState {
    skip_remaining: u64,
    warming_up: bool,
    warmup_elapsed: u64,
    sim_remaining: u64,
}

/// The live simulator: every cache/TLB device, the snoop filter, and the
/// windowing/dispatch state that drives a trace through them.
pub struct Hierarchy {
    caches: Vec<CachingDevice<TagId>>,
    tlbs: Vec<CachingDevice<TlbKey>>,
    tlb_by_core: Vec<Option<TlbHandle>>,
    snoop_filter: Option<SnoopFilter>,
    snoop_members: Vec<DeviceHandle>,
    l1i: Vec<DeviceHandle>,
    l1d: Vec<DeviceHandle>,
    llcs: Vec<DeviceHandle>,
    miss_analyzer: Option<(DeviceHandle, MissStrideAnalyzer)>,
    thread_core: HashMap<u64, usize>,
    driver: DriverConfig,
    window: WindowState,
}

impl Hierarchy {
    /// Build a simple hierarchy: one LLC, per-core private L1I/L1D, optional
    /// next-line prefetcher on L1D, optional coherence across L1s (§4.5 "Knobs").
    pub fn from_knobs(
        num_cores: u32,
        l1_size: u32,
        l1_assoc: u32,
        llc_size: u32,
        llc_assoc: u32,
        line_size: u32,
        l1d_prefetch: bool,
        model_coherence: bool,
        driver: DriverConfig,
    ) -> Result<Self, BuildError> {
        let mut caches = Vec::new();
        let mut l1i = Vec::new();
        let mut l1d = Vec::new();

        let llc_handle = DeviceHandle(0);
        let llc_spec = DeviceSpec {
            name: "LLC".to_string(),
            associativity: llc_assoc,
            block_size: line_size,
            num_blocks: llc_size / line_size,
            inclusion: Inclusion::NonInclusiveNonExclusive,
            coherent: false,
            replace_policy: "LRU".to_string(),
            prefetcher: None,
            miss_file: None,
            use_tag_hash: num_cores >= 32,
        };
        caches.push(CachingDevice::new(&llc_spec).map_err(BuildError::Init)?);

        for core in 0..num_cores {
            let i_spec = DeviceSpec {
                name: format!("L1I-{core}"),
                associativity: l1_assoc,
                block_size: line_size,
                num_blocks: l1_size / line_size,
                inclusion: Inclusion::NonInclusiveNonExclusive,
                coherent: false,
                replace_policy: "LRU".to_string(),
                prefetcher: None,
                miss_file: None,
                use_tag_hash: false,
            };
            let mut dev = CachingDevice::new(&i_spec).map_err(BuildError::Init)?;
            dev.parent = Some(llc_handle);
            let handle = DeviceHandle(caches.len());
            caches.push(dev);
            caches[llc_handle.0].children.push(handle);
            l1i.push(handle);

            let d_spec = DeviceSpec {
                name: format!("L1D-{core}"),
                associativity: l1_assoc,
                block_size: line_size,
                num_blocks: l1_size / line_size,
                inclusion: Inclusion::NonInclusiveNonExclusive,
                coherent: model_coherence,
                replace_policy: "LRU".to_string(),
                prefetcher: l1d_prefetch.then(|| "nextline".to_string()),
                miss_file: None,
                use_tag_hash: false,
            };
            let mut dev = CachingDevice::new(&d_spec).map_err(BuildError::Init)?;
            dev.parent = Some(llc_handle);
            let handle = DeviceHandle(caches.len());
            caches.push(dev);
            caches[llc_handle.0].children.push(handle);
            l1d.push(handle);
        }

        let (snoop_filter, snoop_members) = if model_coherence {
            let mut members = l1d.clone();
            let filter = SnoopFilter::new(members.len());
            for (id, &handle) in members.iter().enumerate() {
                caches[handle.0].snoop_id = Some(id);
            }
            members.sort();
            (Some(filter), members)
        } else {
            (None, Vec::new())
        };

        info!(cores = num_cores, coherence = model_coherence, "built knobs-based hierarchy");

        Ok(Self {
            caches,
            tlbs: Vec::new(),
            tlb_by_core: vec![None; num_cores as usize],
            snoop_filter,
            snoop_members,
            l1i,
            l1d,
            llcs: vec![llc_handle],
            miss_analyzer: None,
            thread_core: HashMap::new(),
            driver: driver.clone(),
            window: WindowState {
                skip_remaining: driver.skip_refs,
                warming_up: driver.warmup_refs > 0 || driver.warmup_fraction > 0.0,
                warmup_elapsed: 0,
                sim_remaining: driver.sim_refs,
            },
        })
    }

    /// Build an arbitrary topology from a parsed, pre-validated config (§4.7).
    pub fn from_config(config: &HierarchyConfig, driver: DriverConfig) -> Result<Self, BuildError> {
        let mut caches = Vec::new();
        let mut handle_of: HashMap<String, DeviceHandle> = HashMap::new();
        let mut l1i = vec![None; config.num_cores as usize];
        let mut l1d = vec![None; config.num_cores as usize];
        let mut llcs = Vec::new();

        let use_tag_hash = config.caches.len() > 2
            && (config.model_coherence || config.num_cores >= 32);

        let (tlb_blocks, cache_blocks): (Vec<_>, Vec<_>) = config
            .caches
            .iter()
            .partition(|block| block.kind == CacheKind::Tlb);

        let mut tlbs = Vec::new();
        let mut tlb_by_core = vec![None; config.num_cores as usize];
        for block in tlb_blocks {
            let spec = DeviceSpec {
                name: block.name.clone(),
                associativity: block.assoc,
                block_size: config.line_size,
                num_blocks: block.size / config.line_size,
                inclusion: Inclusion::NonInclusiveNonExclusive,
                coherent: false,
                replace_policy: block.replace_policy.clone(),
                prefetcher: None,
                miss_file: block.miss_file.clone(),
                use_tag_hash: false,
            };
            let device = CachingDevice::new(&spec).map_err(BuildError::Init)?;
            let handle = TlbHandle(tlbs.len());
            tlbs.push(device);
            if let Some(core) = block.core {
                tlb_by_core[core as usize] = Some(handle);
            }
        }

        for block in cache_blocks {
            let spec = DeviceSpec {
                name: block.name.clone(),
                associativity: block.assoc,
                block_size: config.line_size,
                num_blocks: block.size / config.line_size,
                inclusion: block.inclusion,
                coherent: config.model_coherence && block.parent.is_some(),
                replace_policy: block.replace_policy.clone(),
                prefetcher: block.prefetcher.clone(),
                miss_file: block.miss_file.clone(),
                use_tag_hash,
            };
            let device = CachingDevice::new(&spec).map_err(BuildError::Init)?;
            let handle = DeviceHandle(caches.len());
            caches.push(device);
            handle_of.insert(block.name.clone(), handle);
        }

        for block in &config.caches {
            if block.kind == CacheKind::Tlb {
                continue;
            }
            let handle = handle_of[&block.name];
            match block.parent.as_deref() {
                Some("memory") | None => llcs.push(handle),
                Some(parent_name) => {
                    let parent = *handle_of
                        .get(parent_name)
                        .ok_or_else(|| ConfigError::OrphanParent {
                            cache: block.name.clone(),
                            parent: parent_name.to_string(),
                        })
                        .map_err(BuildError::Config)?;
                    caches[handle.0].parent = Some(parent);
                    caches[parent.0].children.push(handle);
                }
            }
            if let Some(core) = block.core {
                match block.kind {
                    CacheKind::Instruction => l1i[core as usize] = Some(handle),
                    CacheKind::Data | CacheKind::Unified => l1d[core as usize] = Some(handle),
                }
            }
        }

        let l1i: Vec<DeviceHandle> = l1i.into_iter().flatten().collect();
        let l1d: Vec<DeviceHandle> = l1d.into_iter().flatten().collect();

        let (snoop_filter, snoop_members) = if config.model_coherence {
            Self::place_snoop_filter(&mut caches, &llcs)
        } else {
            (None, Vec::new())
        };

        info!(
            caches = caches.len(),
            llcs = llcs.len(),
            coherence = config.model_coherence,
            "built config-based hierarchy"
        );

        Ok(Self {
            caches,
            tlbs,
            tlb_by_core,
            snoop_filter,
            snoop_members,
            l1i,
            l1d,
            llcs,
            miss_analyzer: None,
            thread_core: HashMap::new(),
            driver: driver.clone(),
            window: WindowState {
                skip_remaining: driver.skip_refs,
                warming_up: driver.warmup_refs > 0 || driver.warmup_fraction > 0.0,
                warmup_elapsed: 0,
                sim_remaining: driver.sim_refs,
            },
        })
    }

    /// Walk down from each LLC while every node has exactly one child; the
    /// first node reached with ≥ 2 children has its children snooped.
    /// Multiple LLCs: the LLCs themselves are the snooped set (§4.3).
    fn place_snoop_filter(
        caches: &mut [CachingDevice<TagId>],
        llcs: &[DeviceHandle],
    ) -> (Option<SnoopFilter>, Vec<DeviceHandle>) {
        let members = if llcs.len() > 1 {
            llcs.to_vec()
        } else if let Some(&root) = llcs.first() {
            let mut node = root;
            loop {
                let children = caches[node.0].children.clone();
                if children.len() == 1 {
                    node = children[0];
                    continue;
                }
                break children;
            }
        } else {
            Vec::new()
        };

        if members.is_empty() {
            return (None, Vec::new());
        }

        let filter = SnoopFilter::new(members.len());
        for (id, &handle) in members.iter().enumerate() {
            caches[handle.0].snoop_id = Some(id);
            caches[handle.0].coherent = true;
        }
        (Some(filter), members)
    }

    /// Attach a miss-stride analyzer to `llc` (there must be exactly one LLC
    /// for this to be meaningful, per §4.6).
    pub fn attach_miss_analyzer(&mut self, analyzer: MissStrideAnalyzer) {
        if let Some(&llc) = self.llcs.first() {
            self.miss_analyzer = Some((llc, analyzer));
        }
    }

    // ---- per-memref driver loop (§4.5) ----

    /// Feed one memref through the hierarchy. Returns `Ok(false)` once the
    /// sim-refs window has been exhausted (the caller should stop feeding
    /// records); `Err` only for a genuinely unroutable record type.
    pub fn process_memref(&mut self, memref: &MemRef) -> Result<bool, UnhandledRecord> {
        if self.window.skip_remaining > 0 {
            self.window.skip_remaining -= 1;
            return Ok(true);
        }
        if !self.window.warming_up && self.window.sim_remaining == 0 {
            return Ok(false);
        }

        if let MemRef::Marker { kind, value } = memref {
            if *kind == MarkerKind::CpuId {
                self.thread_core.clear();
                debug!(cpu_id = value, "cpu-id marker: reset thread->core map");
            }
            return Ok(self.advance_window());
        }

        let Some(tid) = memref.tid() else {
            if matches!(memref, MemRef::InstrNoFetch) {
                return Ok(self.advance_window());
            }
            return Err(UnhandledRecord {
                discriminant: memref.discriminant(),
            });
        };

        let core = self.core_for_thread(tid);

        match memref {
            MemRef::InstrFetch { .. } | MemRef::InstrPrefetch { .. } => {
                if let Some(tlb) = self.tlb(core) {
                    self.request_tlb(tlb, memref);
                }
                if let Some(&handle) = self.l1i.get(core) {
                    self.request(handle, memref);
                }
            }
            MemRef::Read { .. } | MemRef::Write { .. } | MemRef::DataPrefetch { .. } => {
                if let Some(tlb) = self.tlb(core) {
                    self.request_tlb(tlb, memref);
                }
                if let Some(&handle) = self.l1d.get(core) {
                    self.request(handle, memref);
                }
            }
            MemRef::InstrFlush { .. } => {
                if let Some(&handle) = self.l1i.get(core) {
                    self.flush(handle, memref);
                }
            }
            MemRef::DataFlush { .. } => {
                if let Some(&handle) = self.l1d.get(core) {
                    self.flush(handle, memref);
                }
            }
            MemRef::ThreadExit { tid } => {
                self.thread_core.remove(tid);
            }
            MemRef::HardwarePrefetch { .. } | MemRef::InstrNoFetch | MemRef::Marker { .. } => {}
        }

        Ok(self.advance_window())
    }

    fn core_for_thread(&mut self, tid: u64) -> usize {
        if let Some(&core) = self.thread_core.get(&tid) {
            return core;
        }
        let core = if self.driver.core_sharded {
            0
        } else {
            self.thread_core.len() % self.l1i.len().max(1)
        };
        self.thread_core.insert(tid, core);
        core
    }

    fn advance_window(&mut self) -> bool {
        if self.window.warming_up {
            self.window.warmup_elapsed += 1;
            let by_refs =
                self.driver.warmup_refs > 0 && self.window.warmup_elapsed >= self.driver.warmup_refs;
            let by_fraction = self.driver.warmup_fraction > 0.0
                && self
                    .llcs
                    .iter()
                    .all(|&h| self.caches[h.0].loaded_fraction() >= self.driver.warmup_fraction);
            if by_refs || by_fraction {
                for cache in &mut self.caches {
                    cache.stats.reset();
                }
                for tlb in &mut self.tlbs {
                    tlb.stats.reset();
                }
                self.window.warming_up = false;
                info!("warm-up complete, stats reset");
            }
        } else if self.window.sim_remaining > 0 {
            self.window.sim_remaining -= 1;
        }
        self.window.warming_up || self.window.sim_remaining > 0
    }

    // ---- core device operations (§4.2) ----

    /// Dispatch `memref` into the device at `handle`, decomposed into one
    /// sub-request per touched tag (§4.2.1).
    pub fn request(&mut self, handle: DeviceHandle, memref: &MemRef) {
        self.request_with_mode(handle, memref, false);
    }

    /// Forward `memref` to `handle` as a pure pass-through probe: an
    /// exclusive device must not install or evict on a demand miss reaching
    /// it this way, and must give up its own copy on a hit once it has
    /// satisfied the request (§4.2.4(b)).
    fn request_passthrough(&mut self, handle: DeviceHandle, memref: &MemRef) {
        self.request_with_mode(handle, memref, true);
    }

    fn request_with_mode(&mut self, handle: DeviceHandle, memref: &MemRef, passthrough: bool) {
        let Some((addr, size)) = memref.addr_size() else {
            return;
        };
        let block_size = u64::from(self.caches[handle.0].block_size());
        let is_write = memref.is_write();
        let is_prefetch = memref.is_prefetch();
        let is_hw_prefetch = memref.is_hardware_prefetch();
        let pc = match memref {
            MemRef::InstrFetch { pc, .. }
            | MemRef::Read { pc, .. }
            | MemRef::Write { pc, .. }
            | MemRef::InstrPrefetch { pc, .. }
            | MemRef::DataPrefetch { pc, .. }
            | MemRef::HardwarePrefetch { pc, .. } => *pc,
            _ => addr,
        };

        let first_tag = addr / block_size;
        let last_tag = (addr + u64::from(size).saturating_sub(1)) / block_size;
        for tag in first_tag..=last_tag {
            self.request_one_tag(
                handle, memref, pc, addr, tag, is_write, is_prefetch, is_hw_prefetch, passthrough,
            );
        }
    }

    /// Drive one translation through a TLB (§4.2.5): a flat lookup keyed on
    /// `(page tag, asid)`, with no parent forwarding, no prefetcher, and no
    /// coherence involvement. Every reference is treated as a single page
    /// translation regardless of byte size, since a memref's address never
    /// straddles a page the way it can straddle a cache line.
    ///
    /// The driver has no per-address-space notion today (memrefs carry no
    /// asid), so every translation is looked up under asid 0 — equivalent to
    /// modeling a single address space. See the design notes for why this
    /// was judged an acceptable scope cut rather than a gap.
    pub fn request_tlb(&mut self, handle: TlbHandle, memref: &MemRef) {
        let Some((addr, _size)) = memref.addr_size() else {
            return;
        };
        const ASID: AddressSpaceId = 0;

        let tlb = &mut self.tlbs[handle.0];
        let page_tag = addr / u64::from(tlb.block_size());
        let key = TlbKey { tag: page_tag, asid: ASID };

        if let Some((set, way)) = tlb.lookup(key) {
            tlb.record_hit_update(set, way);
            tlb.stats.access(memref, true, addr, addr);
            return;
        }

        tlb.stats.access(memref, false, addr, addr);
        let set = tlb.set_of_tag(page_tag);
        let way = tlb.choose_victim(set);
        let _ = tlb.install(set, way, key);
    }

    #[allow(clippy::too_many_arguments)]
    fn request_one_tag(
        &mut self,
        handle: DeviceHandle,
        memref: &MemRef,
        pc: u64,
        addr: u64,
        tag: TagId,
        is_write: bool,
        is_prefetch: bool,
        is_hw_prefetch: bool,
        passthrough: bool,
    ) {
        if !is_write && !passthrough && self.caches[handle.0].is_last_access(tag) {
            self.caches[handle.0].hit_fast_path();
            self.caches[handle.0].stats.access(memref, true, pc, addr);
            self.propagate_child_hit(handle);
            return;
        }

        if let Some((set, way)) = self.caches[handle.0].lookup(tag) {
            self.caches[handle.0].record_hit_update(set, way);
            self.caches[handle.0].stats.access(memref, true, pc, addr);
            if is_write {
                self.handle_coherent_write(handle, tag, set, way);
            }
            self.propagate_child_hit(handle);
            if passthrough {
                self.caches[handle.0].invalidate_local(tag);
            }
            return;
        }

        self.caches[handle.0].stats.access(memref, false, pc, addr);

        if passthrough {
            // An exclusive parent never installs on a demand miss passing
            // through it; only a child's eviction ever fills it.
            if let Some(parent) = self.caches[handle.0].parent {
                self.request_passthrough(parent, memref);
            }
            return;
        }

        let set = self.caches[handle.0].set_of_tag(tag);
        let way = self.caches[handle.0].choose_victim(set);

        if let Some(parent) = self.caches[handle.0].parent {
            if self.caches[parent.0].inclusion == Inclusion::Exclusive {
                self.request_passthrough(parent, memref);
            } else {
                self.request(parent, memref);
            }
        }

        if self.caches[handle.0].coherent {
            if let Some(filter) = self.snoop_filter.as_mut() {
                if let Some(id) = self.caches[handle.0].snoop_id {
                    let outcome = filter.snoop(tag, id, is_write);
                    for other_id in outcome.invalidate {
                        self.invalidate_by_snoop_id(other_id, tag);
                    }
                }
            }
        }

        let (evicted, was_invalid) = self.caches[handle.0].install(set, way, tag);
        if !was_invalid {
            self.handle_eviction(handle, evicted);
        }

        if self.llcs.contains(&handle) && !is_write && !is_prefetch {
            if let Some((analyzer_handle, analyzer)) = self.miss_analyzer.as_mut() {
                if *analyzer_handle == handle {
                    analyzer.record_miss(pc, addr);
                }
            }
        }

        if !is_prefetch {
            let block_size = u64::from(self.caches[handle.0].block_size());
            let follow_ups = self
                .caches[handle.0]
                .prefetcher
                .as_mut()
                .map(|pf| pf.on_miss(addr))
                .unwrap_or_default();
            for follow_addr in follow_ups {
                let synth = MemRef::HardwarePrefetch {
                    pc,
                    addr: follow_addr,
                    size: block_size as u32,
                };
                self.request(handle, &synth);
            }
        }
    }

    fn handle_coherent_write(&mut self, handle: DeviceHandle, tag: TagId, set: usize, way: usize) {
        if self.caches[handle.0].coherent {
            if let Some(filter) = self.snoop_filter.as_mut() {
                if let Some(id) = self.caches[handle.0].snoop_id {
                    let outcome = filter.snoop(tag, id, true);
                    self.caches[handle.0].mark_dirty(set, way);
                    for other_id in outcome.invalidate {
                        self.invalidate_by_snoop_id(other_id, tag);
                    }
                    return;
                }
            }
        }
        if let Some(parent) = self.caches[handle.0].parent {
            self.request(
                parent,
                &MemRef::Write {
                    tid: 0,
                    pc: 0,
                    addr: tag * u64::from(self.caches[handle.0].block_size()),
                    size: self.caches[handle.0].block_size(),
                },
            );
        }
    }

    fn invalidate_by_snoop_id(&mut self, snoop_id: usize, tag: TagId) {
        if let Some(&handle) = self.snoop_members.get(snoop_id) {
            self.invalidate(handle, tag, InvalidateReason::Coherence);
        }
    }

    /// Handle the displaced tag from an eviction at `handle` (§4.2.1 step 4,
    /// §4.2.4 exclusive-cache fill).
    fn handle_eviction(&mut self, handle: DeviceHandle, evicted: TagId) {
        match self.caches[handle.0].inclusion {
            Inclusion::Inclusive => {
                let children = self.caches[handle.0].children.clone();
                for child in children {
                    self.invalidate(child, evicted, InvalidateReason::InclusionForced);
                }
            }
            Inclusion::Exclusive | Inclusion::NonInclusiveNonExclusive => {
                if self.caches[handle.0].coherent {
                    let still_held = self
                        .caches[handle.0]
                        .children
                        .clone()
                        .iter()
                        .any(|&c| self.caches[c.0].contains(evicted));
                    if !still_held {
                        if let Some(filter) = self.snoop_filter.as_mut() {
                            if let Some(id) = self.caches[handle.0].snoop_id {
                                filter.snoop_eviction(evicted, id);
                            }
                        } else if let Some(parent) = self.caches[handle.0].parent {
                            if self.caches[parent.0].inclusion != Inclusion::Exclusive {
                                self.request(
                                    parent,
                                    &MemRef::HardwarePrefetch {
                                        pc: 0,
                                        addr: evicted * u64::from(self.caches[handle.0].block_size()),
                                        size: self.caches[handle.0].block_size(),
                                    },
                                );
                            }
                        }
                    }
                }
            }
        }

        // An exclusive parent receives its fill only via a child's eviction,
        // never via a pass-through demand miss (§4.2.4).
        if let Some(parent) = self.caches[handle.0].parent {
            if self.caches[parent.0].inclusion == Inclusion::Exclusive {
                let block_size = u64::from(self.caches[handle.0].block_size());
                self.request(
                    parent,
                    &MemRef::HardwarePrefetch {
                        pc: 0,
                        addr: evicted * block_size,
                        size: block_size as u32,
                    },
                );
            }
        }
    }

    fn propagate_child_hit(&mut self, handle: DeviceHandle) {
        let mut ancestor = self.caches[handle.0].parent;
        while let Some(h) = ancestor {
            self.caches[h.0].stats.child_hit();
            ancestor = self.caches[h.0].parent;
        }
    }

    /// Invalidate `tag` at `handle`, recursing into children per `reason`'s
    /// rules (§4.2.2).
    pub fn invalidate(&mut self, handle: DeviceHandle, tag: TagId, reason: InvalidateReason) {
        let present = self.caches[handle.0].invalidate_local(tag);
        if !present {
            return;
        }
        self.caches[handle.0].stats.record_invalidate(reason);

        let recurse = match reason {
            InvalidateReason::InclusionForced => {
                self.caches[handle.0].inclusion == Inclusion::Inclusive
            }
            InvalidateReason::Coherence => true,
        };
        if recurse {
            let children = self.caches[handle.0].children.clone();
            for child in children {
                self.invalidate(child, tag, reason);
            }
        }
    }

    /// Handle an explicit flush memref (§4.2.3).
    pub fn flush(&mut self, handle: DeviceHandle, memref: &MemRef) {
        let Some((addr, size)) = memref.addr_size() else {
            return;
        };
        let block_size = u64::from(self.caches[handle.0].block_size());
        let first_tag = addr / block_size;
        let last_tag = (addr + u64::from(size).saturating_sub(1)) / block_size;
        for tag in first_tag..=last_tag {
            if self.caches[handle.0].invalidate_local(tag) {
                // Not an inclusion/coherence invalidation: no counter, no recursion.
            }
        }
        self.caches[handle.0].clear_fast_path();
        self.caches[handle.0].stats.record_flush();
        if let Some(parent) = self.caches[handle.0].parent {
            self.flush(parent, memref);
        }
    }

    // ---- metric query (§4.5, §6) ----

    /// `get_cache_metric(metric, level, core, split)`: walk `level - 1`
    /// parents from the requested L1 and read the named counter there.
    #[must_use]
    pub fn get_cache_metric(&self, metric: MetricName, level: u32, core: usize, split: Split) -> i64 {
        let roots = match split {
            Split::Instruction => &self.l1i,
            Split::Data => &self.l1d,
        };
        let Some(&handle) = roots.get(core) else {
            return MetricError::WrongCore.sentinel();
        };

        let mut current = handle;
        for _ in 0..level.saturating_sub(1) {
            match self.caches[current.0].parent {
                Some(parent) => current = parent,
                None => return MetricError::WrongLevel.sentinel(),
            }
        }
        self.caches[current.0].stats.metric(metric)
    }

    /// Finalize the attached miss analyzer, if any, returning its recommendations.
    pub fn finalize_miss_analyzer(&mut self) -> Vec<crate::miss_analyzer::Recommendation> {
        self.miss_analyzer
            .as_mut()
            .map(|(_, analyzer)| analyzer.finalize())
            .unwrap_or_default()
    }

    /// Human-readable report, ordered like the original: per-core L1 stats,
    /// non-L1/non-LLC caches, LLC(s), then snoop-filter stats.
    pub fn print_results(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();

        for (core, &handle) in self.l1i.iter().enumerate() {
            let _ = writeln!(out, "--- core {core} L1I: {} ---", self.caches[handle.0].name);
            self.write_device_report(&mut out, handle);
        }
        for (core, &handle) in self.l1d.iter().enumerate() {
            let _ = writeln!(out, "--- core {core} L1D: {} ---", self.caches[handle.0].name);
            self.write_device_report(&mut out, handle);
        }
        for (i, cache) in self.caches.iter().enumerate() {
            let handle = DeviceHandle(i);
            if !self.l1i.contains(&handle) && !self.l1d.contains(&handle) && !self.llcs.contains(&handle) {
                let _ = writeln!(out, "--- {} ---", cache.name);
                self.write_device_report(&mut out, handle);
            }
        }
        for &handle in &self.llcs {
            let _ = writeln!(out, "--- {} ---", self.caches[handle.0].name);
            self.write_device_report(&mut out, handle);
        }

        for (core, tlb) in self.tlb_by_core.iter().enumerate() {
            if let Some(handle) = tlb {
                let t = &self.tlbs[handle.0];
                let _ = writeln!(
                    out,
                    "--- core {core} TLB: {} --- hits={} misses={}",
                    t.name, t.stats.hits, t.stats.misses
                );
            }
        }

        if let Some(filter) = &self.snoop_filter {
            let s = filter.stats();
            let _ = writeln!(
                out,
                "--- snoop filter --- writes={} writebacks={} invalidates={}",
                s.writes, s.writebacks, s.invalidates
            );
        }

        out
    }

    fn write_device_report(&self, out: &mut String, handle: DeviceHandle) {
        use std::fmt::Write as _;
        let cache = &self.caches[handle.0];
        let _ = writeln!(
            out,
            "blocks={} assoc={} block_size={} hits={} misses={} compulsory={} local_rate={:.4}",
            cache.num_blocks(),
            cache.associativity(),
            cache.block_size(),
            cache.stats.hits,
            cache.stats.misses,
            cache.stats.compulsory_misses,
            cache.stats.local_hit_rate()
        );
        if let Some(total) = cache.stats.total_hit_rate() {
            let _ = writeln!(out, "total_rate={total:.4}");
        }
        if !cache.stats.dump_healthy {
            warn!(cache = %cache.name, "miss dump stopped writing mid-run");
        }
    }

    /// Read-only access to a cache device, for invariant tests.
    #[must_use]
    pub fn cache(&self, handle: DeviceHandle) -> &CachingDevice<TagId> {
        &self.caches[handle.0]
    }

    /// Every LLC handle.
    #[must_use]
    pub fn llcs(&self) -> &[DeviceHandle] {
        &self.llcs
    }

    /// The L1 instruction cache serving `core`, if one was built.
    #[must_use]
    pub fn l1i(&self, core: usize) -> Option<DeviceHandle> {
        self.l1i.get(core).copied()
    }

    /// The L1 data cache serving `core`, if one was built.
    #[must_use]
    pub fn l1d(&self, core: usize) -> Option<DeviceHandle> {
        self.l1d.get(core).copied()
    }

    /// The TLB serving `core`, if one was configured.
    #[must_use]
    pub fn tlb(&self, core: usize) -> Option<TlbHandle> {
        self.tlb_by_core.get(core).copied().flatten()
    }

    /// Read-only access to a TLB device, for invariant tests.
    #[must_use]
    pub fn tlb_device(&self, handle: TlbHandle) -> &CachingDevice<TlbKey> {
        &self.tlbs[handle.0]
    }

    /// The shared snoop filter, if coherence is modeled.
    #[must_use]
    pub fn snoop_filter(&self) -> Option<&SnoopFilter> {
        self.snoop_filter.as_ref()
    }
}

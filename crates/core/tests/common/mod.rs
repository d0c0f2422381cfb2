//! Shared builders for the scenario tests: a bare single device (no parent,
//! no hierarchy) and the tiny knobs-based hierarchies the seed scenarios
//! exercise.

use cachesim_core::{CachingDevice, DeviceSpec, Inclusion, TagId};

/// Build a standalone cache with one set (`num_blocks == associativity`) and
/// no prefetcher/miss-file, for directly driving the replacement policy.
pub fn single_set_cache(associativity: u32, replace_policy: &str) -> CachingDevice<TagId> {
    let spec = DeviceSpec {
        name: "under-test".to_string(),
        associativity,
        block_size: 32,
        num_blocks: associativity,
        inclusion: Inclusion::NonInclusiveNonExclusive,
        coherent: false,
        replace_policy: replace_policy.to_string(),
        prefetcher: None,
        miss_file: None,
        use_tag_hash: false,
    };
    CachingDevice::new(&spec).expect("valid spec")
}

/// Access `tag` at `cache`, returning `(hit, way)`. Mirrors the lookup/install
/// sequence `Hierarchy::request_one_tag` performs for a single device with no
/// parent and no coherence.
pub fn access(cache: &mut CachingDevice<TagId>, tag: TagId) -> (bool, usize) {
    if let Some((set, way)) = cache.lookup(tag) {
        cache.record_hit_update(set, way);
        (true, way)
    } else {
        let set = cache.set_of_tag(tag);
        let way = cache.choose_victim(set);
        cache.install(set, way, tag);
        (false, way)
    }
}

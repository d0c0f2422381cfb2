//! Replacement policies: per-set victim selection and hit bookkeeping.
//!
//! Grounded in the teacher's `core::units::cache::policies` module (same
//! trait shape: `update`/`get_victim`), generalized to the four policies this
//! spec names and to the "always prefer an invalid way first" rule shared by
//! all of them (§4.1), which the policy trait does not see directly —
//! `CachingDevice` checks for an invalid way itself before ever calling
//! `replace_which_way`.

mod bit_plru;
mod fifo;
mod lfu;
mod lru;

pub use bit_plru::BitPlruPolicy;
pub use fifo::FifoPolicy;
pub use lfu::LfuPolicy;
pub use lru::LruPolicy;

use crate::block::ReplacementMeta;

/// Per-device replacement policy. Implementations own one `Vec`-of-per-set
/// state sized at construction and never shared across devices (§4.1).
///
/// The device, not the policy, is responsible for preferring an invalid way
/// over calling [`ReplacementPolicy::choose_victim`] (§4.1's "must first pick
/// any invalid way" rule applies uniformly to all four policies, so it lives
/// once in `CachingDevice` rather than being duplicated in each impl).
/// [`ReplacementPolicy::on_install`] is called for *every* install, though —
/// both the compulsory fill of an invalid way and a real eviction — since a
/// fresh line always needs its policy bookkeeping initialized the same way an
/// access would.
pub trait ReplacementPolicy: Send + Sync {
    /// Record a hit at `(set, way)`.
    fn on_hit(&mut self, set: usize, way: usize, meta: &mut [ReplacementMeta]);

    /// Record that `(set, way)` was just filled with a new line, whether the
    /// way was previously invalid or just evicted.
    fn on_install(&mut self, set: usize, way: usize, meta: &mut [ReplacementMeta]);

    /// Choose a victim among the (already known to be all-valid) ways of `set`.
    /// Read-only: any state change happens in the following `on_install` call.
    fn choose_victim(&mut self, set: usize, meta: &[ReplacementMeta]) -> usize;

    /// Read-only preview of which way `choose_victim` would currently pick,
    /// without mutating policy state. Equal to `choose_victim`'s result as
    /// long as no other access intervenes.
    fn preview_victim(&self, set: usize, meta: &[ReplacementMeta]) -> usize;
}

/// Construct a boxed policy for `name`, or `None` if unrecognized (caller
/// turns that into `ConfigError::UnknownPolicy`).
#[must_use]
pub fn by_name(
    name: &str,
    num_sets: usize,
    associativity: usize,
) -> Option<Box<dyn ReplacementPolicy>> {
    match name {
        "LRU" => Some(Box::new(LruPolicy::new(num_sets, associativity))),
        "FIFO" => Some(Box::new(FifoPolicy::new(num_sets, associativity))),
        "LFU" => Some(Box::new(LfuPolicy::new(num_sets, associativity))),
        "BIT_PLRU" => Some(Box::new(BitPlruPolicy::new(
            num_sets,
            associativity,
            0xDEAD_BEEF,
        ))),
        _ => None,
    }
}

/// Find the lowest-indexed invalid way in a set, if any. The device consults
/// this before ever calling into the policy for a victim (§4.1).
#[must_use]
pub fn first_invalid_way<K: crate::block::DeviceKey>(
    blocks: &[crate::block::Block<K>],
    set_base: usize,
    associativity: usize,
) -> Option<usize> {
    (0..associativity).find(|&way| !blocks[set_base + way].is_valid())
}

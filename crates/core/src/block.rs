//! Cache line storage: tags, replacement metadata, and the key capability
//! that lets [`crate::device::CachingDevice`] serve both plain caches and TLBs.

/// A block-aligned address: `addr / block_size`, computed by the owning device.
pub type TagId = u64;

/// Sentinel meaning "this block holds no line".
pub const TAG_INVALID: TagId = u64::MAX;

/// Address-space identifier carried by TLB blocks; absent for cache blocks.
pub type AddressSpaceId = u32;

/// The lookup key a device's blocks are indexed by. Plain caches key on the
/// tag alone; TLBs key on `(tag, asid)`. Implementations must be cheap,
/// `Copy` values so the device's hot path never allocates.
pub trait DeviceKey: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    /// The invalid/sentinel value stored in empty blocks.
    const INVALID: Self;

    /// The tag component, used for set-index computation.
    fn tag(&self) -> TagId;

    /// Whether this key is the empty-block sentinel.
    fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

impl DeviceKey for TagId {
    const INVALID: Self = TAG_INVALID;

    fn tag(&self) -> TagId {
        *self
    }
}

/// `(tag, asid)` key used by TLB devices (see spec §4.2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlbKey {
    /// Block-aligned virtual page tag.
    pub tag: TagId,
    /// Address-space id this translation belongs to.
    pub asid: AddressSpaceId,
}

impl DeviceKey for TlbKey {
    const INVALID: Self = Self {
        tag: TAG_INVALID,
        asid: u32::MAX,
    };

    fn tag(&self) -> TagId {
        self.tag
    }
}

/// Per-way replacement-policy metadata. Each policy interprets the field(s)
/// it cares about and ignores the rest; see `policy` module.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplacementMeta {
    /// LRU recency counter, or FIFO next-victim marker (0/1), or LFU access
    /// count, depending on which policy owns this device.
    pub counter: u64,
    /// Bit-PLRU "recently used" bit.
    pub plru_bit: bool,
}

/// One cache line slot.
#[derive(Debug, Clone, Copy)]
pub struct Block<K: DeviceKey> {
    /// The key currently occupying this slot, or `K::INVALID` if empty.
    pub key: K,
    /// Replacement-policy bookkeeping for this way.
    pub meta: ReplacementMeta,
    /// Whether this line has been written since it was installed.
    pub dirty: bool,
}

impl<K: DeviceKey> Block<K> {
    /// An empty block.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            key: K::INVALID,
            meta: ReplacementMeta::default(),
            dirty: false,
        }
    }

    /// Whether this slot currently holds a valid line.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.key.is_invalid()
    }
}

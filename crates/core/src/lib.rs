//! Core of a trace-driven hardware cache and TLB hierarchy simulator.
//!
//! Consumes a stream of architectural memory references and models their
//! interaction with a configurable hierarchy of set-associative caching
//! devices, reporting hit/miss rates, coherence events, compulsory-miss
//! counts, and last-level-cache miss-stride prefetch recommendations.
//!
//! This crate never parses a trace file or a config file path itself — see
//! [`config`] for the declarative topology language and the `cli` crate for
//! the binary wrapper that reads trace files from disk.

pub mod block;
pub mod config;
pub mod device;
pub mod error;
pub mod hierarchy;
pub mod memref;
pub mod miss_analyzer;
pub mod policy;
pub mod prefetcher;
pub mod snoop_filter;
pub mod stats;
pub mod trace;

pub use block::{AddressSpaceId, Block, DeviceKey, TagId, TlbKey, TAG_INVALID};
pub use config::{CacheBlock, CacheKind, HierarchyConfig};
pub use device::{CachingDevice, DeviceHandle, DeviceSpec, Inclusion, InvalidateReason, TlbHandle};
pub use error::{BuildError, ConfigError, InitError, MetricError, UnhandledRecord};
pub use hierarchy::{DriverConfig, Hierarchy, Split};
pub use memref::{MarkerKind, MemRef};
pub use miss_analyzer::{AnalyzerConfig, Locality, MissStrideAnalyzer, Recommendation};
pub use snoop_filter::{SnoopFilter, SnoopStats};
pub use stats::{DeviceStats, MetricName};
pub use trace::TraceStream;

//! Error taxonomy for hierarchy construction, config parsing, and trace dispatch.
//!
//! Construction-time failures (`ConfigError`, `InitError`) are returned to the
//! caller and abort hierarchy creation. Per-memref failures (`UnhandledRecord`)
//! abort the run. `MetricError` never escapes as a `Result` at the metric-query
//! boundary; it is the typed form backing the negative sentinels returned by
//! `get_cache_metric`.

use thiserror::Error;

/// Failures raised while parsing or validating a cache topology.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A cache block referenced a `parent` name that does not exist.
    #[error("cache '{cache}' names unknown parent '{parent}'")]
    OrphanParent {
        /// Name of the cache whose parent is missing.
        cache: String,
        /// The unresolved parent name.
        parent: String,
    },

    /// Two cache blocks declared the same name.
    #[error("duplicate cache name '{0}'")]
    DuplicateName(String),

    /// The parent graph contains a cycle instead of forming a forest rooted at memory.
    #[error("cache hierarchy contains a cycle through '{0}'")]
    Cycle(String),

    /// `size / assoc` was not a power of two, or `size` was not a multiple of the line size.
    #[error("cache '{cache}' has invalid shape: size={size}, assoc={assoc}, line_size={line_size}")]
    BadShape {
        /// Offending cache name.
        cache: String,
        /// Declared size in bytes.
        size: u64,
        /// Declared associativity.
        assoc: u32,
        /// Hierarchy-wide line size in bytes.
        line_size: u32,
    },

    /// An L1 cache (`core >= 0`) named a core index outside `[0, num_cores)`.
    #[error("cache '{cache}' names core {core} but num_cores is {num_cores}")]
    BadCore {
        /// Offending cache name.
        cache: String,
        /// The declared core index.
        core: i64,
        /// Configured number of cores.
        num_cores: u32,
    },

    /// A cache declared both `inclusive` and `exclusive`.
    #[error("cache '{0}' declares both inclusive and exclusive")]
    ConflictingInclusion(String),

    /// A `replace_policy` value was not one of the recognized names.
    #[error("cache '{cache}' names unknown replacement policy '{policy}'")]
    UnknownPolicy {
        /// Offending cache name.
        cache: String,
        /// The unrecognized policy token.
        policy: String,
    },

    /// A `prefetcher` value was not one of the recognized names.
    #[error("cache '{cache}' names unknown prefetcher '{prefetcher}'")]
    UnknownPrefetcher {
        /// Offending cache name.
        cache: String,
        /// The unrecognized prefetcher token.
        prefetcher: String,
    },

    /// A line of the config file could not be parsed at all.
    #[error("malformed config at line {line}: {detail}")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// Human-readable description of what went wrong.
        detail: String,
    },
}

/// Failures raised while acquiring a resource during hierarchy construction.
#[derive(Debug, Error)]
pub enum InitError {
    /// A miss-dump or recommendation file could not be opened for writing.
    #[error("failed to open '{path}' for writing: {source}")]
    UnwritableFile {
        /// The path that could not be opened.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration was internally consistent but combined knobs that conflict
    /// (e.g. CPU-scheduling together with core-sharded mode).
    #[error("conflicting simulator knobs: {0}")]
    ConflictingKnobs(String),
}

/// A memref type reached the dispatcher with no routing rule.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unhandled memref record type: {discriminant}")]
pub struct UnhandledRecord {
    /// Opaque discriminant of the offending record, for diagnostics.
    pub discriminant: u32,
}

/// Negative-sentinel error kinds for the metric query API (see `get_cache_metric`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricError {
    /// The requested core index does not exist.
    WrongCore,
    /// Fewer than `level` ancestors exist above the requested L1.
    WrongLevel,
    /// The resolved device has no stats object (should not happen in practice).
    NoStats,
}

impl MetricError {
    /// The negative sentinel value returned by `get_cache_metric` for this error.
    #[must_use]
    pub const fn sentinel(self) -> i64 {
        match self {
            Self::WrongCore => -1,
            Self::WrongLevel => -2,
            Self::NoStats => -3,
        }
    }
}

/// Top-level error returned from hierarchy construction.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Config parsing or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Resource acquisition failed.
    #[error(transparent)]
    Init(#[from] InitError),
}

//! Miss-stride analyzer (C9): attached to an LLC, records `(pc, addr)` for
//! every read miss and, at termination, recommends software prefetches for
//! PCs with a dominant constant stride. Grounded in the original tool's
//! `cache_miss_analyzer_t`.

use std::io::Write;
use std::path::Path;

use crate::error::InitError;

/// Prefetch locality hint, mirroring the two values the original analyzer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    /// Non-temporal: the line is not expected to be reused.
    Nta,
    /// Temporal, lowest level: the line is expected to be reused soon.
    T0,
}

impl Locality {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Nta => "nta",
            Self::T0 => "t0",
        }
    }
}

/// One emitted recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recommendation {
    /// The load instruction this recommendation is for.
    pub pc: u64,
    /// Byte stride between consecutive misses at `pc`.
    pub stride: i64,
    /// Suggested locality hint.
    pub locality: Locality,
}

/// Tunables controlling when a PC's miss history is considered confident
/// enough to recommend a prefetch (§4.6).
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    /// Absolute minimum miss count for a PC to be considered.
    pub miss_count_threshold_abs: u64,
    /// Fraction of total misses a PC must reach, whichever threshold is lower.
    pub miss_frac_threshold: f64,
    /// Fraction of a PC's stride observations that must agree for a
    /// recommendation to be emitted.
    pub confidence_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            miss_count_threshold_abs: 50,
            miss_frac_threshold: 0.01,
            confidence_threshold: 0.8,
        }
    }
}

#[derive(Default)]
struct PcHistory {
    last_addr: Option<u64>,
    stride_counts: std::collections::HashMap<i64, u64>,
    total_strides: u64,
    miss_count: u64,
}

/// Accumulates per-PC miss history for one LLC and derives stride recommendations.
pub struct MissStrideAnalyzer {
    config: AnalyzerConfig,
    block_size: u64,
    per_pc: std::collections::HashMap<u64, PcHistory>,
    total_misses: u64,
    recommendation_file: Option<std::fs::File>,
}

impl MissStrideAnalyzer {
    /// Build an analyzer for a device with the given line size, optionally
    /// also writing recommendations to a CSV file.
    pub fn new(
        block_size: u32,
        config: AnalyzerConfig,
        csv_path: Option<&Path>,
    ) -> Result<Self, InitError> {
        let recommendation_file = csv_path
            .map(|path| {
                std::fs::File::create(path).map_err(|source| InitError::UnwritableFile {
                    path: path.display().to_string(),
                    source,
                })
            })
            .transpose()?;
        Ok(Self {
            config,
            block_size: u64::from(block_size),
            per_pc: std::collections::HashMap::new(),
            total_misses: 0,
            recommendation_file,
        })
    }

    /// Record one LLC read miss.
    pub fn record_miss(&mut self, pc: u64, addr: u64) {
        let block_aligned = addr - (addr % self.block_size);
        self.total_misses += 1;
        let history = self.per_pc.entry(pc).or_default();
        history.miss_count += 1;
        if let Some(last) = history.last_addr {
            let stride = block_aligned as i64 - last as i64;
            if stride != 0 {
                *history.stride_counts.entry(stride).or_insert(0) += 1;
                history.total_strides += 1;
            }
        }
        history.last_addr = Some(block_aligned);
    }

    /// Compute recommendations from the accumulated history and, if a CSV
    /// path was given, write them there. Always returns the in-memory list
    /// so the caller can also print a human-readable summary to stderr (§4.6 step 3).
    pub fn finalize(&mut self) -> Vec<Recommendation> {
        let threshold = (self.config.miss_count_threshold_abs as f64)
            .min(self.config.miss_frac_threshold * self.total_misses as f64)
            .max(1.0) as u64;

        let mut recommendations: Vec<Recommendation> = self
            .per_pc
            .iter()
            .filter(|(_, h)| h.miss_count >= threshold && h.total_strides > 0)
            .filter_map(|(&pc, h)| {
                let (&dominant_stride, &count) =
                    h.stride_counts.iter().max_by_key(|(_, &count)| count)?;
                let confidence = count as f64 / h.total_strides as f64;
                (confidence >= self.config.confidence_threshold).then_some(Recommendation {
                    pc,
                    stride: dominant_stride,
                    locality: Locality::Nta,
                })
            })
            .collect();
        recommendations.sort_by_key(|r| r.pc);

        if let Some(file) = self.recommendation_file.as_mut() {
            for r in &recommendations {
                let _ = writeln!(
                    file,
                    "0x{:x},{},{}",
                    r.pc,
                    r.stride,
                    r.locality.as_str()
                );
            }
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_stride_is_recommended() {
        let mut analyzer = MissStrideAnalyzer::new(64, AnalyzerConfig::default(), None).unwrap();
        for i in 0..60u64 {
            analyzer.record_miss(0x1000, i * 64 * 4);
        }
        let recs = analyzer.finalize();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pc, 0x1000);
        assert_eq!(recs[0].stride, 64 * 4);
        assert_eq!(recs[0].locality, Locality::Nta);
    }

    #[test]
    fn random_strides_produce_no_recommendation() {
        let mut analyzer = MissStrideAnalyzer::new(64, AnalyzerConfig::default(), None).unwrap();
        let mut addr = 0u64;
        for i in 0..60u64 {
            addr += 64 * (1 + i % 7);
            analyzer.record_miss(0x2000, addr);
        }
        assert!(analyzer.finalize().is_empty());
    }

    #[test]
    fn distinct_pcs_yield_distinct_recommendations() {
        let mut analyzer = MissStrideAnalyzer::new(64, AnalyzerConfig::default(), None).unwrap();
        for i in 0..60u64 {
            analyzer.record_miss(0x1000, i * 64);
            analyzer.record_miss(0x2000, i * 128);
        }
        let recs = analyzer.finalize();
        assert_eq!(recs.len(), 2);
    }
}

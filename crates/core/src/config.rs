//! Config reader (C8): parses the line-oriented declarative topology file
//! into validated cache-parameter records (§4.7). Grounded in the original
//! tool's `config_reader_t`: top-level `key value` options followed by
//! `NAME { key value ... }` cache blocks, `#`-comments to end of line.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::device::Inclusion;
use crate::error::ConfigError;
use crate::hierarchy::DriverConfig;

/// Which side of the memory hierarchy a cache block serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Instruction-only.
    Instruction,
    /// Data-only.
    Data,
    /// Both instruction and data traffic.
    Unified,
    /// A TLB keyed by `(tag, asid)` rather than tag alone (§4.2.5). Never
    /// has a parent, a prefetcher, or takes part in coherence.
    Tlb,
}

/// One parsed `NAME { ... }` cache block, not yet cross-validated against
/// its siblings.
#[derive(Debug, Clone)]
pub struct CacheBlock {
    /// Unique name within the file.
    pub name: String,
    /// Instruction/data/unified.
    pub kind: CacheKind,
    /// Core index, for L1s only.
    pub core: Option<u32>,
    /// Total size in bytes.
    pub size: u32,
    /// Ways per set.
    pub assoc: u32,
    /// Inclusion relationship with this cache's children.
    pub inclusion: Inclusion,
    /// Parent cache name, or `None`/`"memory"` for an LLC.
    pub parent: Option<String>,
    /// Replacement policy name.
    pub replace_policy: String,
    /// Prefetcher name, if any (`"none"` is normalized to `None`).
    pub prefetcher: Option<String>,
    /// Optional miss-dump path.
    pub miss_file: Option<PathBuf>,
}

/// A fully parsed and validated topology, ready to build a [`crate::hierarchy::Hierarchy`].
#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    /// Number of core slots.
    pub num_cores: u32,
    /// Uniform line size across every cache.
    pub line_size: u32,
    /// Whether to remap addresses through a virtual→physical service.
    pub use_physical: bool,
    /// Whether to build a snoop filter.
    pub model_coherence: bool,
    /// Log verbosity knob, forwarded to `tracing`.
    pub verbose: u32,
    /// Windowing and scheduling knobs.
    pub driver: DriverConfig,
    /// Every cache block, in file order.
    pub caches: Vec<CacheBlock>,
}

struct Parser<'a> {
    lines: std::str::Lines<'a>,
    line_no: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            line_no: 0,
        }
    }

    /// Next non-blank, non-comment-only line, with trailing `#...` stripped.
    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        loop {
            let raw = self.lines.next()?;
            self.line_no += 1;
            let stripped = raw.split('#').next().unwrap_or("").trim();
            if !stripped.is_empty() {
                return Some((self.line_no, stripped));
            }
        }
    }
}

/// Parse `text` into a [`HierarchyConfig`], with full cross-block validation
/// (§4.7's bullet list). Defaults match the table in §4.7.
pub fn parse(text: &str) -> Result<HierarchyConfig, ConfigError> {
    let mut num_cores = 1u32;
    let mut line_size = 64u32;
    let mut use_physical = false;
    let mut model_coherence = false;
    let mut verbose = 0u32;
    let mut driver = DriverConfig::default();
    let mut caches = Vec::new();

    let mut parser = Parser::new(text);
    while let Some((line_no, line)) = parser.next_line() {
        if let Some(rest) = line.strip_suffix('{') {
            let name = rest.trim().to_string();
            let block = parse_block(&mut parser, &name)?;
            caches.push(block);
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        let syntax_err = |detail: String| ConfigError::Syntax { line: line_no, detail };

        match key {
            "num_cores" => num_cores = parse_u32(value).map_err(|e| syntax_err(e))?,
            "line_size" => line_size = parse_size(value).map_err(|e| syntax_err(e))? as u32,
            "skip_refs" => driver.skip_refs = parse_u64(value).map_err(|e| syntax_err(e))?,
            "warmup_refs" => driver.warmup_refs = parse_u64(value).map_err(|e| syntax_err(e))?,
            "sim_refs" => driver.sim_refs = parse_u64(value).map_err(|e| syntax_err(e))?,
            "warmup_fraction" => {
                driver.warmup_fraction = value
                    .parse::<f64>()
                    .map_err(|_| syntax_err(format!("not a float: '{value}'")))?;
            }
            "cpu_scheduling" => driver.cpu_scheduling = parse_bool(value).map_err(|e| syntax_err(e))?,
            "use_physical" => use_physical = parse_bool(value).map_err(|e| syntax_err(e))?,
            "model_coherence" => model_coherence = parse_bool(value).map_err(|e| syntax_err(e))?,
            "verbose" => verbose = parse_u32(value).map_err(|e| syntax_err(e))?,
            other => {
                return Err(syntax_err(format!("unrecognized top-level option '{other}'")));
            }
        }
    }

    validate(&caches, num_cores, line_size)?;

    Ok(HierarchyConfig {
        num_cores,
        line_size,
        use_physical,
        model_coherence,
        verbose,
        driver,
        caches,
    })
}

fn parse_block(parser: &mut Parser<'_>, name: &str) -> Result<CacheBlock, ConfigError> {
    let mut kind = CacheKind::Unified;
    let mut core = None;
    let mut size = None;
    let mut assoc = None;
    let mut inclusive = false;
    let mut exclusive = false;
    let mut parent = None;
    let mut replace_policy = "LRU".to_string();
    let mut prefetcher = None;
    let mut miss_file = None;

    loop {
        let (line_no, line) = parser
            .next_line()
            .ok_or_else(|| ConfigError::Syntax {
                line: parser.line_no,
                detail: format!("unterminated block '{name}'"),
            })?;
        if line == "}" {
            break;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        let syntax_err = |detail: String| ConfigError::Syntax { line: line_no, detail };

        match key {
            "type" => {
                kind = match value {
                    "instruction" => CacheKind::Instruction,
                    "data" => CacheKind::Data,
                    "unified" => CacheKind::Unified,
                    "tlb" => CacheKind::Tlb,
                    other => return Err(syntax_err(format!("unknown cache type '{other}'"))),
                };
            }
            "core" => core = Some(parse_u32(value).map_err(|e| syntax_err(e))?),
            "size" => size = Some(parse_size(value).map_err(|e| syntax_err(e))?),
            "assoc" => assoc = Some(parse_u32(value).map_err(|e| syntax_err(e))?),
            "inclusive" => inclusive = parse_bool(value).map_err(|e| syntax_err(e))?,
            "exclusive" => exclusive = parse_bool(value).map_err(|e| syntax_err(e))?,
            "parent" => parent = Some(value.to_string()),
            "replace_policy" => replace_policy = value.to_string(),
            "prefetcher" => {
                prefetcher = if value == "none" { None } else { Some(value.to_string()) };
            }
            "miss_file" => miss_file = Some(PathBuf::from(value)),
            other => return Err(syntax_err(format!("unknown cache key '{other}'"))),
        }
    }

    if inclusive && exclusive {
        return Err(ConfigError::ConflictingInclusion(name.to_string()));
    }
    let inclusion = if inclusive {
        Inclusion::Inclusive
    } else if exclusive {
        Inclusion::Exclusive
    } else {
        Inclusion::NonInclusiveNonExclusive
    };

    Ok(CacheBlock {
        name: name.to_string(),
        kind,
        core,
        size: size.unwrap_or(32 * 1024),
        assoc: assoc.unwrap_or(8),
        inclusion,
        parent,
        replace_policy,
        prefetcher,
        miss_file,
    })
}

fn validate(caches: &[CacheBlock], num_cores: u32, line_size: u32) -> Result<(), ConfigError> {
    const KNOWN_POLICIES: &[&str] = &["LRU", "LFU", "FIFO", "BIT_PLRU"];

    let mut seen = HashSet::new();
    for block in caches {
        if !seen.insert(block.name.clone()) {
            return Err(ConfigError::DuplicateName(block.name.clone()));
        }
    }

    let names: HashSet<&str> = caches.iter().map(|c| c.name.as_str()).collect();
    for block in caches {
        if let Some(parent) = &block.parent {
            if parent != "memory" && !names.contains(parent.as_str()) {
                return Err(ConfigError::OrphanParent {
                    cache: block.name.clone(),
                    parent: parent.clone(),
                });
            }
        }

        if let Some(core) = block.core {
            if core >= num_cores {
                return Err(ConfigError::BadCore {
                    cache: block.name.clone(),
                    core: i64::from(core),
                    num_cores,
                });
            }
        }

        if block.size % line_size != 0 || !(block.size / block.assoc.max(1)).is_power_of_two() {
            return Err(ConfigError::BadShape {
                cache: block.name.clone(),
                size: u64::from(block.size),
                assoc: block.assoc,
                line_size,
            });
        }

        if !KNOWN_POLICIES.contains(&block.replace_policy.as_str()) {
            return Err(ConfigError::UnknownPolicy {
                cache: block.name.clone(),
                policy: block.replace_policy.clone(),
            });
        }

        if let Some(pf) = &block.prefetcher {
            if pf != "nextline" && pf != "custom" {
                return Err(ConfigError::UnknownPrefetcher {
                    cache: block.name.clone(),
                    prefetcher: pf.clone(),
                });
            }
        }
    }

    detect_cycle(caches)?;
    Ok(())
}

fn detect_cycle(caches: &[CacheBlock]) -> Result<(), ConfigError> {
    let index_of: std::collections::HashMap<&str, usize> =
        caches.iter().enumerate().map(|(i, c)| (c.name.as_str(), i)).collect();

    for start in caches {
        let mut seen = HashSet::new();
        let mut current = start.parent.as_deref();
        seen.insert(start.name.as_str());
        while let Some(name) = current {
            if name == "memory" {
                break;
            }
            if !seen.insert(name) {
                return Err(ConfigError::Cycle(start.name.clone()));
            }
            current = index_of.get(name).and_then(|&i| caches[i].parent.as_deref());
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("not a bool: '{other}'")),
    }
}

fn parse_u32(value: &str) -> Result<u32, String> {
    value.parse().map_err(|_| format!("not an integer: '{value}'"))
}

fn parse_u64(value: &str) -> Result<u64, String> {
    value.parse().map_err(|_| format!("not an integer: '{value}'"))
}

/// Parse a byte count with an optional `K`/`M`/`G` suffix (§4.7).
fn parse_size(value: &str) -> Result<u32, String> {
    let (digits, multiplier) = match value.chars().last() {
        Some('K' | 'k') => (&value[..value.len() - 1], 1024),
        Some('M' | 'm') => (&value[..value.len() - 1], 1024 * 1024),
        Some('G' | 'g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    let base: u32 = digits.parse().map_err(|_| format!("not a size: '{value}'"))?;
    Ok(base * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_two_level_hierarchy() {
        let text = r#"
            num_cores 1
            line_size 64
            model_coherence false

            L1D {
                type data
                core 0
                size 32K
                assoc 8
                parent LLC
            }

            LLC {
                type unified
                size 1M
                assoc 16
                parent memory
            }
        "#;
        let config = parse(text).unwrap();
        assert_eq!(config.num_cores, 1);
        assert_eq!(config.caches.len(), 2);
        assert_eq!(config.caches[0].size, 32 * 1024);
    }

    #[test]
    fn orphan_parent_is_rejected() {
        let text = "L1D {\n type data\n core 0\n size 32K\n assoc 8\n parent GHOST\n}";
        assert!(matches!(parse(text), Err(ConfigError::OrphanParent { .. })));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = "A {\n size 32K\n assoc 8\n parent memory\n}\nA {\n size 64K\n assoc 8\n parent memory\n}";
        assert!(matches!(parse(text), Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn non_power_of_two_set_count_is_rejected() {
        let text = "L1D {\n size 90K\n assoc 3\n parent memory\n}";
        assert!(matches!(parse(text), Err(ConfigError::BadShape { .. })));
    }

    #[test]
    fn conflicting_inclusion_is_rejected() {
        let text = "L1D {\n size 32K\n assoc 8\n inclusive true\n exclusive true\n parent memory\n}";
        assert!(matches!(parse(text), Err(ConfigError::ConflictingInclusion(_))));
    }
}

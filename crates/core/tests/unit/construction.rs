//! Hierarchy-construction error paths: the checks that `Hierarchy::from_knobs`
//! and `Hierarchy::from_config` perform on top of what `config::parse` itself
//! already validates.

use std::path::PathBuf;

use cachesim_core::config::{self, CacheBlock, CacheKind, HierarchyConfig};
use cachesim_core::{BuildError, DriverConfig, Hierarchy, Inclusion, MemRef};

#[test]
fn from_knobs_builds_expected_topology() {
    let h = Hierarchy::from_knobs(2, 1024, 2, 8192, 8, 64, false, true, DriverConfig::default())
        .expect("valid knobs");

    assert_eq!(h.llcs().len(), 1);
    assert!(h.l1i(0).is_some());
    assert!(h.l1d(0).is_some());
    assert!(h.l1i(1).is_some());
    assert!(h.l1d(1).is_some());
    assert!(h.l1i(2).is_none());
    assert!(h.snoop_filter().is_some(), "model_coherence=true should place a filter");
}

#[test]
fn from_knobs_without_coherence_has_no_snoop_filter() {
    let h = Hierarchy::from_knobs(1, 1024, 2, 8192, 8, 64, false, false, DriverConfig::default())
        .expect("valid knobs");
    assert!(h.snoop_filter().is_none());
}

#[test]
fn from_config_writes_miss_file_to_a_real_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = base_config();
    config.caches[0].miss_file = Some(dir.path().join("llc-misses.csv"));

    let _h = Hierarchy::from_config(&config, DriverConfig::default()).expect("valid config");
    assert!(dir.path().join("llc-misses.csv").exists());
}

#[test]
fn from_config_rejects_unwritable_miss_file() {
    let mut config = base_config();
    config.caches[0].miss_file = Some(PathBuf::from("/nonexistent-dir-for-test/misses.csv"));

    let err = Hierarchy::from_config(&config, DriverConfig::default())
        .expect_err("unwritable miss_file path should fail");
    assert!(matches!(err, BuildError::Init(_)));
}

#[test]
fn from_config_rejects_orphan_parent_bypassing_parse_validation() {
    // `config::parse` would already reject this, but `from_config` takes a
    // `HierarchyConfig` directly, so it must re-check the parent graph itself
    // rather than trusting every caller to have gone through `parse`.
    let mut config = base_config();
    config.caches[0].parent = Some("GHOST".to_string());

    let err = Hierarchy::from_config(&config, DriverConfig::default())
        .expect_err("orphan parent should fail even via the direct HierarchyConfig path");
    assert!(matches!(
        err,
        BuildError::Config(cachesim_core::ConfigError::OrphanParent { .. })
    ));
}

#[test]
fn from_config_places_llc_and_core_slots() {
    let config = base_config();
    let h = Hierarchy::from_config(&config, DriverConfig::default()).expect("valid config");
    assert_eq!(h.llcs().len(), 1);
    assert!(h.l1d(0).is_some());
}

#[test]
fn parse_rejects_unrecognized_top_level_option() {
    let text = "not_a_real_option 1\n";
    assert!(matches!(
        config::parse(text),
        Err(cachesim_core::ConfigError::Syntax { .. })
    ));
}

#[test]
fn parse_rejects_unterminated_block() {
    let text = "LLC {\n size 1M\n assoc 8\n";
    assert!(matches!(
        config::parse(text),
        Err(cachesim_core::ConfigError::Syntax { .. })
    ));
}

#[test]
fn parse_rejects_bad_core_index() {
    let text = "num_cores 1\nL1D {\n type data\n core 5\n size 32K\n assoc 8\n parent memory\n}\n";
    assert!(matches!(
        config::parse(text),
        Err(cachesim_core::ConfigError::BadCore { .. })
    ));
}

#[test]
fn tlb_block_is_built_as_a_flat_device_outside_the_cache_arena() {
    let config = config::parse(
        "num_cores 1\n\
         line_size 64\n\
         DTLB {\n\
         type tlb\n\
         core 0\n\
         size 256\n\
         assoc 4\n\
         replace_policy LFU\n\
         }\n\
         LLC {\n\
         type unified\n\
         size 1024\n\
         assoc 8\n\
         parent memory\n\
         }\n",
    )
    .expect("valid config");
    let mut h = Hierarchy::from_config(&config, DriverConfig::default()).expect("valid hierarchy");
    let tlb = h.tlb(0).expect("core 0 has a TLB");

    // First touch of a page is a compulsory miss; touching the same page
    // again is a hit; a TLB never forwards to a parent or an LLC.
    let page_a = MemRef::Read { tid: 0, pc: 0, addr: 0, size: 8 };
    let page_b = MemRef::Read { tid: 0, pc: 0, addr: 4096, size: 8 };

    h.request_tlb(tlb, &page_a);
    h.request_tlb(tlb, &page_a);
    h.request_tlb(tlb, &page_b);

    let stats = &h.tlb_device(tlb).stats;
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 1);
}

fn base_config() -> HierarchyConfig {
    HierarchyConfig {
        num_cores: 1,
        line_size: 64,
        use_physical: false,
        model_coherence: false,
        verbose: 0,
        driver: DriverConfig::default(),
        caches: vec![CacheBlock {
            name: "LLC".to_string(),
            kind: CacheKind::Unified,
            core: Some(0),
            size: 1024,
            assoc: 8,
            inclusion: Inclusion::NonInclusiveNonExclusive,
            parent: None,
            replace_policy: "LRU".to_string(),
            prefetcher: None,
            miss_file: None,
        }],
    }
}

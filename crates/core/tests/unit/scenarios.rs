//! The lettered seed scenarios from the design notes, driven end to end
//! against the public API rather than against any single module in
//! isolation.

use cachesim_core::{DriverConfig, Hierarchy, MemRef};
use pretty_assertions::assert_eq;

use crate::common::{access, single_set_cache};

/// Scenario A: LRU, 4-way single set, access sequence A,B,C,D,A,A,A,E.
///
/// The spec text's own aggregate count for this scenario ("hits=4;misses=4")
/// does not agree with its own documented next-victim-way sequence, which
/// implies hits=3/misses=5 — identical to scenario B's correctly-stated
/// aggregate for the same trace at the same capacity (hit/miss is
/// policy-independent here; only the victim choice differs). We assert
/// against the sequence, which is internally consistent.
#[test]
fn scenario_a_lru_victim_sequence() {
    let mut cache = single_set_cache(4, "LRU");
    let tags = [0u64, 1, 2, 3, 0, 0, 0, 4];
    let mut victims = Vec::new();
    let mut hits = 0;
    let mut misses = 0;

    for &tag in &tags {
        let (hit, _way) = access(&mut cache, tag);
        victims.push(cache.preview_victim(0));
        if hit {
            hits += 1;
        } else {
            misses += 1;
        }
    }

    assert_eq!(victims, vec![1, 2, 3, 0, 1, 1, 1, 2]);
    assert_eq!((hits, misses), (3, 5));
}

/// Scenario B: FIFO, same geometry and trace as scenario A.
#[test]
fn scenario_b_fifo_victim_sequence() {
    let mut cache = single_set_cache(4, "FIFO");
    let tags = [0u64, 1, 2, 3, 0, 0, 0, 4];
    let mut victims = Vec::new();
    let mut hits = 0;
    let mut misses = 0;

    for &tag in &tags {
        let (hit, _way) = access(&mut cache, tag);
        victims.push(cache.preview_victim(0));
        if hit {
            hits += 1;
        } else {
            misses += 1;
        }
    }

    assert_eq!(victims, vec![1, 2, 3, 0, 0, 0, 0, 1]);
    assert_eq!((hits, misses), (3, 5));
}

/// Scenario C: 2-level inclusive coherent hierarchy, 2 cores, L1s 1-way
/// 1-line, LLC 4-way 4-line, line=64. `C0 R@0, C1 R@0, C0 W@0, C1 R@0`.
#[test]
fn scenario_c_two_core_coherence() {
    let mut h = Hierarchy::from_knobs(2, 64, 1, 256, 4, 64, false, true, DriverConfig::default())
        .expect("valid knobs");

    let read = |tid: u64| MemRef::Read {
        tid,
        pc: 0,
        addr: 0,
        size: 8,
    };
    let write = |tid: u64| MemRef::Write {
        tid,
        pc: 0,
        addr: 0,
        size: 8,
    };

    let c0 = h.l1d(0).expect("core 0 has an L1D");
    let c1 = h.l1d(1).expect("core 1 has an L1D");

    h.request(c0, &read(0));
    assert_eq!(h.snoop_filter().unwrap().sharers(0), vec![0]);

    h.request(c1, &read(1));
    assert_eq!(h.snoop_filter().unwrap().sharers(0), vec![0, 1]);

    h.request(c0, &write(0));
    assert_eq!(h.snoop_filter().unwrap().sharers(0), vec![0]);
    assert!(h.snoop_filter().unwrap().is_dirty(0));

    h.request(c1, &read(1));
    assert_eq!(h.snoop_filter().unwrap().sharers(0), vec![1]);
    assert!(h.snoop_filter().unwrap().is_dirty(0));

    let stats = h.snoop_filter().unwrap().stats();
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.writebacks, 1);
    assert_eq!(stats.invalidates, 1);
}

/// Scenario D: an exclusive LLC behind a 1-way L1 absorbs whatever the L1
/// evicts, so a 5-line round-robin trace that never fits in the 1-way L1
/// alone still becomes, at the LLC, 5 compulsory misses followed by hits for
/// every subsequent pass — the L1+LLC pair covers the whole working set with
/// no overlap, one line held by the L1 and the rest held by the LLC at all
/// times.
#[test]
fn scenario_d_exclusive_llc_absorbs_l1_evictions() {
    let config = cachesim_core::config::parse(
        "num_cores 1\n\
         line_size 64\n\
         LLC {\n\
         type unified\n\
         size 256\n\
         assoc 4\n\
         exclusive true\n\
         replace_policy LRU\n\
         }\n\
         L1D {\n\
         type data\n\
         core 0\n\
         size 64\n\
         assoc 1\n\
         parent LLC\n\
         replace_policy LRU\n\
         }\n",
    )
    .expect("valid config");
    let mut h = Hierarchy::from_config(&config, DriverConfig::default()).expect("valid hierarchy");
    let l1d = h.l1d(0).expect("core 0 has an L1D");

    let lines = [0u64, 64, 128, 192, 256];
    for _round in 0..3 {
        for &addr in &lines {
            h.request(
                l1d,
                &MemRef::Read {
                    tid: 0,
                    pc: 0,
                    addr,
                    size: 8,
                },
            );
        }
    }

    let llc = h.llcs()[0];
    let llc_stats = &h.cache(llc).stats;
    assert_eq!(llc_stats.misses, 5, "only the first pass should miss at the LLC");
    assert_eq!(llc_stats.hits, 10, "both repeat passes should hit at the LLC");
}

/// Scenario E: a next-line prefetcher on a striding L1D halves the miss
/// count relative to the same trace with no prefetcher.
#[test]
fn scenario_e_next_line_prefetcher_halves_misses() {
    let addrs: Vec<u64> = (0..16).map(|i| i * 64).collect();

    let mut without = Hierarchy::from_knobs(
        1,
        32 * 64,
        32,
        256 * 64,
        4,
        64,
        false,
        false,
        DriverConfig::default(),
    )
    .expect("valid knobs");
    let l1_without = without.l1d(0).unwrap();
    for &addr in &addrs {
        without.request(
            l1_without,
            &MemRef::Read {
                tid: 0,
                pc: 0,
                addr,
                size: 8,
            },
        );
    }
    let misses_without = without.cache(l1_without).stats.misses;

    let mut with = Hierarchy::from_knobs(
        1,
        32 * 64,
        32,
        256 * 64,
        4,
        64,
        true,
        false,
        DriverConfig::default(),
    )
    .expect("valid knobs");
    let l1_with = with.l1d(0).unwrap();
    for &addr in &addrs {
        with.request(
            l1_with,
            &MemRef::Read {
                tid: 0,
                pc: 0,
                addr,
                size: 8,
            },
        );
    }
    let misses_with = with.cache(l1_with).stats.misses;

    // Every access is a distinct line with no repeats, so with no prefetcher
    // each one is a cold miss. With a degree-1 next-line prefetcher, each
    // miss pulls in the line the *next* access wants, and a hit never issues
    // a further prefetch, so the trace strictly alternates miss, hit, miss,
    // hit, ... for all 16 accesses: exactly half land as misses.
    assert_eq!(misses_without, addrs.len() as i64);
    assert_eq!(misses_with, addrs.len() as i64 / 2);
}

/// Scenario F: a constant-stride PC reaching threshold/confidence yields
/// exactly one recommendation; a random-stride PC yields none; two
/// constant-stride PCs with different strides yield two recommendations.
#[test]
fn scenario_f_miss_stride_recommendations() {
    use cachesim_core::{AnalyzerConfig, Locality, MissStrideAnalyzer};

    let config = AnalyzerConfig {
        miss_count_threshold_abs: 4,
        miss_frac_threshold: 1.0,
        confidence_threshold: 0.8,
    };
    let mut analyzer = MissStrideAnalyzer::new(64, config, None).expect("no csv path");

    // PC 1: constant stride of 2 lines.
    for i in 0..8 {
        analyzer.record_miss(1, i * 128);
    }
    // PC 2: constant stride of 3 lines (different from PC 1).
    for i in 0..8 {
        analyzer.record_miss(2, i * 192);
    }
    // PC 3: random-looking, non-constant strides.
    let random_addrs = [0u64, 64, 256, 128, 4096, 512, 64, 8192];
    for &addr in &random_addrs {
        analyzer.record_miss(3, addr);
    }

    let recommendations = analyzer.finalize();
    let for_pc = |pc: u64| {
        recommendations
            .iter()
            .find(|r| r.pc == pc)
            .cloned()
    };

    let pc1 = for_pc(1).expect("PC 1 should be recommended");
    assert_eq!(pc1.stride, 128);
    assert_eq!(pc1.locality, Locality::Nta);

    let pc2 = for_pc(2).expect("PC 2 should be recommended");
    assert_eq!(pc2.stride, 192);

    assert!(for_pc(3).is_none(), "random-stride PC should not be recommended");
    assert_eq!(recommendations.len(), 2);
}

// Author: Ayush Srivastava
//! # Determinism Tests
//!
//! Independently built networks with the same seed and construction sequence
//! must stay node-for-node identical at every sampled step.

mod common;
use common::*;

use consensus_testbed::latency::{AwsRegionLatency, CityLatency, LatencyEstimate};
use consensus_testbed::node::{AwsRegionBuilder, CityBuilder};
use consensus_testbed::{seeded_rng, Network, NoTopology, Replayable, SimConfig};
use proptest::prelude::*;

#[test]
fn test_copy_stays_in_lock_step() {
    let mut original = ChatterScenario::new(17, 12);
    let mut copy = original.copy();

    for _ in 0..40 {
        original.run_ms(50).unwrap();
        copy.run_ms(50).unwrap();
        assert_eq!(original.snapshot(), copy.snapshot());
    }
    assert!(original.snapshot().stats.messages_delivered > 0);
}

#[test]
fn test_different_seeds_diverge() {
    let mut a = ChatterScenario::new(1, 12);
    let mut b = ChatterScenario::new(2, 12);
    a.run_ms(1000).unwrap();
    b.run_ms(1000).unwrap();
    assert_ne!(a.snapshot(), b.snapshot());
}

#[test]
fn test_step_size_does_not_change_outcome() {
    let mut coarse = ChatterScenario::new(5, 8);
    let mut fine = coarse.copy();
    coarse.run_ms(600).unwrap();
    for _ in 0..60 {
        fine.run_ms(10).unwrap();
    }
    assert_eq!(coarse.snapshot(), fine.snapshot());
}

#[test]
fn test_latency_estimate_leaves_run_untouched() {
    let mut probed = ChatterScenario::new(3, 10);
    let mut plain = probed.copy();

    let mut scratch = seeded_rng(99);
    let estimate: LatencyEstimate = probed.net.estimate_latency(200, &mut scratch).unwrap();
    assert!((estimate.min as f64) <= estimate.avg && estimate.avg <= (estimate.max as f64));

    probed.run_ms(500).unwrap();
    plain.run_ms(500).unwrap();
    assert_eq!(probed.snapshot(), plain.snapshot());
}

fn region_network(seed: u64) -> Network<Probe> {
    let mut net = Network::new(
        SimConfig::new().with_seed(seed),
        AwsRegionLatency::default(),
        NoTopology,
    );
    for i in 0..16 {
        let core = if i % 2 == 0 {
            net.create_node(&AwsRegionBuilder::default(), false)
        } else {
            net.create_node(&CityBuilder::default(), false)
        };
        net.add_node(ProbeNode {
            core,
            log: Vec::new(),
        })
        .unwrap();
    }
    net
}

#[test]
fn test_placement_is_reproducible() {
    let a = region_network(21);
    let b = region_network(21);
    let positions = |net: &Network<Probe>| {
        net.all_nodes()
            .iter()
            .map(|n| n.core.location)
            .collect::<Vec<_>>()
    };
    assert_eq!(positions(&a), positions(&b));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_lock_step_for_any_seed(seed in any::<u64>(), nodes in 2usize..10) {
        let mut original = ChatterScenario::new(seed, nodes);
        let mut copy = original.copy();
        for _ in 0..10 {
            original.run_ms(37).unwrap();
            copy.run_ms(37).unwrap();
            prop_assert_eq!(original.snapshot(), copy.snapshot());
        }
    }

    #[test]
    fn test_city_latency_is_seed_deterministic(seed in any::<u64>()) {
        let mut a = Network::<Probe>::new(SimConfig::new().with_seed(seed), CityLatency::default(), NoTopology);
        let mut b = Network::<Probe>::new(SimConfig::new().with_seed(seed), CityLatency::default(), NoTopology);
        for net in [&mut a, &mut b] {
            for _ in 0..6 {
                let core = net.create_node(&CityBuilder::default(), false);
                net.add_node(ProbeNode { core, log: Vec::new() }).unwrap();
            }
            net.send_all(ProbeMsg::Echo, 0, 0).unwrap();
            net.run_ms(2000).unwrap();
        }
        prop_assert_eq!(a.snapshot(), b.snapshot());
        prop_assert_eq!(labels(&a, 0), labels(&b, 0));
    }
}

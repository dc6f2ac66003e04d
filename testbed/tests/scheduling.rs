// Author: Ayush Srivastava
//! # Scheduling Test Suite
//!
//! Event and task ordering on the virtual clock.
//!
//! ## Test Coverage
//!
//! - Deliveries before periodic tasks at equal times follow enqueue order
//! - Periodic tasks fire additively from their start time
//! - Conditional tasks skip disabled ticks and retire when told to
//! - Tasks owned by down nodes are skipped but keep re-arming
//! - Execution order is `(time, sequence)` whatever the enqueue order

mod common;
use common::*;

use consensus_testbed::latency::{FixedLatency, NoLatency};
use consensus_testbed::{SimConfig, Time};
use proptest::prelude::*;

#[test]
fn test_message_then_periodic_task_on_single_node() {
    let mut net = probe_network(1, SimConfig::new(), NoLatency);
    net.send(ProbeMsg::Note("msg"), 0, 0, 0).unwrap();
    net.register_periodic_task(ProbeTask::Note("tick"), 5, 10, 0)
        .unwrap();

    net.run_ms(20).unwrap();

    assert_eq!(labels(&net, 0), vec![(0, "msg"), (5, "tick"), (15, "tick")]);
}

#[test]
fn test_periodic_task_has_no_drift() {
    let mut net = probe_network(1, SimConfig::new(), NoLatency);
    net.register_periodic_task(ProbeTask::Note("tick"), 3, 7, 0)
        .unwrap();

    // many small steps that never line up with the period
    for _ in 0..20 {
        net.run_ms(4).unwrap();
    }

    let times: Vec<Time> = labels(&net, 0).into_iter().map(|(t, _)| t).collect();
    let expected: Vec<Time> = (0..).map(|k| 3 + 7 * k).take_while(|t| *t <= 80).collect();
    assert_eq!(times, expected);
}

#[test]
fn test_conditional_task_gating_and_retirement() {
    let mut net = probe_network(1, SimConfig::new(), NoLatency);
    let task = ProbeTask::Gated {
        label: "gated",
        from: 20,
        until: 40,
        stop_after: 50,
    };
    net.register_conditional_task(task, 0, 10, 0).unwrap();

    net.run_ms(100).unwrap();

    assert_eq!(labels(&net, 0), vec![(20, "gated"), (30, "gated")]);
    // ticks at 0, 10, 40, 50 were skipped, the one at 60 retired the task
    assert_eq!(net.stats().tasks_skipped, 4);
    assert_eq!(net.pending_events(), 0);
}

#[test]
fn test_task_on_down_owner_is_skipped_but_rearmed() {
    let mut net = probe_network(1, SimConfig::new(), NoLatency);
    net.register_periodic_task(ProbeTask::Note("tick"), 0, 10, 0)
        .unwrap();
    net.register_task(ProbeTask::Note("once"), 5, 0).unwrap();

    net.set_down(0, true).unwrap();
    net.run_ms(25).unwrap();
    net.set_down(0, false).unwrap();
    net.run_ms(10).unwrap();

    assert_eq!(labels(&net, 0), vec![(30, "tick")]);
    assert_eq!(net.stats().tasks_skipped, 4);
}

#[test]
fn test_later_enqueue_earlier_time_runs_first() {
    let mut net = probe_network(2, SimConfig::new(), FixedLatency(10));
    net.send(ProbeMsg::Note("late"), 5, 0, 1).unwrap();
    net.send(ProbeMsg::Note("early"), 0, 0, 1).unwrap();

    net.run_ms(20).unwrap();

    assert_eq!(labels(&net, 1), vec![(10, "early"), (15, "late")]);
}

#[test]
fn test_running_past_queued_work_only_moves_clock() {
    let mut net = probe_network(2, SimConfig::new(), NoLatency);
    net.run(3).unwrap();
    assert_eq!(net.time(), 3000);
    net.run_until(3500).unwrap();
    assert_eq!(net.time(), 3500);
    assert_eq!(net.stats().messages_delivered, 0);
}

#[test]
fn test_fan_out_preserves_destination_order() {
    let mut net = probe_network(4, SimConfig::new(), NoLatency);
    net.send_to_many(ProbeMsg::Echo, 0, 0, &[3, 1, 2]).unwrap();
    net.run_ms(1).unwrap();

    assert_eq!(labels(&net, 0), vec![(0, "pong"); 3]);
    for id in 1..4 {
        assert_eq!(labels(&net, id), vec![(0, "echo")]);
    }
    assert_eq!(net.stats().messages_delivered, 6);
}

fn arb_sends() -> impl Strategy<Value = Vec<(Time, &'static str)>> {
    let label = prop::sample::select(vec!["a", "b", "c", "d"]);
    prop::collection::vec((0u64..50, label), 1..40)
}

proptest! {
    /// Deliveries happen sorted by time, ties in enqueue order
    #[test]
    fn test_delivery_order_is_time_then_sequence(sends in arb_sends()) {
        let mut net = probe_network(2, SimConfig::new(), FixedLatency(3));
        for (origin, label) in &sends {
            net.send(ProbeMsg::Note(*label), *origin, 0, 1).unwrap();
        }
        net.run_ms(100).unwrap();

        let mut expected: Vec<(Time, &'static str)> =
            sends.iter().map(|(origin, label)| (origin + 3, *label)).collect();
        // stable sort keeps enqueue order among equal times
        expected.sort_by_key(|(time, _)| *time);
        prop_assert_eq!(labels(&net, 1), expected);
    }
}

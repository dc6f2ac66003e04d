//! # Network Latency Models
//!
//! A latency model is a pure function of the sender, the receiver and the
//! generator state. The network passes its own generator in, so a model never
//! owns randomness and two identically built networks draw identical delays.
//!
//! ## Models
//!
//! - [`NoLatency`]: every message arrives instantly
//! - [`FixedLatency`]: constant delay
//! - [`UniformLatency`]: uniform in `[0, max]`
//! - [`DistanceLatency`]: proportional to toroidal map distance, plus jitter
//! - [`AwsRegionLatency`]: measured inter-region table, plus jitter
//! - [`CityLatency`]: measured inter-city table, plus jitter

use crate::node::{max_dist, AwsRegion, City, NodeCore, Region};
use crate::{SimRng, Time};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Delay strategy used by the network for every send
pub trait NetworkLatency: Debug {
    /// One-way delay in milliseconds from `from` to `to`
    fn delay(&self, from: &NodeCore, to: &NodeCore, rng: &mut SimRng) -> Time;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoLatency;

impl NetworkLatency for NoLatency {
    fn delay(&self, _from: &NodeCore, _to: &NodeCore, _rng: &mut SimRng) -> Time {
        0
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedLatency(pub Time);

impl NetworkLatency for FixedLatency {
    fn delay(&self, _from: &NodeCore, _to: &NodeCore, _rng: &mut SimRng) -> Time {
        self.0
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UniformLatency {
    pub max: Time,
}

impl NetworkLatency for UniformLatency {
    fn delay(&self, _from: &NodeCore, _to: &NodeCore, rng: &mut SimRng) -> Time {
        rng.gen_range(0..=self.max)
    }

    fn name(&self) -> &'static str {
        "uniform"
    }
}

/// `base + span * dist / max_dist + jitter`
#[derive(Debug, Clone, Copy)]
pub struct DistanceLatency {
    /// Delay between two nodes at the same position
    pub base: Time,
    /// Extra delay at the largest possible distance
    pub span: Time,
    /// Upper bound of the uniform additive jitter
    pub jitter: Time,
}

impl Default for DistanceLatency {
    fn default() -> Self {
        Self {
            base: 10,
            span: 200,
            jitter: 20,
        }
    }
}

impl DistanceLatency {
    fn raw(&self, from: &NodeCore, to: &NodeCore) -> Time {
        let dist = Time::from(from.dist(to));
        let scaled = self.span.saturating_mul(dist) / Time::from(max_dist().max(1));
        self.base.saturating_add(scaled)
    }
}

impl NetworkLatency for DistanceLatency {
    fn delay(&self, from: &NodeCore, to: &NodeCore, rng: &mut SimRng) -> Time {
        self.raw(from, to).saturating_add(jitter(rng, self.jitter))
    }

    fn name(&self) -> &'static str {
        "distance"
    }
}

fn jitter(rng: &mut SimRng, max: Time) -> Time {
    if max == 0 {
        0
    } else {
        rng.gen_range(0..=max)
    }
}

/// Adds up to `percent`% of `base` as uniform jitter
fn proportional_jitter(rng: &mut SimRng, base: Time, percent: u32) -> Time {
    jitter(rng, base * Time::from(percent) / 100)
}

/// Round-trip times in milliseconds between AWS regions, indexed by [`AwsRegion::index`]
const AWS_RTT_MS: [[Time; 8]; 8] = [
    [4, 70, 68, 90, 145, 215, 200, 115],
    [70, 4, 125, 145, 100, 165, 140, 175],
    [68, 125, 4, 25, 210, 170, 255, 180],
    [90, 145, 25, 4, 225, 160, 280, 200],
    [145, 100, 210, 225, 4, 70, 105, 255],
    [215, 165, 170, 160, 70, 4, 90, 325],
    [200, 140, 255, 280, 105, 90, 4, 310],
    [115, 175, 180, 200, 255, 325, 310, 4],
];

/// Round-trip times in milliseconds between cities, indexed by [`City::index`]
const CITY_RTT_MS: [[Time; 8]; 8] = [
    [2, 75, 80, 170, 190, 120, 205, 65],
    [75, 2, 10, 225, 115, 190, 260, 140],
    [80, 10, 2, 230, 110, 195, 280, 145],
    [170, 225, 230, 2, 120, 260, 110, 105],
    [190, 115, 110, 120, 2, 300, 150, 230],
    [120, 190, 195, 260, 300, 2, 310, 180],
    [205, 260, 280, 110, 150, 310, 2, 140],
    [65, 140, 145, 105, 230, 180, 140, 2],
];

/// One-way delay between AWS regions. Nodes without an AWS region tag fall
/// back to [`DistanceLatency`].
#[derive(Debug, Clone, Copy)]
pub struct AwsRegionLatency {
    pub jitter_percent: u32,
    pub fallback: DistanceLatency,
}

impl Default for AwsRegionLatency {
    fn default() -> Self {
        Self {
            jitter_percent: 10,
            fallback: DistanceLatency::default(),
        }
    }
}

impl AwsRegionLatency {
    pub fn one_way(a: AwsRegion, b: AwsRegion) -> Time {
        AWS_RTT_MS[a.index()][b.index()] / 2
    }
}

impl NetworkLatency for AwsRegionLatency {
    fn delay(&self, from: &NodeCore, to: &NodeCore, rng: &mut SimRng) -> Time {
        match (from.location.region, to.location.region) {
            (Some(Region::Aws(a)), Some(Region::Aws(b))) => {
                let base = Self::one_way(a, b);
                base.saturating_add(proportional_jitter(rng, base, self.jitter_percent))
            }
            _ => self.fallback.delay(from, to, rng),
        }
    }

    fn name(&self) -> &'static str {
        "aws-regions"
    }
}

/// One-way delay between cities. Nodes without a city tag fall back to
/// [`DistanceLatency`].
#[derive(Debug, Clone, Copy)]
pub struct CityLatency {
    pub jitter_percent: u32,
    pub fallback: DistanceLatency,
}

impl Default for CityLatency {
    fn default() -> Self {
        Self {
            jitter_percent: 10,
            fallback: DistanceLatency::default(),
        }
    }
}

impl CityLatency {
    pub fn one_way(a: City, b: City) -> Time {
        CITY_RTT_MS[a.index()][b.index()] / 2
    }
}

impl NetworkLatency for CityLatency {
    fn delay(&self, from: &NodeCore, to: &NodeCore, rng: &mut SimRng) -> Time {
        match (from.location.region, to.location.region) {
            (Some(Region::City(a)), Some(Region::City(b))) => {
                let base = Self::one_way(a, b);
                base.saturating_add(proportional_jitter(rng, base, self.jitter_percent))
            }
            _ => self.fallback.delay(from, to, rng),
        }
    }

    fn name(&self) -> &'static str {
        "cities"
    }
}

/// Summary of sampled delays
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatencyEstimate {
    pub samples: usize,
    pub min: Time,
    pub avg: f64,
    pub max: Time,
}

impl LatencyEstimate {
    /// Summarize a series of delays, `None` when empty
    pub fn from_samples(delays: impl IntoIterator<Item = Time>) -> Option<Self> {
        let mut samples = 0usize;
        let mut min = Time::MAX;
        let mut max = 0;
        let mut total: u128 = 0;
        for delay in delays {
            samples += 1;
            min = min.min(delay);
            max = max.max(delay);
            total += u128::from(delay);
        }
        (samples > 0).then(|| Self {
            samples,
            min,
            avg: total as f64 / samples as f64,
            max,
        })
    }
}

/// Sample `samples` random ordered pairs of distinct nodes.
///
/// Uses `scratch` for both pair selection and jitter, so the network's own
/// generator is left untouched.
pub fn estimate_latency(
    latency: &dyn NetworkLatency,
    nodes: &[&NodeCore],
    samples: usize,
    scratch: &mut SimRng,
) -> Option<LatencyEstimate> {
    if nodes.len() < 2 {
        return None;
    }
    let delays: Vec<Time> = (0..samples)
        .map(|_| {
            let from = scratch.gen_range(0..nodes.len());
            let mut to = scratch.gen_range(0..nodes.len() - 1);
            if to >= from {
                to += 1;
            }
            latency.delay(nodes[from], nodes[to], scratch)
        })
        .collect();
    LatencyEstimate::from_samples(delays)
}

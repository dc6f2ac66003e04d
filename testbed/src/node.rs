//! # Node Model and Placement
//!
//! Every simulated node carries a [`NodeCore`]: its id, position on the world
//! map, liveness flags and traffic counters. Protocols embed the core in their
//! own node type and expose it through [`SimNode`].
//!
//! Placement strategies ([`NodeBuilder`]) decide where a node lives when it is
//! created. They draw from the network-owned generator, so the construction
//! order fully determines every position.
//!
//! ## World Map
//!
//! Positions live on a `MAX_X` x `MAX_Y` equirectangular map that wraps in both
//! directions; distances are toroidal.

use crate::{NodeId, SimRng, Time};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Width of the world map
pub const MAX_X: u32 = 2000;

/// Height of the world map
pub const MAX_Y: u32 = 1112;

/// Largest possible toroidal distance between two positions
pub fn max_dist() -> u32 {
    let half_x = f64::from(MAX_X / 2);
    let half_y = f64::from(MAX_Y / 2);
    half_x.hypot(half_y) as u32
}

/// Id carried by a core that has not been added to a network yet
pub const UNASSIGNED: NodeId = NodeId::MAX;

/// AWS regions with measured inter-region latencies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AwsRegion {
    UsEast1,
    UsWest2,
    EuWest1,
    EuCentral1,
    ApNortheast1,
    ApSoutheast1,
    ApSoutheast2,
    SaEast1,
}

impl AwsRegion {
    pub const ALL: [AwsRegion; 8] = [
        AwsRegion::UsEast1,
        AwsRegion::UsWest2,
        AwsRegion::EuWest1,
        AwsRegion::EuCentral1,
        AwsRegion::ApNortheast1,
        AwsRegion::ApSoutheast1,
        AwsRegion::ApSoutheast2,
        AwsRegion::SaEast1,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            AwsRegion::UsEast1 => "us-east-1",
            AwsRegion::UsWest2 => "us-west-2",
            AwsRegion::EuWest1 => "eu-west-1",
            AwsRegion::EuCentral1 => "eu-central-1",
            AwsRegion::ApNortheast1 => "ap-northeast-1",
            AwsRegion::ApSoutheast1 => "ap-southeast-1",
            AwsRegion::ApSoutheast2 => "ap-southeast-2",
            AwsRegion::SaEast1 => "sa-east-1",
        }
    }

    /// Datacenter position on the world map
    pub fn position(self) -> (u32, u32) {
        match self {
            AwsRegion::UsEast1 => (569, 316),
            AwsRegion::UsWest2 => (336, 273),
            AwsRegion::EuWest1 => (965, 227),
            AwsRegion::EuCentral1 => (1048, 246),
            AwsRegion::ApNortheast1 => (1776, 335),
            AwsRegion::ApSoutheast1 => (1577, 548),
            AwsRegion::ApSoutheast2 => (1840, 765),
            AwsRegion::SaEast1 => (741, 701),
        }
    }
}

/// Cities with measured inter-city latencies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum City {
    NewYork,
    London,
    Paris,
    Tokyo,
    Mumbai,
    SaoPaulo,
    Sydney,
    SanFrancisco,
}

impl City {
    pub const ALL: [City; 8] = [
        City::NewYork,
        City::London,
        City::Paris,
        City::Tokyo,
        City::Mumbai,
        City::SaoPaulo,
        City::Sydney,
        City::SanFrancisco,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Position on the world map
    pub fn position(self) -> (u32, u32) {
        match self {
            City::NewYork => (589, 305),
            City::London => (999, 238),
            City::Paris => (1013, 254),
            City::Tokyo => (1776, 335),
            City::Mumbai => (1405, 438),
            City::SaoPaulo => (741, 701),
            City::Sydney => (1840, 765),
            City::SanFrancisco => (320, 322),
        }
    }

    /// Metropolitan population in millions, used as placement weight
    pub fn population(self) -> u32 {
        match self {
            City::NewYork => 19,
            City::London => 9,
            City::Paris => 11,
            City::Tokyo => 37,
            City::Mumbai => 20,
            City::SaoPaulo => 22,
            City::Sydney => 5,
            City::SanFrancisco => 5,
        }
    }
}

/// Region tag attached to a node by its builder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Region {
    Aws(AwsRegion),
    City(City),
}

/// Where a node is placed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Location {
    pub x: u32,
    pub y: u32,
    pub region: Option<Region>,
}

/// Base state shared by every simulated node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeCore {
    pub(crate) id: NodeId,
    /// Position on the world map
    pub location: Location,
    pub(crate) down: bool,
    byzantine: bool,
    pub(crate) done_at: Time,
    pub(crate) msg_sent: u64,
    pub(crate) msg_received: u64,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
}

impl NodeCore {
    pub fn new(location: Location, byzantine: bool) -> Self {
        Self {
            id: UNASSIGNED,
            location,
            down: false,
            byzantine,
            done_at: 0,
            msg_sent: 0,
            msg_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_down(&self) -> bool {
        self.down
    }

    pub fn is_byzantine(&self) -> bool {
        self.byzantine
    }

    /// Time at which the protocol marked this node as done, 0 if never
    pub fn done_at(&self) -> Time {
        self.done_at
    }

    pub fn is_done(&self) -> bool {
        self.done_at > 0
    }

    pub fn msg_sent(&self) -> u64 {
        self.msg_sent
    }

    pub fn msg_received(&self) -> u64 {
        self.msg_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Toroidal distance to another node; coordinates past the map edge wrap
    pub fn dist(&self, other: &NodeCore) -> u32 {
        let dx = (self.location.x % MAX_X).abs_diff(other.location.x % MAX_X);
        let dy = (self.location.y % MAX_Y).abs_diff(other.location.y % MAX_Y);
        let dx = f64::from(dx.min(MAX_X - dx));
        let dy = f64::from(dy.min(MAX_Y - dy));
        dx.hypot(dy) as u32
    }
}

/// Access to the [`NodeCore`] embedded in a protocol node
pub trait SimNode {
    fn core(&self) -> &NodeCore;
    fn core_mut(&mut self) -> &mut NodeCore;

    /// Digest of protocol-visible state, compared by lock-step replays
    fn state_digest(&self) -> u64 {
        0
    }
}

impl SimNode for NodeCore {
    fn core(&self) -> &NodeCore {
        self
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        self
    }
}

/// Placement strategy used when a node is created
pub trait NodeBuilder {
    fn place(&self, rng: &mut SimRng) -> Location;
}

/// Uniformly random position, no region tag
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPositionBuilder;

impl NodeBuilder for RandomPositionBuilder {
    fn place(&self, rng: &mut SimRng) -> Location {
        Location {
            x: rng.gen_range(1..=MAX_X),
            y: rng.gen_range(1..=MAX_Y),
            region: None,
        }
    }
}

/// Uniformly random AWS region among `regions`
#[derive(Debug, Clone)]
pub struct AwsRegionBuilder {
    regions: Vec<AwsRegion>,
}

impl AwsRegionBuilder {
    pub fn new(regions: Vec<AwsRegion>) -> Self {
        Self { regions }
    }
}

impl Default for AwsRegionBuilder {
    fn default() -> Self {
        Self::new(AwsRegion::ALL.to_vec())
    }
}

impl NodeBuilder for AwsRegionBuilder {
    fn place(&self, rng: &mut SimRng) -> Location {
        let region = if self.regions.is_empty() {
            AwsRegion::UsEast1
        } else {
            self.regions[rng.gen_range(0..self.regions.len())]
        };
        let (x, y) = region.position();
        Location {
            x,
            y,
            region: Some(Region::Aws(region)),
        }
    }
}

/// City drawn with probability proportional to its population
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityBuilder {
    cities: Vec<City>,
}

impl CityBuilder {
    /// Returns `None` when `cities` is empty
    pub fn new(cities: Vec<City>) -> Option<Self> {
        if cities.is_empty() {
            return None;
        }
        Some(Self { cities })
    }
}

impl Default for CityBuilder {
    fn default() -> Self {
        Self {
            cities: City::ALL.to_vec(),
        }
    }
}

impl NodeBuilder for CityBuilder {
    fn place(&self, rng: &mut SimRng) -> Location {
        let city = self
            .cities
            .choose_weighted(rng, |c| c.population())
            .map_or(City::NewYork, |c| *c);
        let (x, y) = city.position();
        Location {
            x,
            y,
            region: Some(Region::City(city)),
        }
    }
}

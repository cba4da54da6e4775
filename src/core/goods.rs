use crate::core::cargo_list::StationCargoList;
use crate::core::ids::StationId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Observed traffic on one link between two stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkStat {
    /// Capacity of the vehicles that travelled the link.
    pub capacity: u32,
    /// Amount of cargo actually carried.
    pub usage: u32,
}

impl LinkStat {
    pub fn new(capacity: u32, usage: u32) -> Self {
        Self { capacity, usage }
    }

    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    pub fn increase(&mut self, capacity: u32, usage: u32) {
        self.capacity = self.capacity.saturating_add(capacity);
        self.usage = self.usage.saturating_add(usage).min(self.capacity);
    }

    /// Monthly decay so links no vehicle serves any more fade out.
    pub fn decay(&mut self) {
        self.capacity = three_quarters(self.capacity);
        self.usage = three_quarters(self.usage).min(self.capacity);
    }
}

fn three_quarters(value: u32) -> u32 {
    (u64::from(value) * 3 / 4) as u32
}

/// Planned versus sent cargo from one origin toward one next hop.
///
/// Ordered "most under-served first": a larger `planned - sent` sorts
/// earlier, ties go to the larger `via`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStat {
    via: StationId,
    planned: u32,
    sent: u32,
}

impl FlowStat {
    pub fn new(via: StationId, planned: u32, sent: u32) -> Self {
        Self { via, planned, sent }
    }

    pub fn via(&self) -> StationId {
        self.via
    }

    pub fn planned(&self) -> u32 {
        self.planned
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// How far this route lags behind its plan.
    pub fn shortfall(&self) -> i64 {
        self.planned as i64 - self.sent as i64
    }
}

impl Ord for FlowStat {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .shortfall()
            .cmp(&self.shortfall())
            .then_with(|| other.via.cmp(&self.via))
            .then_with(|| self.planned.cmp(&other.planned))
    }
}

impl PartialOrd for FlowStat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// All next hops planned for cargo of one origin at one station, kept sorted
/// with the most under-served route at the head. Each `via` appears at most
/// once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowStatSet {
    stats: Vec<FlowStat>,
}

impl FlowStatSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the plan for `via`.
    pub fn insert(&mut self, stat: FlowStat) {
        self.stats.retain(|s| s.via != stat.via);
        self.stats.push(stat);
        self.stats.sort();
    }

    /// The most under-served route.
    pub fn first(&self) -> Option<&FlowStat> {
        self.stats.first()
    }

    /// Next hop of the most under-served route.
    pub fn first_via(&self) -> Option<StationId> {
        self.first().map(FlowStat::via)
    }

    pub fn get(&self, via: StationId) -> Option<&FlowStat> {
        self.stats.iter().find(|s| s.via == via)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowStat> {
        self.stats.iter()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn total_planned(&self) -> u64 {
        self.stats.iter().map(|s| s.planned as u64).sum()
    }

    /// Record `count` units sent via `via`. Hops without a plan are not
    /// tracked; returns whether `via` is planned.
    pub fn add_sent(&mut self, via: StationId, count: u32) -> bool {
        let Some(stat) = self.stats.iter_mut().find(|s| s.via == via) else {
            return false;
        };
        stat.sent = stat.sent.saturating_add(count);
        self.stats.sort();
        true
    }

    pub fn remove(&mut self, via: StationId) -> Option<FlowStat> {
        let pos = self.stats.iter().position(|s| s.via == via)?;
        Some(self.stats.remove(pos))
    }
}

impl FromIterator<FlowStat> for FlowStatSet {
    fn from_iter<T: IntoIterator<Item = FlowStat>>(iter: T) -> Self {
        let mut set = FlowStatSet::new();
        for stat in iter {
            set.insert(stat);
        }
        set
    }
}

/// Routing table of a station: origin station -> planned next hops.
pub type FlowStatMap = BTreeMap<StationId, FlowStatSet>;

/// Acceptance and pickup status bits of a goods entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptancePickup {
    /// The station accepts this cargo for final delivery.
    pub acceptance: bool,
    /// Cargo has been made available for pickup here, by production or transfer.
    pub pickup: bool,
}

/// Per-station, per-cargo state: waiting cargo, observed links and the
/// committed routing table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodsEntry {
    pub cargo: StationCargoList,
    /// Incoming links keyed by the station the cargo came from.
    pub link_stats: BTreeMap<StationId, LinkStat>,
    /// Stations this one has links to, i.e. whose `link_stats` contain this
    /// station.
    pub outgoing: BTreeSet<StationId>,
    pub flows: FlowStatMap,
    pub acceptance_pickup: AcceptancePickup,
    /// Monthly average of cargo produced here.
    pub supply: u32,
    /// Cargo produced so far this month.
    pub supply_new: u32,
}

impl GoodsEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepts(&self) -> bool {
        self.acceptance_pickup.acceptance
    }

    pub fn has_links(&self) -> bool {
        self.link_stats.values().any(|l| !l.is_empty())
    }

    /// Head next hop planned for cargo from `origin`.
    pub fn via(&self, origin: StationId) -> StationId {
        self.flows
            .get(&origin)
            .and_then(FlowStatSet::first_via)
            .unwrap_or(StationId::INVALID)
    }

    /// Record that `count` units from `source` left via `next`. Cargo sent
    /// on a hop the plan doesn't list (a forced delivery, a vehicle keeping
    /// cargo off plan) leaves the stats untouched.
    pub fn update_flow_stats(&mut self, source: StationId, count: u32, next: StationId) {
        if !source.is_valid() || !next.is_valid() {
            return;
        }
        if let Some(stats) = self.flows.get_mut(&source) {
            stats.add_sent(next, count);
        }
    }

    /// Record a transfer of `count` units from `source` on the first planned
    /// hop that is not `curr`. Returns that hop, or `INVALID` if none.
    pub fn update_flow_stats_transfer(&mut self, source: StationId, count: u32, curr: StationId) -> StationId {
        let Some(stats) = self.flows.get_mut(&source) else {
            return StationId::INVALID;
        };
        let Some(via) = stats.iter().map(FlowStat::via).find(|via| *via != curr) else {
            return StationId::INVALID;
        };
        stats.add_sent(via, count);
        via
    }

    /// Drop every routing and link reference to `station`.
    pub fn purge_station(&mut self, station: StationId) {
        self.flows.remove(&station);
        for stats in self.flows.values_mut() {
            stats.remove(station);
        }
        self.flows.retain(|_, stats| !stats.is_empty());
        self.link_stats.remove(&station);
        self.outgoing.remove(&station);
    }

    /// Month change: roll supply over and decay link statistics.
    pub fn on_month(&mut self, decay_links: bool) -> Vec<StationId> {
        self.supply = ((u64::from(self.supply) + u64::from(self.supply_new) + 1) / 2) as u32;
        self.supply_new = 0;
        if !decay_links {
            return Vec::new();
        }
        for stat in self.link_stats.values_mut() {
            stat.decay();
        }
        let dead: Vec<StationId> = self
            .link_stats
            .iter()
            .filter(|(_, stat)| stat.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.link_stats.remove(id);
        }
        dead
    }
}

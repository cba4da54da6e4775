//! Incremental component discovery for one cargo type.
//!
//! Every station slot carries a colour. Colours below [`HALF_COLOUR`] mark
//! stations owned by a component that is still out for processing; anything
//! at or above it is free. Discovery claims free stations with a fresh
//! colour; joining a component adds [`HALF_COLOUR`] back to its stations'
//! colours, freeing them without touching other components' marks.

use crate::core::goods::GoodsEntry;
use crate::core::ids::{CargoId, Date, StationId};
use crate::core::station::StationPool;
use crate::graph::component::{Colour, Component, Node, NodeId};
use crate::optimization::job::{CommitReport, JobSettings};
use crate::optimization::worker::{PendingJob, WorkerPool};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Colours below this belong to live components.
pub const HALF_COLOUR: Colour = u16::MAX / 2;

/// Colour of a station never claimed by any component.
pub const UNCOLOURED: Colour = u16::MAX;

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkGraph {
    cargo: CargoId,
    station_colours: Vec<Colour>,
    current_colour: Colour,
    current_station: usize,
    pending: VecDeque<PendingJob>,
}

impl LinkGraph {
    pub fn new(cargo: CargoId) -> Self {
        Self {
            cargo,
            station_colours: Vec::new(),
            current_colour: 0,
            current_station: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn cargo(&self) -> CargoId {
        self.cargo
    }

    /// Colour mark of a station slot.
    pub fn colour_of(&self, station: StationId) -> Colour {
        self.station_colours
            .get(station.index())
            .copied()
            .unwrap_or(UNCOLOURED)
    }

    fn is_free(&self, index: usize) -> bool {
        self.station_colours.get(index).map_or(true, |c| *c >= HALF_COLOUR)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingJob> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_colour(&mut self) -> Colour {
        loop {
            self.current_colour = (self.current_colour + 1) % HALF_COLOUR;
            let colour = self.current_colour;
            if !self.pending.iter().any(|job| job.colour() == colour) {
                return colour;
            }
        }
    }

    /// Discover the next component and queue it for processing.
    ///
    /// Scans forward from the cursor for a free station with incoming links
    /// and collects everything reachable over links in either direction,
    /// skipping stations owned by other live components. Returns `false`
    /// and rewinds the cursor once no seed is left.
    pub fn next_component(
        &mut self,
        stations: &StationPool,
        settings: JobSettings,
        workers: Option<&WorkerPool>,
    ) -> bool {
        if self.station_colours.len() < stations.slot_count() {
            self.station_colours.resize(stations.slot_count(), UNCOLOURED);
        }
        let cargo = self.cargo;
        let seed = (self.current_station..stations.slot_count()).find(|&index| {
            self.is_free(index)
                && stations
                    .id_at(index)
                    .and_then(|id| stations.goods(id, cargo))
                    .map_or(false, GoodsEntry::has_links)
        });
        let Some(seed) = seed else {
            self.current_station = 0;
            return false;
        };
        self.current_station = seed + 1;

        let colour = self.next_colour();
        let component = self.discover(stations, seed, colour);
        info!(
            "{}: spawned component {} with {} stations, due on day {}",
            cargo,
            colour,
            component.size(),
            settings.join_date
        );
        self.pending.push_back(PendingJob::spawn(component, settings, workers));
        true
    }

    /// Breadth-first search from `seed`, claiming stations for `colour`.
    fn discover(&mut self, stations: &StationPool, seed: usize, colour: Colour) -> Component {
        let cargo = self.cargo;
        let mut nodes: Vec<Node> = Vec::new();
        let mut index_of: BTreeMap<StationId, NodeId> = BTreeMap::new();
        let mut links: Vec<(NodeId, NodeId, u32, u32)> = Vec::new();
        let mut queue = VecDeque::new();

        let mut claim = |id: StationId, colours: &mut Vec<Colour>, queue: &mut VecDeque<StationId>| -> Option<NodeId> {
            if let Some(node) = index_of.get(&id) {
                return Some(*node);
            }
            let slot = colours.get_mut(id.index())?;
            if *slot < HALF_COLOUR {
                return None;
            }
            let station = stations.get(id)?;
            let ge = station.goods(cargo)?;
            *slot = colour;
            let node = nodes.len();
            nodes.push(Node::new(id, station.xy, ge.supply, ge.accepts()));
            index_of.insert(id, node);
            queue.push_back(id);
            Some(node)
        };

        if let Some(seed_id) = stations.id_at(seed) {
            claim(seed_id, &mut self.station_colours, &mut queue);
        }
        while let Some(id) = queue.pop_front() {
            let Some(ge) = stations.goods(id, cargo) else { continue };
            let Some(to) = claim(id, &mut self.station_colours, &mut queue) else {
                continue;
            };
            for (from_id, stat) in &ge.link_stats {
                if stat.is_empty() {
                    continue;
                }
                if let Some(from) = claim(*from_id, &mut self.station_colours, &mut queue) {
                    links.push((from, to, stat.capacity, stat.usage));
                }
            }
            for to_id in &ge.outgoing {
                claim(*to_id, &mut self.station_colours, &mut queue);
            }
        }
        drop(claim);

        let mut component = Component::new(cargo, colour, nodes);
        for (from, to, capacity, usage) in links {
            component.add_edge(from, to, capacity, usage);
        }
        debug!(
            "{}: component {} has {} links",
            cargo,
            colour,
            component.link_count()
        );
        component
    }

    /// Commit the oldest pending component if it is due by `date`.
    ///
    /// Components are joined strictly in spawn order. The joined stations
    /// become free again and the cursor rewinds so they are revisited.
    pub fn join(&mut self, stations: &mut StationPool, date: Date) -> bool {
        let due = self.pending.front().map_or(false, |job| job.join_date() <= date);
        if due {
            self.join_front(stations);
        }
        due
    }

    /// Join every pending component regardless of its due date.
    pub fn join_all(&mut self, stations: &mut StationPool) -> CommitReport {
        let mut total = CommitReport::default();
        while !self.pending.is_empty() {
            let report = self.join_front(stations);
            total.stations_updated += report.stations_updated;
            total.stations_purged += report.stations_purged;
        }
        total
    }

    fn join_front(&mut self, stations: &mut StationPool) -> CommitReport {
        let Some(pending) = self.pending.pop_front() else {
            return CommitReport::default();
        };
        let colour = pending.colour();
        let first_index = pending
            .component()
            .nodes()
            .iter()
            .map(|n| n.station.index())
            .min()
            .unwrap_or(0);

        let report = pending
            .finish()
            .map(|job| job.commit(stations))
            .unwrap_or_default();

        for slot in self.station_colours.iter_mut().filter(|c| **c == colour) {
            *slot += HALF_COLOUR;
        }
        self.current_station = self.current_station.min(first_index);
        debug!(
            "{}: joined component {} ({} stations updated)",
            self.cargo, colour, report.stations_updated
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::Tile;
    use crate::core::settings::DistributionType;

    const CARGO: CargoId = CargoId(0);

    fn settings(join_date: Date) -> JobSettings {
        JobSettings {
            epsilon: 0.25,
            max_distance: 128,
            distribution: DistributionType::Symmetric,
            join_date,
        }
    }

    /// Two islands: a <-> b and c -> d, plus a lonely e.
    fn pool() -> (StationPool, Vec<StationId>) {
        let mut pool = StationPool::new();
        let ids: Vec<_> = (0..5)
            .map(|i| pool.insert(format!("S{}", i), Tile::new(i * 4, 0), 1).unwrap())
            .collect();
        pool.record_link(ids[0], ids[1], CARGO, 30, 0).unwrap();
        pool.record_link(ids[1], ids[0], CARGO, 30, 0).unwrap();
        pool.record_link(ids[2], ids[3], CARGO, 10, 0).unwrap();
        for id in &ids {
            pool.goods_mut(*id, CARGO).unwrap().supply = 20;
        }
        (pool, ids)
    }

    #[test]
    fn test_discovers_each_island_once() {
        let (pool, ids) = pool();
        let mut graph = LinkGraph::new(CARGO);
        assert!(graph.next_component(&pool, settings(4), None));
        assert!(graph.next_component(&pool, settings(4), None));
        assert!(!graph.next_component(&pool, settings(4), None));
        assert_eq!(graph.pending_count(), 2);

        let sizes: Vec<_> = graph.pending().map(|j| j.component().size()).collect();
        assert_eq!(sizes, vec![2, 2]);
        assert_eq!(graph.colour_of(ids[0]), graph.colour_of(ids[1]));
        assert_ne!(graph.colour_of(ids[0]), graph.colour_of(ids[2]));
        assert_eq!(graph.colour_of(ids[4]), UNCOLOURED);
    }

    #[test]
    fn test_component_edges_follow_link_stats() {
        let (pool, _) = pool();
        let mut graph = LinkGraph::new(CARGO);
        graph.next_component(&pool, settings(4), None);
        let component = graph.pending().next().unwrap().component();
        assert_eq!(component.link_count(), 2);
        assert_eq!(component.edge(0, 1).capacity, 30);
        assert_eq!(component.edge(0, 1).distance, 4);
    }

    #[test]
    fn test_source_only_station_joins_through_outgoing_index() {
        let (pool, ids) = pool();
        let mut graph = LinkGraph::new(CARGO);
        graph.next_component(&pool, settings(4), None);
        graph.next_component(&pool, settings(4), None);
        let second = graph.pending().nth(1).unwrap().component();
        let stations: Vec<_> = second.nodes().iter().map(|n| n.station).collect();
        assert!(stations.contains(&ids[2]));
        assert!(stations.contains(&ids[3]));
        assert_eq!(second.edge(second.node_of(ids[2]).unwrap(), second.node_of(ids[3]).unwrap()).capacity, 10);
    }

    #[test]
    fn test_join_waits_for_due_date_and_keeps_order() {
        let (mut pool, ids) = pool();
        let mut graph = LinkGraph::new(CARGO);
        graph.next_component(&pool, settings(4), None);
        graph.next_component(&pool, settings(2), None);

        // the head is due on day 4, the second job must not overtake it
        assert!(!graph.join(&mut pool, 3));
        assert!(graph.join(&mut pool, 4));
        assert!(graph.colour_of(ids[0]) >= HALF_COLOUR);
        assert!(graph.colour_of(ids[2]) < HALF_COLOUR);
        assert!(graph.join(&mut pool, 4));
        assert!(!graph.join(&mut pool, 100));
        assert!(!pool.goods(ids[0], CARGO).unwrap().flows.is_empty());
    }

    #[test]
    fn test_joined_stations_are_rediscovered() {
        let (mut pool, _) = pool();
        let mut graph = LinkGraph::new(CARGO);
        graph.next_component(&pool, settings(0), None);
        graph.join(&mut pool, 0);
        assert!(graph.next_component(&pool, settings(0), None));
        assert_eq!(graph.pending().next().unwrap().component().size(), 2);
    }

    #[test]
    fn test_live_colour_is_not_reused() {
        let (pool, _) = pool();
        let mut graph = LinkGraph::new(CARGO);
        graph.current_colour = HALF_COLOUR - 2;
        graph.next_component(&pool, settings(0), None);
        let first = graph.pending().next().unwrap().colour();
        assert_eq!(first, HALF_COLOUR - 1);
        graph.current_colour = HALF_COLOUR - 2;
        graph.next_component(&pool, settings(0), None);
        let second = graph.pending().nth(1).unwrap().colour();
        assert_eq!(second, 0);
    }

    #[test]
    fn test_station_removed_mid_job() {
        let (mut pool, ids) = pool();
        let mut graph = LinkGraph::new(CARGO);
        graph.next_component(&pool, settings(0), None);
        pool.remove(ids[1]).unwrap();
        pool.purge_references(ids[1]);
        assert!(graph.join(&mut pool, 0));
        let flows = &pool.goods(ids[0], CARGO).unwrap().flows;
        assert!(flows.values().all(|set| set.get(ids[1]).is_none()));
        assert!(!flows.contains_key(&ids[1]));
    }
}

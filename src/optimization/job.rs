//! One component's trip through the distribution pipeline.
//!
//! A [`LinkGraphJob`] owns a private copy of a [`Component`] and the
//! annotations the handlers fill in: demand per edge, flow per edge, paths
//! per node and finally the per-node flow maps. Nothing in a job refers back
//! to live game state, so it can run on any thread. Results reach the
//! stations only through [`LinkGraphJob::commit`].

use crate::core::goods::{FlowStat, FlowStatMap, FlowStatSet};
use crate::core::ids::{Date, StationId};
use crate::core::settings::DistributionType;
use crate::core::station::StationPool;
use crate::graph::component::{Component, NodeId};
use crate::optimization::demands::DemandCalculator;
use crate::optimization::flow_mapper::FlowMapper;
use crate::optimization::mcf::MultiCommodityFlow;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative flow per origin station and next hop.
pub type FlowMap = BTreeMap<StationId, BTreeMap<StationId, f64>>;

/// Index of a path in a job's path arena.
pub type PathId = usize;

/// Parameters a job is computed with, fixed at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    pub epsilon: f64,
    /// Distance normaliser for demand decay, map width plus height.
    pub max_distance: u32,
    pub distribution: DistributionType,
    /// Date at which the result is due.
    pub join_date: Date,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAnnotation {
    /// Supply not yet assigned to any demand.
    pub undelivered_supply: u32,
    pub flows: FlowMap,
    /// Paths ending at this node.
    pub paths: Vec<PathId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeAnnotation {
    pub demand: u32,
    pub flow: f64,
    /// Demand that could not be routed at all.
    pub unsatisfied_demand: u32,
}

/// One step of a flow tree: the flow from `origin` that reaches `node`
/// through the node of `parent`. Routes repeating a step accumulate into the
/// same path, so `flow` is the total over all phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub node: NodeId,
    pub origin: NodeId,
    /// `None` for the root of a tree.
    pub parent: Option<PathId>,
    /// Bottleneck capacity from the origin.
    pub capacity: f64,
    /// Smallest remaining capacity along the way when the path was routed.
    pub free_capacity: f64,
    pub distance: f64,
    pub flow: f64,
}

/// A processing step over a job.
pub trait ComponentHandler {
    fn run(&self, job: &mut LinkGraphJob);
}

/// Outcome of [`LinkGraphJob::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub stations_updated: usize,
    pub stations_purged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkGraphJob {
    component: Component,
    settings: JobSettings,
    nodes: Vec<NodeAnnotation>,
    edges: Vec<EdgeAnnotation>,
    paths: Vec<Path>,
}

impl LinkGraphJob {
    pub fn new(component: Component, settings: JobSettings) -> Self {
        let size = component.size();
        let nodes = component
            .nodes()
            .iter()
            .map(|n| NodeAnnotation {
                undelivered_supply: n.supply,
                ..Default::default()
            })
            .collect();
        Self {
            component,
            settings,
            nodes,
            edges: vec![EdgeAnnotation::default(); size * size],
            paths: Vec::new(),
        }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub fn join_date(&self) -> Date {
        self.settings.join_date
    }

    pub fn size(&self) -> usize {
        self.component.size()
    }

    pub fn node(&self, id: NodeId) -> &NodeAnnotation {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeAnnotation {
        &mut self.nodes[id]
    }

    pub fn edge(&self, from: NodeId, to: NodeId) -> &EdgeAnnotation {
        &self.edges[from * self.size() + to]
    }

    pub fn edge_mut(&mut self, from: NodeId, to: NodeId) -> &mut EdgeAnnotation {
        let size = self.size();
        &mut self.edges[from * size + to]
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn path(&self, id: PathId) -> &Path {
        &self.paths[id]
    }

    pub fn path_mut(&mut self, id: PathId) -> &mut Path {
        &mut self.paths[id]
    }

    /// Store a path and attach it to its node.
    pub fn add_path(&mut self, path: Path) -> PathId {
        let id = self.paths.len();
        self.nodes[path.node].paths.push(id);
        self.paths.push(path);
        id
    }

    /// Total demand over all edges.
    pub fn total_demand(&self) -> u64 {
        self.edges.iter().map(|e| e.demand as u64).sum()
    }

    /// Run demand calculation, flow solving and flow mapping.
    pub fn run(&mut self) {
        let handlers: [&dyn ComponentHandler; 3] = [&DemandCalculator, &MultiCommodityFlow, &FlowMapper];
        for handler in handlers {
            handler.run(self);
        }
    }

    /// Write the computed flows into the stations' goods entries.
    ///
    /// Stations removed while the job ran are skipped, and every flow that
    /// would route through or originate at them is purged. Each origin's
    /// flows are scaled so that its outgoing total matches its supply, then
    /// floored to whole units.
    pub fn commit(&self, stations: &mut StationPool) -> CommitReport {
        let cargo = self.component.cargo();
        let gone: Vec<StationId> = self
            .component
            .nodes()
            .iter()
            .map(|n| n.station)
            .filter(|st| !stations.contains(*st))
            .collect();
        for station in &gone {
            warn!("{}: station {} vanished while its component was processed", cargo, station);
        }

        let factors: BTreeMap<StationId, f64> = (0..self.size())
            .filter_map(|origin| {
                let station = self.component.node(origin).station;
                let outflow: f64 = self.nodes[origin]
                    .flows
                    .get(&station)
                    .map_or(0.0, |vias| vias.values().sum());
                (outflow > 0.0).then(|| (station, self.component.node(origin).supply as f64 / outflow))
            })
            .collect();

        let mut report = CommitReport {
            stations_purged: gone.len(),
            ..Default::default()
        };
        for (id, annotation) in self.nodes.iter().enumerate() {
            let station = self.component.node(id).station;
            let Some(ge) = stations.goods_mut(station, cargo) else {
                continue;
            };
            let mut plan = FlowStatMap::new();
            for (origin, vias) in &annotation.flows {
                if gone.contains(origin) {
                    continue;
                }
                let factor = factors.get(origin).copied().unwrap_or(0.0);
                let set: FlowStatSet = vias
                    .iter()
                    .filter(|(via, _)| !gone.contains(via))
                    .map(|(via, flow)| FlowStat::new(*via, (flow * factor).floor() as u32, 0))
                    .filter(|stat| stat.planned() > 0)
                    .collect();
                if !set.is_empty() {
                    plan.insert(*origin, set);
                }
            }
            ge.flows = plan;
            report.stations_updated += 1;
        }
        info!(
            "{}: committed component {} ({} stations, {} purged)",
            cargo,
            self.component.colour(),
            report.stations_updated,
            report.stations_purged
        );
        report
    }
}

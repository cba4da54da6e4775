//! Multicommodity flow over a job's component.
//!
//! A Garg–Könemann fractional packing solver in Karakostas' per-source
//! formulation. Each commodity is an ordered node pair with demand. Edges
//! carry a length label that grows exponentially with the flow pushed over
//! them, so later phases avoid saturated links. The solver stops once the
//! potential `D = sum(length * capacity)` reaches 1.
//!
//! Absolute flow values are not meaningful on their own: demands are
//! prescaled and the final flows divided by a common factor, which keeps the
//! ratios intact and brings every edge within its capacity.

use crate::graph::component::NodeId;
use crate::optimization::job::{ComponentHandler, LinkGraphJob, Path, PathId};
use log::{debug, trace};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::ops::Range;

/// A flow tree step: origin, node and the node it was reached from.
type PathKey = (NodeId, NodeId, Option<NodeId>);

/// Label attached to a node by [`priority_first_search`].
pub trait Annotation: Copy + std::fmt::Debug {
    /// Label of the search origin.
    fn origin() -> Self;

    /// Label after following an edge with the given length and capacity.
    fn extend(&self, length: f64, capacity: f64) -> Self;

    /// Whether `self` should replace `other`.
    fn is_better(&self, other: &Self) -> bool;

    /// Heap priority; the largest key is settled first.
    fn key(&self) -> f64;

    fn distance(&self) -> f64;

    fn capacity(&self) -> f64;
}

/// Shortest path first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceAnnotation {
    pub distance: f64,
    pub capacity: f64,
}

impl Annotation for DistanceAnnotation {
    fn origin() -> Self {
        Self {
            distance: 0.0,
            capacity: f64::INFINITY,
        }
    }

    fn extend(&self, length: f64, capacity: f64) -> Self {
        Self {
            distance: self.distance + length,
            capacity: self.capacity.min(capacity),
        }
    }

    fn is_better(&self, other: &Self) -> bool {
        self.distance < other.distance
    }

    fn key(&self) -> f64 {
        -self.distance
    }

    fn distance(&self) -> f64 {
        self.distance
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Widest path first, shorter distance breaks ties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityAnnotation {
    pub capacity: f64,
    pub distance: f64,
}

impl Annotation for CapacityAnnotation {
    fn origin() -> Self {
        Self {
            capacity: f64::INFINITY,
            distance: 0.0,
        }
    }

    fn extend(&self, length: f64, capacity: f64) -> Self {
        Self {
            capacity: self.capacity.min(capacity),
            distance: self.distance + length,
        }
    }

    fn is_better(&self, other: &Self) -> bool {
        self.capacity > other.capacity || (self.capacity == other.capacity && self.distance < other.distance)
    }

    fn key(&self) -> f64 {
        self.capacity
    }

    fn distance(&self) -> f64 {
        self.distance
    }

    fn capacity(&self) -> f64 {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    key: f64,
    node: NodeId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // lower node index first on equal keys
        self.key.total_cmp(&other.key).then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Capacity and per-edge weights of a dense graph.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    size: usize,
    capacity: Vec<f64>,
    neighbours: Vec<Vec<NodeId>>,
}

impl FlowGraph {
    /// Graph of the job's edges that carry capacity.
    pub fn from_job(job: &LinkGraphJob) -> Self {
        let size = job.size();
        let mut capacity = vec![0.0; size * size];
        let mut neighbours = vec![Vec::new(); size];
        for (from, to, edge) in job.component().links() {
            if from != to {
                capacity[from * size + to] = edge.capacity as f64;
                neighbours[from].push(to);
            }
        }
        Self {
            size,
            capacity,
            neighbours,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self, from: NodeId, to: NodeId) -> f64 {
        self.capacity[from * self.size + to]
    }

    pub fn edge_count(&self) -> usize {
        self.neighbours.iter().map(Vec::len).sum()
    }

    fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.neighbours
            .iter()
            .enumerate()
            .flat_map(|(from, tos)| tos.iter().map(move |&to| (from, to)))
    }
}

/// Result of a [`priority_first_search`]: a label and tree parent per node.
#[derive(Debug, Clone)]
pub struct SearchTree<A> {
    pub labels: Vec<Option<A>>,
    pub parents: Vec<Option<NodeId>>,
}

impl<A: Annotation> SearchTree<A> {
    /// Nodes from `source` to `target`, or `None` if unreachable.
    pub fn route(&self, target: NodeId) -> Option<Vec<NodeId>> {
        self.labels[target]?;
        let mut route = vec![target];
        let mut node = target;
        while let Some(parent) = self.parents[node] {
            route.push(parent);
            node = parent;
        }
        route.reverse();
        Some(route)
    }
}

/// Generic label-setting search from `source`. `weights` holds the length of
/// every `(from, to)` edge in row-major order; which label wins is up to the
/// annotation type.
pub fn priority_first_search<A: Annotation>(graph: &FlowGraph, source: NodeId, weights: &[f64]) -> SearchTree<A> {
    let size = graph.size();
    let mut labels: Vec<Option<A>> = vec![None; size];
    let mut parents = vec![None; size];
    let mut settled = vec![false; size];
    let mut heap = BinaryHeap::new();

    labels[source] = Some(A::origin());
    heap.push(HeapEntry {
        key: A::origin().key(),
        node: source,
    });

    while let Some(HeapEntry { node, .. }) = heap.pop() {
        if settled[node] {
            continue;
        }
        settled[node] = true;
        let Some(label) = labels[node] else { continue };
        for &to in &graph.neighbours[node] {
            if settled[to] {
                continue;
            }
            let index = node * size + to;
            let candidate = label.extend(weights[index], graph.capacity[index]);
            if labels[to].map_or(true, |current| candidate.is_better(&current)) {
                labels[to] = Some(candidate);
                parents[to] = Some(node);
                heap.push(HeapEntry {
                    key: candidate.key(),
                    node: to,
                });
            }
        }
    }
    SearchTree { labels, parents }
}

/// One commodity: demand from `from` to `to`, scaled for the solver.
#[derive(Debug, Clone, Copy)]
struct Commodity {
    from: NodeId,
    to: NodeId,
    demand: f64,
}

/// Garg–Könemann / Karakostas solver as a pipeline step.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiCommodityFlow;

impl ComponentHandler for MultiCommodityFlow {
    fn run(&self, job: &mut LinkGraphJob) {
        let size = job.size();
        if size < 2 {
            return;
        }
        let graph = FlowGraph::from_job(job);
        let m = graph.edge_count();
        let mut commodities: Vec<Commodity> = Vec::new();
        for from in 0..size {
            for to in 0..size {
                let demand = job.edge(from, to).demand;
                if from != to && demand > 0 {
                    commodities.push(Commodity {
                        from,
                        to,
                        demand: demand as f64,
                    });
                }
            }
        }
        if commodities.is_empty() {
            return;
        }
        if m == 0 {
            for c in &commodities {
                job.edge_mut(c.from, c.to).unsatisfied_demand = c.demand as u32;
            }
            return;
        }

        let distances: Vec<f64> = (0..size * size)
            .map(|i| job.component().edge(i / size, i % size).distance as f64)
            .collect();
        let Some(mut commodities) = prescale(job, &graph, &distances, commodities) else {
            return;
        };

        let epsilon = job.settings().epsilon;
        let k = commodities.len() as f64;
        let delta = (1.0 / (1.0 + k * epsilon).powf((1.0 - epsilon) / epsilon))
            * ((1.0 - epsilon) / m as f64).powf(1.0 / epsilon);
        let mut lengths = vec![0.0; size * size];
        for (from, to) in graph.edges() {
            lengths[from * size + to] = delta / graph.capacity(from, to);
        }

        // log_{1+eps}((1+eps)/delta) bounds the flow/capacity ratio of every edge
        let divisor = ((1.0 + epsilon) / delta).ln() / (1.0 + epsilon).ln();
        let stage = (divisor.ceil() as usize).max(1);

        let mut sources: Vec<(NodeId, Range<usize>)> = Vec::new();
        for (i, c) in commodities.iter().enumerate() {
            match sources.last_mut() {
                Some((from, range)) if *from == c.from => range.end = i + 1,
                _ => sources.push((c.from, i..i + 1)),
            }
        }

        let mut steps: BTreeMap<PathKey, PathId> = BTreeMap::new();
        let mut phases = 0usize;
        let mut total_length = potential(&graph, &lengths);
        'phases: while total_length < 1.0 {
            phases += 1;
            let mut routed = 0.0;
            for (source, range) in &sources {
                routed += route_from(
                    job,
                    &graph,
                    &mut lengths,
                    &commodities[range.clone()],
                    *source,
                    epsilon,
                    &mut steps,
                );
                total_length = potential(&graph, &lengths);
                if total_length >= 1.0 {
                    break 'phases;
                }
            }
            trace!("mcf phase {}: routed {:.4}, potential {:.6}", phases, routed, total_length);
            if routed <= 0.0 {
                break;
            }
            // a whole stage without saturating means the demands are far
            // below what the network carries
            if phases % stage == 0 {
                for commodity in &mut commodities {
                    commodity.demand *= 2.0;
                }
            }
        }

        for (from, to) in graph.edges() {
            job.edge_mut(from, to).flow /= divisor;
        }
        for id in 0..job.paths().len() {
            job.path_mut(id).flow /= divisor;
        }
        debug!(
            "{}: component {} solved in {} phases, {} commodities, {} paths",
            job.component().cargo(),
            job.component().colour(),
            phases,
            commodities.len(),
            job.paths().len()
        );
    }
}

fn potential(graph: &FlowGraph, lengths: &[f64]) -> f64 {
    graph
        .edges()
        .map(|(from, to)| lengths[from * graph.size() + to] * graph.capacity(from, to))
        .sum()
}

/// Drop unroutable commodities (booking them as unsatisfied) and scale the
/// remaining demands so that none exceeds its widest path. Returns `None`
/// if nothing is routable.
fn prescale(
    job: &mut LinkGraphJob,
    graph: &FlowGraph,
    distances: &[f64],
    commodities: Vec<Commodity>,
) -> Option<Vec<Commodity>> {
    let mut min_ratio = f64::INFINITY;
    let mut routable = Vec::with_capacity(commodities.len());
    let mut tree: Option<(NodeId, SearchTree<CapacityAnnotation>)> = None;

    for commodity in commodities {
        if tree.as_ref().map_or(true, |(source, _)| *source != commodity.from) {
            tree = Some((commodity.from, priority_first_search(graph, commodity.from, distances)));
        }
        let Some((_, widest)) = tree.as_ref() else { continue };
        match widest.labels[commodity.to] {
            Some(label) if label.capacity > 0.0 => {
                min_ratio = min_ratio.min(label.capacity / commodity.demand);
                routable.push(commodity);
            }
            _ => {
                job.edge_mut(commodity.from, commodity.to).unsatisfied_demand = commodity.demand as u32;
            }
        }
    }
    if routable.is_empty() {
        return None;
    }
    let scale = min_ratio / routable.len() as f64;
    for commodity in &mut routable {
        commodity.demand *= scale;
    }
    Some(routable)
}

/// Route every commodity of `source` once along a shortest path tree.
/// Returns the total flow routed.
///
/// A tree step that was taken in an earlier phase adds to its existing path
/// instead of storing a new one, so a job holds at most one path per origin
/// and edge.
fn route_from(
    job: &mut LinkGraphJob,
    graph: &FlowGraph,
    lengths: &mut [f64],
    commodities: &[Commodity],
    source: NodeId,
    epsilon: f64,
    steps: &mut BTreeMap<PathKey, PathId>,
) -> f64 {
    let size = graph.size();
    let tree: SearchTree<DistanceAnnotation> = priority_first_search(graph, source, lengths);

    // tree load: what has to pass through each node's incoming tree edge
    let mut load = vec![0.0; size];
    let mut wanted = 0.0;
    for c in commodities {
        if tree.labels[c.to].is_none() {
            continue;
        }
        wanted += c.demand;
        let mut node = c.to;
        loop {
            load[node] += c.demand;
            match tree.parents[node] {
                Some(parent) => node = parent,
                None => break,
            }
        }
    }
    if wanted <= 0.0 {
        return 0.0;
    }

    let mut sigma: f64 = 1.0;
    for node in 0..size {
        if let Some(parent) = tree.parents[node] {
            if load[node] > 0.0 {
                sigma = sigma.max(load[node] / graph.capacity(parent, node));
            }
        }
    }

    let mut path_of: Vec<Option<PathId>> = vec![None; size];
    for node in order_by_depth(&tree, &load) {
        let flow = load[node] / sigma;
        let parent_path = tree.parents[node].and_then(|parent| path_of[parent]);
        let free_capacity = match tree.parents[node] {
            Some(parent) => {
                let index = parent * size + node;
                let free = graph.capacity(parent, node) - job.edge(parent, node).flow;
                lengths[index] *= 1.0 + epsilon * flow / graph.capacity(parent, node);
                job.edge_mut(parent, node).flow += flow;
                let inherited = parent_path.map_or(f64::INFINITY, |p| job.path(p).free_capacity);
                inherited.min(free)
            }
            None => f64::INFINITY,
        };
        let key = (source, node, tree.parents[node]);
        let id = match steps.get(&key) {
            Some(&id) => {
                let path = job.path_mut(id);
                path.flow += flow;
                path.free_capacity = path.free_capacity.min(free_capacity);
                id
            }
            None => {
                let label = tree.labels[node].unwrap_or_else(DistanceAnnotation::origin);
                let id = job.add_path(Path {
                    node,
                    origin: source,
                    parent: parent_path,
                    capacity: label.capacity,
                    free_capacity,
                    distance: label.distance,
                    flow,
                });
                steps.insert(key, id);
                id
            }
        };
        path_of[node] = Some(id);
    }
    wanted / sigma
}

/// Loaded tree nodes, parents before children.
fn order_by_depth<A: Annotation>(tree: &SearchTree<A>, load: &[f64]) -> Vec<NodeId> {
    let depth = |mut node: NodeId| {
        let mut depth = 0;
        while let Some(parent) = tree.parents[node] {
            depth += 1;
            node = parent;
        }
        depth
    };
    let mut nodes: Vec<(usize, NodeId)> = (0..load.len())
        .filter(|&node| load[node] > 0.0)
        .map(|node| (depth(node), node))
        .collect();
    nodes.sort_unstable();
    nodes.into_iter().map(|(_, node)| node).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{CargoId, StationId, Tile};
    use crate::core::settings::DistributionType;
    use crate::graph::component::{Component, Node};
    use crate::optimization::job::JobSettings;
    use approx::assert_relative_eq;

    fn job(positions: &[u32], links: &[(usize, usize, u32)]) -> LinkGraphJob {
        let nodes = positions
            .iter()
            .enumerate()
            .map(|(i, x)| Node::new(StationId::new(i as u32, 0), Tile::new(*x, 0), 0, true))
            .collect();
        let mut component = Component::new(CargoId(0), 0, nodes);
        for &(from, to, capacity) in links {
            component.add_edge(from, to, capacity, 0);
        }
        let settings = JobSettings {
            epsilon: 0.25,
            max_distance: 100,
            distribution: DistributionType::Symmetric,
            join_date: 0,
        };
        LinkGraphJob::new(component, settings)
    }

    #[test]
    fn test_single_edge_respects_capacity() {
        let mut job = job(&[0, 10], &[(0, 1, 10)]);
        job.edge_mut(0, 1).demand = 5;
        MultiCommodityFlow.run(&mut job);
        let flow = job.edge(0, 1).flow;
        assert!(flow > 0.0);
        assert!(flow <= 10.0 * 1.25, "flow {} exceeds capacity", flow);
        assert_eq!(job.edge(0, 1).unsatisfied_demand, 0);
    }

    #[test]
    fn test_repeated_routes_share_paths() {
        let mut job = job(&[0, 10, 20], &[(0, 1, 10), (1, 2, 10)]);
        job.edge_mut(0, 2).demand = 5;
        MultiCommodityFlow.run(&mut job);
        // origin root, 0 -> 1 and 1 -> 2, however many phases ran
        assert_eq!(job.paths().len(), 3);
        let leaf = job.node(2).paths[0];
        assert_relative_eq!(job.path(leaf).flow, job.edge(1, 2).flow, max_relative = 1e-9);
    }

    #[test]
    fn test_flows_follow_demand_ratio() {
        let mut job = job(&[0, 10, 20], &[(0, 1, 100), (0, 2, 100)]);
        job.edge_mut(0, 1).demand = 30;
        job.edge_mut(0, 2).demand = 10;
        MultiCommodityFlow.run(&mut job);
        let ratio = job.edge(0, 1).flow / job.edge(0, 2).flow;
        assert_relative_eq!(ratio, 3.0, max_relative = 1e-9);
    }

    #[test]
    fn test_routes_around_missing_direct_link() {
        let mut job = job(&[0, 10, 20], &[(0, 1, 50), (1, 2, 50)]);
        job.edge_mut(0, 2).demand = 20;
        MultiCommodityFlow.run(&mut job);
        assert!(job.edge(0, 1).flow > 0.0);
        assert_relative_eq!(job.edge(0, 1).flow, job.edge(1, 2).flow, max_relative = 1e-9);
        let leaf = job.node(2).paths.clone();
        assert!(!leaf.is_empty());
        let parent = job.path(leaf[0]).parent.unwrap();
        assert_eq!(job.path(parent).node, 1);
    }

    #[test]
    fn test_unreachable_pair_is_unsatisfied() {
        let mut job = job(&[0, 10, 20], &[(0, 1, 50)]);
        job.edge_mut(0, 1).demand = 5;
        job.edge_mut(1, 2).demand = 7;
        MultiCommodityFlow.run(&mut job);
        assert_eq!(job.edge(1, 2).unsatisfied_demand, 7);
        assert!(job.edge(0, 1).flow > 0.0);
    }

    #[test]
    fn test_degenerate_inputs_are_noops() {
        let mut no_demand = job(&[0, 10], &[(0, 1, 10)]);
        MultiCommodityFlow.run(&mut no_demand);
        assert!(no_demand.paths().is_empty());

        let mut no_edges = job(&[0, 10], &[]);
        no_edges.edge_mut(0, 1).demand = 3;
        MultiCommodityFlow.run(&mut no_edges);
        assert!(no_edges.paths().is_empty());
        assert_eq!(no_edges.edge(0, 1).unsatisfied_demand, 3);

        let mut single = job(&[0], &[]);
        MultiCommodityFlow.run(&mut single);
        assert!(single.paths().is_empty());
    }

    #[test]
    fn test_shared_bottleneck_stays_feasible() {
        // two commodities compete for the 1 -> 2 link
        let mut job = job(&[0, 10, 20, 30], &[(0, 1, 100), (3, 1, 100), (1, 2, 10)]);
        job.edge_mut(0, 2).demand = 50;
        job.edge_mut(3, 2).demand = 50;
        MultiCommodityFlow.run(&mut job);
        assert!(job.edge(1, 2).flow <= 10.0 * 1.25);
        // the last phase may stop between the two sources
        assert_relative_eq!(job.edge(0, 1).flow, job.edge(3, 1).flow, max_relative = 0.1);
    }

    #[test]
    fn test_widest_path_search() {
        let job = job(&[0, 10, 20], &[(0, 1, 5), (1, 2, 5), (0, 2, 3)]);
        let graph = FlowGraph::from_job(&job);
        let weights = vec![1.0; 9];
        let tree: SearchTree<CapacityAnnotation> = priority_first_search(&graph, 0, &weights);
        assert_eq!(tree.labels[2].unwrap().capacity, 5.0);
        assert_eq!(tree.route(2), Some(vec![0, 1, 2]));

        let shortest: SearchTree<DistanceAnnotation> = priority_first_search(&graph, 0, &weights);
        assert_eq!(shortest.route(2), Some(vec![0, 2]));
        assert_eq!(shortest.labels[2].unwrap().capacity, 3.0);
    }
}

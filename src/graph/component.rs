use crate::core::ids::{CargoId, StationId, Tile};
use serde::{Deserialize, Serialize};

/// Index of a node inside one component.
pub type NodeId = usize;

/// Component tag in a link graph's colour table.
pub type Colour = u16;

/// A station's participation in one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub station: StationId,
    pub xy: Tile,
    /// Monthly supply at the station.
    pub supply: u32,
    /// The station accepts the cargo for final delivery.
    pub acceptance: bool,
}

impl Node {
    pub fn new(station: StationId, xy: Tile, supply: u32, acceptance: bool) -> Self {
        Self {
            station,
            xy,
            supply,
            acceptance,
        }
    }
}

/// Directed relation between two nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub capacity: u32,
    pub usage: u32,
    /// Manhattan distance between the two stations, symmetric.
    pub distance: u32,
}

/// A connected set of stations for one cargo, snapshotted for a job.
///
/// Edges are stored in a dense row-major `n * n` matrix; components are
/// small, so lookups by `(from, to)` stay trivial. The diagonal is unused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    cargo: CargoId,
    colour: Colour,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl Component {
    /// Build a component without links; distances are filled in from the
    /// node positions.
    pub fn new(cargo: CargoId, colour: Colour, nodes: Vec<Node>) -> Self {
        let size = nodes.len();
        let mut component = Self {
            cargo,
            colour,
            nodes,
            edges: vec![Edge::default(); size * size],
        };
        component.calculate_distances();
        component
    }

    fn calculate_distances(&mut self) {
        let size = self.size();
        for from in 0..size {
            for to in (from + 1)..size {
                let distance = self.nodes[from].xy.manhattan(&self.nodes[to].xy);
                self.edges[from * size + to].distance = distance;
                self.edges[to * size + from].distance = distance;
            }
        }
    }

    /// Add observed capacity and usage to the `from -> to` edge.
    ///
    /// # Panics
    ///
    /// Panics on a self edge or an out-of-range node.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, capacity: u32, usage: u32) {
        assert!(from != to, "component edges must connect distinct nodes");
        let edge = self.edge_mut(from, to);
        edge.capacity = edge.capacity.saturating_add(capacity);
        edge.usage = edge.usage.saturating_add(usage);
    }

    pub fn cargo(&self) -> CargoId {
        self.cargo
    }

    pub fn colour(&self) -> Colour {
        self.colour
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edge(&self, from: NodeId, to: NodeId) -> &Edge {
        &self.edges[from * self.size() + to]
    }

    pub fn edge_mut(&mut self, from: NodeId, to: NodeId) -> &mut Edge {
        let size = self.size();
        &mut self.edges[from * size + to]
    }

    /// Node of `station`, if it is part of this component.
    pub fn node_of(&self, station: StationId) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.station == station)
    }

    /// Edges that carry capacity, as `(from, to, edge)`.
    pub fn links(&self) -> impl Iterator<Item = (NodeId, NodeId, &Edge)> {
        let size = self.size();
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.capacity > 0)
            .map(move |(i, e)| (i / size, i % size, e))
    }

    pub fn link_count(&self) -> usize {
        self.links().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component() -> Component {
        let nodes = vec![
            Node::new(StationId::new(0, 0), Tile::new(0, 0), 10, false),
            Node::new(StationId::new(1, 0), Tile::new(3, 4), 0, true),
            Node::new(StationId::new(2, 0), Tile::new(10, 0), 5, true),
        ];
        Component::new(CargoId(0), 1, nodes)
    }

    #[test]
    fn test_distances_are_symmetric() {
        let c = component();
        assert_eq!(c.edge(0, 1).distance, 7);
        assert_eq!(c.edge(1, 0).distance, 7);
        assert_eq!(c.edge(1, 2).distance, 11);
        assert_eq!(c.edge(0, 0).distance, 0);
    }

    #[test]
    fn test_add_edge_accumulates() {
        let mut c = component();
        c.add_edge(0, 1, 20, 5);
        c.add_edge(0, 1, 10, 5);
        assert_eq!(c.edge(0, 1).capacity, 30);
        assert_eq!(c.edge(0, 1).usage, 10);
        assert_eq!(c.edge(1, 0).capacity, 0);
        assert_eq!(c.link_count(), 1);
        let links: Vec<_> = c.links().map(|(f, t, _)| (f, t)).collect();
        assert_eq!(links, vec![(0, 1)]);
    }

    #[test]
    #[should_panic(expected = "distinct nodes")]
    fn test_self_edge_panics() {
        component().add_edge(2, 2, 1, 0);
    }

    #[test]
    fn test_node_of() {
        let c = component();
        assert_eq!(c.node_of(StationId::new(2, 0)), Some(2));
        assert_eq!(c.node_of(StationId::new(2, 1)), None);
    }
}

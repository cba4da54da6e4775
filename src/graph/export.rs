//! petgraph views of link networks and components.
//!
//! Used for DOT output in the CLI and as an independent connectivity check
//! of the incremental component discovery.

use crate::core::goods::LinkStat;
use crate::core::ids::{CargoId, StationId};
use crate::core::station::StationPool;
use crate::graph::component::{Component, Edge};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, BTreeSet};

/// The component as a petgraph graph; node indices match component nodes.
pub fn component_graph(component: &Component) -> DiGraph<StationId, Edge> {
    let mut graph = DiGraph::with_capacity(component.size(), component.link_count());
    let indices: Vec<NodeIndex> = component.nodes().iter().map(|n| graph.add_node(n.station)).collect();
    for (from, to, edge) in component.links() {
        graph.add_edge(indices[from], indices[to], *edge);
    }
    graph
}

/// DOT rendering of a component, labelled with station names, supply and
/// link capacity/usage.
pub fn to_dot(component: &Component, stations: &StationPool) -> String {
    let mut graph: DiGraph<String, String> = DiGraph::new();
    let indices: Vec<NodeIndex> = component
        .nodes()
        .iter()
        .map(|n| {
            let name = stations.get(n.station).map_or_else(|| n.station.to_string(), |st| st.name.clone());
            graph.add_node(format!("{} (supply {})", name, n.supply))
        })
        .collect();
    for (from, to, edge) in component.links() {
        graph.add_edge(indices[from], indices[to], format!("{}/{}", edge.usage, edge.capacity));
    }
    format!("{}", Dot::new(&graph))
}

/// All live links of `cargo` as a graph over the stations that have any.
pub fn link_network(stations: &StationPool, cargo: CargoId) -> DiGraph<StationId, LinkStat> {
    let mut graph = DiGraph::new();
    let mut index_of: BTreeMap<StationId, NodeIndex> = BTreeMap::new();
    let mut node = |graph: &mut DiGraph<StationId, LinkStat>, id: StationId| {
        *index_of.entry(id).or_insert_with(|| graph.add_node(id))
    };
    for station in stations.iter() {
        let Some(ge) = station.goods(cargo) else { continue };
        for (from, stat) in &ge.link_stats {
            if stat.is_empty() || !stations.contains(*from) {
                continue;
            }
            let a = node(&mut graph, *from);
            let b = node(&mut graph, station.id());
            graph.add_edge(a, b, *stat);
        }
    }
    graph
}

/// Weakly connected station sets of the link network of `cargo`.
pub fn connected_station_sets(stations: &StationPool, cargo: CargoId) -> Vec<BTreeSet<StationId>> {
    let graph = link_network(stations, cargo);
    let mut sets = UnionFind::<usize>::new(graph.node_count());
    for edge in graph.raw_edges() {
        sets.union(edge.source().index(), edge.target().index());
    }
    let mut grouped: BTreeMap<usize, BTreeSet<StationId>> = BTreeMap::new();
    for index in graph.node_indices() {
        grouped.entry(sets.find(index.index())).or_default().insert(graph[index]);
    }
    grouped.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::Tile;
    use crate::graph::component::Node;

    #[test]
    fn test_component_graph_mirrors_links() {
        let nodes = vec![
            Node::new(StationId::new(0, 0), Tile::new(0, 0), 5, true),
            Node::new(StationId::new(1, 0), Tile::new(1, 0), 5, true),
        ];
        let mut component = Component::new(CargoId(0), 1, nodes);
        component.add_edge(0, 1, 7, 3);
        let graph = component_graph(&component);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.raw_edges()[0].weight.capacity, 7);
    }

    #[test]
    fn test_dot_contains_names_and_capacity() {
        let mut pool = StationPool::new();
        let a = pool.insert("Alpha", Tile::new(0, 0), 1).unwrap();
        let b = pool.insert("Beta", Tile::new(2, 0), 1).unwrap();
        let nodes = vec![
            Node::new(a, Tile::new(0, 0), 5, true),
            Node::new(b, Tile::new(2, 0), 0, true),
        ];
        let mut component = Component::new(CargoId(0), 1, nodes);
        component.add_edge(0, 1, 40, 12);
        let dot = to_dot(&component, &pool);
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("Alpha (supply 5)"));
        assert!(dot.contains("12/40"));
    }

    #[test]
    fn test_connected_station_sets() {
        let mut pool = StationPool::new();
        let ids: Vec<_> = (0..5).map(|i| pool.insert(format!("S{}", i), Tile::new(i, 0), 1).unwrap()).collect();
        pool.record_link(ids[0], ids[1], CargoId(0), 10, 0).unwrap();
        pool.record_link(ids[2], ids[1], CargoId(0), 10, 0).unwrap();
        pool.record_link(ids[3], ids[4], CargoId(0), 10, 0).unwrap();
        let sets = connected_station_sets(&pool, CargoId(0));
        assert_eq!(sets.len(), 2);
        assert!(sets.contains(&[ids[0], ids[1], ids[2]].into_iter().collect()));
        assert!(sets.contains(&[ids[3], ids[4]].into_iter().collect()));
    }
}

use crate::optimization::job::{ComponentHandler, LinkGraphJob};

/// Flows at or below this are numerical noise from the path bookkeeping.
const FLOW_EPSILON: f64 = 1e-9;

/// Turns the solver's path trees into per-node flow maps.
///
/// For every path step `parent -> node` carrying `flow` from `origin`:
/// the node books the flow as arriving via itself, the parent books it as
/// leaving via the node, and unless the parent is the origin it stops
/// counting that flow as consumed locally. Afterwards each node's map for
/// an origin sums to the flow from that origin passing through the node.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMapper;

impl ComponentHandler for FlowMapper {
    fn run(&self, job: &mut LinkGraphJob) {
        for id in 0..job.paths().len() {
            let path = job.path(id);
            let Some(parent) = path.parent else { continue };
            let (node, origin, flow) = (path.node, path.origin, path.flow);
            let prev = job.path(parent).node;

            let component = job.component();
            let origin_station = component.node(origin).station;
            let via = component.node(node).station;
            let prev_station = component.node(prev).station;

            *job.node_mut(node)
                .flows
                .entry(origin_station)
                .or_default()
                .entry(via)
                .or_insert(0.0) += flow;

            let prev_flows = job.node_mut(prev).flows.entry(origin_station).or_default();
            *prev_flows.entry(via).or_insert(0.0) += flow;
            if prev_station != origin_station {
                *prev_flows.entry(prev_station).or_insert(0.0) -= flow;
            }
        }

        for id in 0..job.size() {
            let flows = &mut job.node_mut(id).flows;
            for vias in flows.values_mut() {
                vias.retain(|_, flow| *flow > FLOW_EPSILON);
            }
            flows.retain(|_, vias| !vias.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{CargoId, StationId, Tile};
    use crate::core::settings::DistributionType;
    use crate::graph::component::{Component, Node};
    use crate::optimization::job::{JobSettings, Path};
    use approx::assert_relative_eq;

    fn st(i: u32) -> StationId {
        StationId::new(i, 0)
    }

    fn job(size: u32) -> LinkGraphJob {
        let nodes = (0..size).map(|i| Node::new(st(i), Tile::new(i, 0), 0, true)).collect();
        let settings = JobSettings {
            epsilon: 0.25,
            max_distance: 100,
            distribution: DistributionType::Symmetric,
            join_date: 0,
        };
        LinkGraphJob::new(Component::new(CargoId(0), 0, nodes), settings)
    }

    fn path(node: usize, origin: usize, parent: Option<usize>, flow: f64) -> Path {
        Path {
            node,
            origin,
            parent,
            capacity: f64::INFINITY,
            free_capacity: f64::INFINITY,
            distance: 0.0,
            flow,
        }
    }

    #[test]
    fn test_chain_maps_to_next_hops() {
        // 0 -> 1 -> 2, 3 units end at 1 and 4 pass on to 2
        let mut job = job(3);
        let root = job.add_path(path(0, 0, None, 7.0));
        let mid = job.add_path(path(1, 0, Some(root), 7.0));
        job.add_path(path(2, 0, Some(mid), 4.0));
        FlowMapper.run(&mut job);

        let origin = st(0);
        assert_relative_eq!(job.node(0).flows[&origin][&st(1)], 7.0);
        assert_eq!(job.node(0).flows[&origin].len(), 1);
        assert_relative_eq!(job.node(1).flows[&origin][&st(1)], 3.0);
        assert_relative_eq!(job.node(1).flows[&origin][&st(2)], 4.0);
        assert_relative_eq!(job.node(2).flows[&origin][&st(2)], 4.0);
    }

    #[test]
    fn test_pure_transit_node_drops_local_entry() {
        let mut job = job(3);
        let root = job.add_path(path(0, 0, None, 5.0));
        let mid = job.add_path(path(1, 0, Some(root), 5.0));
        job.add_path(path(2, 0, Some(mid), 5.0));
        FlowMapper.run(&mut job);
        assert!(!job.node(1).flows[&st(0)].contains_key(&st(1)));
    }

    #[test]
    fn test_roots_alone_map_nothing() {
        let mut job = job(2);
        job.add_path(path(0, 0, None, 5.0));
        FlowMapper.run(&mut job);
        assert!(job.node(0).flows.is_empty());
    }
}

use crate::core::settings::DistributionType;
use crate::graph::component::NodeId;
use crate::optimization::job::{ComponentHandler, LinkGraphJob};
use log::debug;
use std::collections::VecDeque;

/// Derives the demand matrix of a job from the nodes' supply.
///
/// Demand between two nodes grows with both supplies and decays linearly
/// with distance, normalised by the job's `max_distance`. No node is ever
/// assigned more demand than its supply.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemandCalculator;

impl ComponentHandler for DemandCalculator {
    fn run(&self, job: &mut LinkGraphJob) {
        match job.settings().distribution {
            DistributionType::Symmetric => calc_symmetric(job),
            DistributionType::Asymmetric => calc_asymmetric(job),
            DistributionType::Manual => {}
        }
        debug!(
            "{}: component {} demand {} over {} nodes",
            job.component().cargo(),
            job.component().colour(),
            job.total_demand(),
            job.size()
        );
    }
}

/// Symmetric demand: every allocation is booked on both directions of a
/// pair and taken from both nodes' supply.
fn calc_symmetric(job: &mut LinkGraphJob) {
    let max_distance = job.settings().max_distance.max(1) as u64;
    let mut queue: VecDeque<NodeId> = (0..job.size())
        .filter(|&id| job.component().node(id).supply > 0)
        .collect();
    let supply_sum: u64 = queue.iter().map(|&id| job.component().node(id).supply as u64).sum();

    while queue.len() > 1 {
        let Some(from) = queue.pop_front() else { break };
        let mut from_done = false;
        let mut i = 0;
        while i < queue.len() {
            let to = queue[i];
            let from_supply = job.component().node(from).supply as u64;
            let to_supply = job.component().node(to).supply as u64;
            let distance = job.component().edge(from, to).distance as u64;

            let mut demand =
                from_supply * to_supply * max_distance.saturating_sub(distance) / max_distance / supply_sum + 1;
            demand = demand
                .min(job.node(from).undelivered_supply as u64)
                .min(job.node(to).undelivered_supply as u64);
            let demand = demand as u32;

            job.edge_mut(from, to).demand += demand;
            job.edge_mut(to, from).demand += demand;
            job.node_mut(from).undelivered_supply -= demand;
            job.node_mut(to).undelivered_supply -= demand;

            if job.node(to).undelivered_supply == 0 {
                queue.remove(i);
            } else {
                i += 1;
            }
            if job.node(from).undelivered_supply == 0 {
                from_done = true;
                break;
            }
        }
        if !from_done {
            queue.push_back(from);
        }
    }
}

/// Asymmetric demand: each supplying node spreads its supply over the
/// accepting nodes, round robin, and demand only runs forward.
fn calc_asymmetric(job: &mut LinkGraphJob) {
    let max_distance = job.settings().max_distance.max(1) as u64;
    let accepting: Vec<NodeId> = (0..job.size())
        .filter(|&id| job.component().node(id).acceptance)
        .collect();

    for from in 0..job.size() {
        let supply = job.component().node(from).supply as u64;
        let targets: Vec<NodeId> = accepting.iter().copied().filter(|&to| to != from).collect();
        if supply == 0 || targets.is_empty() {
            continue;
        }
        let num_demands = targets.len() as u64;
        while job.node(from).undelivered_supply > 0 {
            for &to in &targets {
                let undelivered = job.node(from).undelivered_supply;
                if undelivered == 0 {
                    break;
                }
                let distance = job.component().edge(from, to).distance as u64;
                let share = (supply * max_distance.saturating_sub(distance) / max_distance / num_demands).max(1);
                let share = share.min(undelivered as u64) as u32;
                job.edge_mut(from, to).demand += share;
                job.node_mut(from).undelivered_supply -= share;
            }
        }
    }
}

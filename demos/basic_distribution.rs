//! Basic cargo distribution example.
//!
//! Three stations linked in a triangle: a mine supplies cargo that two
//! towns accept. The engine plans how much of the mine's output goes where
//! and through which next hop.

use distribution_engine::core::cargo_list::{OrderUnloadFlags, UnloadDescription, UnloadFlags, VehicleCargoList};
use distribution_engine::core::cargo_packet::CargoPacket;
use distribution_engine::core::ids::{CargoId, SourceType, Tile};
use distribution_engine::core::settings::{DistributionSettings, DistributionType};
use distribution_engine::engine::DistributionEngine;
use distribution_engine::graph::export::to_dot;
use distribution_engine::graph::link_graph::LinkGraph;

fn main() {
    println!("╔══════════════════════════════════════════════════╗");
    println!("║  distribution-engine: Basic Distribution Example ║");
    println!("╚══════════════════════════════════════════════════╝\n");

    let coal = CargoId(0);
    let settings = DistributionSettings {
        num_cargo: 1,
        distribution: DistributionType::Asymmetric,
        ..Default::default()
    };
    let mut engine = DistributionEngine::new(settings, 64, 64)
        .expect("default settings are valid")
        .with_inline_jobs();

    let mine = engine.add_station("Mine", Tile::new(0, 0)).expect("room for stations");
    let north = engine.add_station("Northtown", Tile::new(10, 0)).expect("room for stations");
    let south = engine.add_station("Southtown", Tile::new(5, 5)).expect("room for stations");

    engine.set_supply(mine, coal, 100).expect("mine exists");
    engine.set_acceptance(north, coal, true).expect("town exists");
    engine.set_acceptance(south, coal, true).expect("town exists");
    for (from, to) in [(mine, north), (north, mine), (mine, south), (south, mine), (north, south), (south, north)] {
        engine.record_link(from, to, coal, 50, 0).expect("stations exist");
    }

    // --- The component the engine will plan ---
    println!("━━━ Link Graph ━━━\n");
    let mut graph = LinkGraph::new(coal);
    graph.next_component(engine.stations(), engine.job_settings(coal), None);
    for job in graph.pending() {
        println!("{}", to_dot(job.component(), engine.stations()));
    }

    // --- Planning ---
    println!("━━━ Routing Plans ━━━\n");
    let report = engine.recalculate_all();
    println!("  Stations updated: {}\n", report.stations_updated);

    for station in engine.stations().iter() {
        let Some(ge) = station.goods(coal) else { continue };
        for (origin, set) in &ge.flows {
            let origin_name = engine.stations().get(*origin).map_or("?", |st| st.name.as_str());
            for stat in set.iter() {
                let via = engine.stations().get(stat.via()).map_or("?", |st| st.name.as_str());
                let action = if stat.via() == station.id() { "deliver here" } else { "pass on" };
                println!(
                    "  at {:<10} cargo from {:<10} via {:<10} {:>4} units ({})",
                    station.name,
                    origin_name,
                    via,
                    stat.planned(),
                    action
                );
            }
        }
    }

    // --- An unload decision ---
    println!("\n━━━ Unloading at Northtown ━━━\n");
    let goods = engine.goods(north, coal).expect("town exists");
    let packet = CargoPacket::new(mine, Tile::new(0, 0), 20, SourceType::Industry, 0);
    let desc = UnloadDescription {
        curr_station: north,
        next_station: south,
        flags: UnloadFlags::new(OrderUnloadFlags::default(), goods.accepts()),
    };
    let decision = VehicleCargoList::will_unload(&desc, &goods.flows, &packet);
    println!("  A train from the mine heading on to Southtown: {:?}", decision);
}

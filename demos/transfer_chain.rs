//! Transfer chain example.
//!
//! Cargo from a mine reaches a mill only by changing vehicles at a hub.
//! Until the first plan is committed the shuttles just carry the cargo back
//! and forth; afterwards the hub transfers it and the mill receives it.

use distribution_engine::core::ids::CargoId;
use distribution_engine::simulation::scenario::Scenario;

const SCENARIO: &str = r#"{
    "map": { "width": 64, "height": 64 },
    "settings": { "num_cargo": 1, "distribution": "Asymmetric", "recalc_interval": 4 },
    "payment_rate": "0.5",
    "stations": [
        { "name": "Mine", "x": 0, "y": 0, "supply": { "0": 40 }, "production": { "0": 20 } },
        { "name": "Hub", "x": 12, "y": 0 },
        { "name": "Mill", "x": 24, "y": 6, "accepts": [0] }
    ],
    "vehicles": [
        { "route": ["Mine", "Hub"], "capacity": 60 },
        { "route": ["Hub", "Mill"], "capacity": 60 }
    ]
}"#;

fn main() {
    println!("╔═════════════════════════════════════════════╗");
    println!("║  distribution-engine: Transfer Chain Example ║");
    println!("╚═════════════════════════════════════════════╝\n");

    let scenario = Scenario::from_json(SCENARIO).expect("scenario is valid JSON");
    let mut sim = scenario.build().expect("scenario is consistent");
    let cargo = CargoId(0);

    println!("━━━ Daily Report ━━━\n");
    println!("  {:>4}  {:>8}  {:>11}  {:>9}  {:>8}", "day", "loaded", "transferred", "delivered", "income");
    for day in 0..20 {
        let report = sim.run_day().expect("stations stay valid");
        println!(
            "  {:>4}  {:>8}  {:>11}  {:>9}  {:>8}",
            day, report.loaded, report.transferred, report.delivered, report.income
        );
    }

    println!("\n━━━ Plans After 20 Days ━━━\n");
    let stations = sim.engine().stations();
    for station in stations.iter() {
        let Some(ge) = station.goods(cargo) else { continue };
        println!(
            "  {:<5} waiting {:>4}, links in: {}",
            station.name,
            ge.cargo.count(),
            ge.link_stats.len()
        );
        for (origin, set) in &ge.flows {
            for stat in set.iter() {
                println!(
                    "        from {} via {}: planned {}, sent {}",
                    stations.get(*origin).map_or("?", |st| st.name.as_str()),
                    stations.get(stat.via()).map_or("?", |st| st.name.as_str()),
                    stat.planned(),
                    stat.sent()
                );
            }
        }
    }

    let totals = sim.totals();
    println!("\n━━━ Totals ━━━\n");
    println!("  Delivered:    {}", totals.delivered);
    println!("  Transferred:  {}", totals.transferred);
    println!("  Income:       {}", totals.income);
    println!("  Still aboard: {}", sim.traffic().cargo_aboard());
}

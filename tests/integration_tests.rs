use distribution_engine::core::cargo_list::{
    OrderUnloadFlags, UnloadDescription, UnloadFlags, UnloadType, VehicleCargoList,
};
use distribution_engine::core::cargo_packet::CargoPacket;
use distribution_engine::core::ids::{CargoId, SourceType, StationId, Tile};
use distribution_engine::core::settings::{DistributionSettings, DistributionType};
use distribution_engine::core::station::StationPool;
use distribution_engine::engine::{DistributionEngine, EngineState};
use distribution_engine::graph::export::connected_station_sets;
use distribution_engine::simulation::scenario::{generate_random_network, NetworkConfig, Scenario};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const CARGO: CargoId = CargoId(0);

fn settings(distribution: DistributionType) -> DistributionSettings {
    DistributionSettings {
        num_cargo: 1,
        distribution,
        ..Default::default()
    }
}

/// A supplies 100 units, B and C accept; all three are 10 tiles apart and
/// linked pairwise in both directions with capacity 50.
fn triangle(engine: &mut DistributionEngine) -> (StationId, StationId, StationId) {
    let a = engine.add_station("A", Tile::new(0, 0)).unwrap();
    let b = engine.add_station("B", Tile::new(10, 0)).unwrap();
    let c = engine.add_station("C", Tile::new(5, 5)).unwrap();
    engine.set_supply(a, CARGO, 100).unwrap();
    engine.set_acceptance(b, CARGO, true).unwrap();
    engine.set_acceptance(c, CARGO, true).unwrap();
    for (from, to) in [(a, b), (b, a), (a, c), (c, a), (b, c), (c, b)] {
        engine.record_link(from, to, CARGO, 50, 0).unwrap();
    }
    (a, b, c)
}

fn planned_from(engine: &DistributionEngine, station: StationId, origin: StationId) -> u64 {
    engine
        .goods(station, CARGO)
        .unwrap()
        .flows
        .get(&origin)
        .map_or(0, |set| set.total_planned())
}

/// Full pipeline: links → component → demand → flow → plans → unload decision.
#[test]
fn end_to_end_three_stations() {
    let mut engine = DistributionEngine::new(settings(DistributionType::Asymmetric), 64, 64)
        .unwrap()
        .with_inline_jobs();
    let (a, b, c) = triangle(&mut engine);

    let report = engine.recalculate_all();
    assert_eq!(report.stations_updated, 3);
    assert_eq!(report.stations_purged, 0);

    let from_a = planned_from(&engine, a, a);
    assert!(from_a > 0 && from_a <= 100, "A plans {} units", from_a);
    for station in [b, c] {
        let planned = planned_from(&engine, station, a);
        assert!(planned > 0, "{} has no plan for cargo from A", station);
        assert!(planned <= 100);
    }

    // a vehicle carrying A's cargo stops at B on its way to C
    let b_goods = engine.goods(b, CARGO).unwrap();
    let via = b_goods.via(a);
    let packet = CargoPacket::new(a, Tile::new(0, 0), 10, SourceType::Industry, 0);
    let desc = UnloadDescription {
        curr_station: b,
        next_station: c,
        flags: UnloadFlags::new(OrderUnloadFlags::default(), b_goods.accepts()),
    };
    let decision = VehicleCargoList::will_unload(&desc, &b_goods.flows, &packet);
    if via == b {
        assert_eq!(decision, UnloadType::Deliver);
    } else if via == c {
        assert_eq!(decision, UnloadType::Keep);
    } else {
        assert_eq!(decision, UnloadType::Transfer);
    }
}

#[test]
fn symmetric_network_plans_both_directions() {
    let mut engine = DistributionEngine::new(settings(DistributionType::Symmetric), 64, 64)
        .unwrap()
        .with_inline_jobs();
    let (a, b, c) = triangle(&mut engine);
    engine.set_supply(b, CARGO, 100).unwrap();
    engine.set_acceptance(a, CARGO, true).unwrap();
    engine.recalculate_all();

    assert!(planned_from(&engine, a, a) > 0);
    assert!(planned_from(&engine, b, b) > 0);
    // C has no supply of its own
    assert_eq!(planned_from(&engine, c, c), 0);
}

#[test]
fn scheduled_planning_matches_components() {
    let mut engine = DistributionEngine::new(settings(DistributionType::Asymmetric), 64, 64)
        .unwrap()
        .with_inline_jobs();
    let (a, _, _) = triangle(&mut engine);
    let d = engine.add_station("D", Tile::new(40, 40)).unwrap();
    let e = engine.add_station("E", Tile::new(50, 40)).unwrap();
    engine.set_supply(d, CARGO, 30).unwrap();
    engine.set_acceptance(e, CARGO, true).unwrap();
    engine.record_link(d, e, CARGO, 20, 0).unwrap();

    assert_eq!(connected_station_sets(engine.stations(), CARGO).len(), 2);

    engine.advance_days(2);
    assert_eq!(engine.graph(CARGO).unwrap().pending_count(), 2);
    engine.advance_days(6);
    assert!(planned_from(&engine, a, a) > 0);
    assert!(planned_from(&engine, d, d) > 0);
}

#[test]
fn station_removed_while_job_pending() {
    // background workers: the job computes with B still present
    let mut engine = DistributionEngine::new(settings(DistributionType::Asymmetric), 64, 64).unwrap();
    let (a, b, c) = triangle(&mut engine);

    engine.advance_days(1);
    assert_eq!(engine.graph(CARGO).unwrap().pending_count(), 1);
    engine.remove_station(b).unwrap();
    engine.advance_days(6);

    for station in [a, c] {
        let flows = &engine.goods(station, CARGO).unwrap().flows;
        assert!(!flows.contains_key(&b));
        assert!(flows.values().all(|set| set.get(b).is_none()));
    }
    assert!(planned_from(&engine, c, a) > 0);
}

#[test]
fn engine_state_round_trip() {
    let mut engine = DistributionEngine::new(settings(DistributionType::Asymmetric), 64, 64)
        .unwrap()
        .with_inline_jobs();
    let (a, b, _) = triangle(&mut engine);
    engine.recalculate_all();
    engine
        .produce_cargo(a, CARGO, 70_000, SourceType::Industry, 3)
        .unwrap();
    engine.goods_mut(b, CARGO).unwrap().cargo.append(
        StationId::INVALID,
        CargoPacket::new(a, Tile::new(0, 0), 12, SourceType::Town, 1)
            .with_feeder_share(dec!(3.75))
            .with_days_in_transit(9),
    );

    let json = serde_json::to_string(engine.stations()).unwrap();
    let restored: StationPool = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, engine.stations());
    let a_goods = restored.goods(a, CARGO).unwrap();
    assert_eq!(a_goods.cargo.count(), 70_000);
    assert_eq!(restored.goods(b, CARGO).unwrap().cargo.feeder_share(), dec!(3.75));

    let json = serde_json::to_string(&engine.into_state()).unwrap();
    let state: EngineState = serde_json::from_str(&json).unwrap();
    let engine = DistributionEngine::from_state(state).unwrap();
    assert_eq!(engine.stations(), &restored);
}

const CHAIN: &str = r#"{
    "map": { "width": 64, "height": 64 },
    "settings": { "num_cargo": 1, "distribution": "Asymmetric" },
    "payment_rate": "1",
    "stations": [
        { "name": "Mine", "x": 0, "y": 0, "supply": { "0": 40 }, "production": { "0": 20 } },
        { "name": "Hub", "x": 10, "y": 0 },
        { "name": "Mill", "x": 20, "y": 0, "accepts": [0] }
    ],
    "vehicles": [
        { "route": ["Mine", "Hub"], "capacity": 60 },
        { "route": ["Hub", "Mill"], "capacity": 60 }
    ]
}"#;

#[test]
fn shuttle_traffic_transfers_along_chain() {
    let scenario = Scenario::from_json(CHAIN).unwrap();
    let mut sim = scenario.build().unwrap();
    let totals = sim.run_days(40).unwrap();

    let stations = sim.engine().stations();
    let mine = stations.find("Mine").unwrap();
    let hub = stations.find("Hub").unwrap();
    let mill = stations.find("Mill").unwrap();

    // vehicle movements created the links
    assert!(stations.goods(hub, CARGO).unwrap().link_stats.contains_key(&mine));
    assert!(stations.goods(mill, CARGO).unwrap().link_stats.contains_key(&hub));
    // the hub plans to pass the mine's cargo on to the mill
    assert_eq!(stations.goods(hub, CARGO).unwrap().via(mine), mill);

    assert!(totals.transferred > 0);
    assert!(totals.delivered > 0);
    assert!(totals.income > Decimal::ZERO);
}

#[test]
fn generated_network_conserves_cargo() {
    let config = NetworkConfig {
        station_count: 10,
        extra_links: 5,
        seed: Some(2024),
        ..Default::default()
    };
    let scenario = generate_random_network(&config);
    let daily: u64 = scenario
        .stations
        .iter()
        .flat_map(|st| st.production.values())
        .map(|amount| *amount as u64)
        .sum();

    let mut sim = scenario.build().unwrap();
    let days = 25;
    let totals = sim.run_days(days).unwrap();

    let waiting: u64 = sim
        .engine()
        .stations()
        .iter()
        .flat_map(|st| st.all_goods().map(|(_, ge)| ge.cargo.count() as u64 + ge.cargo.reserved_count() as u64))
        .sum();
    let aboard = sim.traffic().cargo_aboard();
    assert_eq!(waiting + aboard + totals.delivered as u64, daily * days as u64);
}

#[test]
fn generated_network_is_one_component() {
    let scenario = generate_random_network(&NetworkConfig {
        station_count: 15,
        shuttles: false,
        seed: Some(11),
        ..Default::default()
    });
    let sim = scenario.build_inline().unwrap();
    let sets = connected_station_sets(sim.engine().stations(), CARGO);
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].len(), 15);
}

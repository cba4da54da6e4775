//! Shuttle vehicles and the day loop that drives them.
//!
//! Vehicles are the only producers of link statistics and the only
//! consumers of flow plans besides cargo production. Each day every vehicle
//! jumps to the next stop of its route, records the link it travelled,
//! unloads against the station's flows and loads whatever waits for its
//! next stop.

use crate::core::cargo_list::{OrderUnloadFlags, VehicleCargoList};
use crate::core::ids::{CargoId, SourceType, StationId, VehicleId};
use crate::core::payment::{DistancePayment, Money};
use crate::core::station::{StationError, StationPool};
use crate::engine::{DistributionEngine, EngineError};
use log::{trace, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    id: VehicleId,
    cargo_type: CargoId,
    capacity: u32,
    route: Vec<StationId>,
    stop: usize,
    last_stop: Option<StationId>,
    order: OrderUnloadFlags,
    cargo: VehicleCargoList,
    income: Money,
}

/// What happened during one station visit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VisitReport {
    pub delivered: u32,
    pub transferred: u32,
    pub loaded: u32,
    pub income: Money,
}

impl VisitReport {
    fn add(&mut self, other: &VisitReport) {
        self.delivered += other.delivered;
        self.transferred += other.transferred;
        self.loaded += other.loaded;
        self.income += other.income;
    }
}

impl Vehicle {
    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn cargo_type(&self) -> CargoId {
        self.cargo_type
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn route(&self) -> &[StationId] {
        &self.route
    }

    pub fn cargo(&self) -> &VehicleCargoList {
        &self.cargo
    }

    pub fn income(&self) -> Money {
        self.income
    }

    /// The stop the vehicle visits next.
    pub fn current_stop(&self) -> StationId {
        self.route[self.stop]
    }

    fn following_stop(&self) -> StationId {
        self.route[(self.stop + 1) % self.route.len()]
    }

    /// Arrive at the current stop, unload, load and head on.
    pub fn visit(&mut self, stations: &mut StationPool, rate: Money) -> Result<VisitReport, StationError> {
        let here = self.current_stop();
        let next = self.following_stop();
        if let Some(prev) = self.last_stop.filter(|prev| stations.contains(*prev)) {
            stations.record_link(prev, here, self.cargo_type, self.capacity, self.cargo.count())?;
        }

        let station = stations.get_mut(here).ok_or(StationError::InvalidStation(here))?;
        let xy = station.xy;
        let ge = station
            .goods_mut(self.cargo_type)
            .ok_or(StationError::InvalidCargo(self.cargo_type))?;

        let mut payment = DistancePayment::new(xy, rate);
        self.cargo
            .move_to_station(ge, u32::MAX, self.order, here, next, &mut payment);

        let space = self.capacity.saturating_sub(self.cargo.count());
        let reserved = ge.cargo.reserve(self.id, space, next);
        let loaded = ge.cargo.load_reserved(self.id, &mut self.cargo, space, xy);
        ge.cargo.unreserve(self.id);
        trace!("{} at {}: reserved {}, loaded {} for {}", self.id, here, reserved, loaded, next);

        self.income += payment.route_profit;
        self.last_stop = Some(here);
        self.stop = (self.stop + 1) % self.route.len();
        Ok(VisitReport {
            delivered: payment.delivered,
            transferred: payment.transferred,
            loaded,
            income: payment.route_profit,
        })
    }

    /// Drop `removed` from the route and forget it as cargo origin.
    /// Returns `false` if the route became unusable.
    fn on_station_removed(&mut self, removed: StationId) -> bool {
        let current = self.current_stop();
        self.route.retain(|st| *st != removed);
        self.route.dedup();
        while self.route.len() > 1 && self.route.first() == self.route.last() {
            self.route.pop();
        }
        self.cargo.invalidate_station(removed);
        if self.last_stop == Some(removed) {
            self.last_stop = None;
        }
        if self.route.len() < 2 {
            return false;
        }
        self.stop = self.route.iter().position(|st| *st == current).unwrap_or(0);
        true
    }
}

/// All vehicles of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traffic {
    vehicles: Vec<Vehicle>,
    rate: Money,
    next_id: u32,
}

impl Traffic {
    /// `rate` is the income per cargo unit and tile.
    pub fn new(rate: Money) -> Self {
        Self {
            vehicles: Vec::new(),
            rate,
            next_id: 0,
        }
    }

    /// Add a shuttle serving `route` in a loop.
    ///
    /// # Panics
    ///
    /// Panics if the route has fewer than two stops.
    pub fn add_vehicle(
        &mut self,
        cargo: CargoId,
        capacity: u32,
        route: Vec<StationId>,
        order: OrderUnloadFlags,
    ) -> VehicleId {
        assert!(route.len() >= 2, "a vehicle route needs at least two stops");
        let id = VehicleId(self.next_id);
        self.next_id += 1;
        self.vehicles.push(Vehicle {
            id,
            cargo_type: cargo,
            capacity,
            route,
            stop: 0,
            last_stop: None,
            order,
            cargo: VehicleCargoList::new(),
            income: Decimal::ZERO,
        });
        id
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    /// Cargo units aboard all vehicles.
    pub fn cargo_aboard(&self) -> u64 {
        self.vehicles.iter().map(|v| v.cargo.count() as u64).sum()
    }

    /// Let every vehicle visit its current stop.
    pub fn step(&mut self, stations: &mut StationPool) -> VisitReport {
        let mut total = VisitReport::default();
        for vehicle in &mut self.vehicles {
            match vehicle.visit(stations, self.rate) {
                Ok(report) => total.add(&report),
                Err(e) => warn!("{} skipped a stop: {}", vehicle.id, e),
            }
        }
        total
    }

    pub fn age_cargo(&mut self) {
        for vehicle in &mut self.vehicles {
            vehicle.cargo.age_cargo();
        }
    }

    /// Reroute around a removed station. Vehicles left with fewer than two
    /// stops are withdrawn along with their cargo.
    pub fn on_station_removed(&mut self, removed: StationId) {
        self.vehicles.retain_mut(|vehicle| {
            let usable = vehicle.on_station_removed(removed);
            if !usable {
                warn!(
                    "{} withdrawn with {} units aboard, its route lost {}",
                    vehicle.id,
                    vehicle.cargo.count(),
                    removed
                );
            }
            usable
        });
    }
}

/// Daily production of one cargo at one station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Production {
    pub station: StationId,
    pub cargo: CargoId,
    pub amount: u32,
}

/// An engine together with the traffic and production feeding it.
#[derive(Debug)]
pub struct Simulation {
    engine: DistributionEngine,
    traffic: Traffic,
    production: Vec<Production>,
    totals: VisitReport,
}

impl Simulation {
    pub fn new(engine: DistributionEngine, traffic: Traffic, production: Vec<Production>) -> Self {
        Self {
            engine,
            traffic,
            production,
            totals: VisitReport::default(),
        }
    }

    pub fn engine(&self) -> &DistributionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DistributionEngine {
        &mut self.engine
    }

    pub fn traffic(&self) -> &Traffic {
        &self.traffic
    }

    /// Accumulated delivery statistics since the start.
    pub fn totals(&self) -> VisitReport {
        self.totals
    }

    /// Produce, move vehicles and run one day of engine ticks.
    pub fn run_day(&mut self) -> Result<VisitReport, EngineError> {
        for p in &self.production {
            if self.engine.stations().contains(p.station) {
                self.engine
                    .produce_cargo(p.station, p.cargo, p.amount, SourceType::Industry, p.station.index() as u32)?;
            }
        }
        let report = self.traffic.step(self.engine.stations_mut());
        self.traffic.age_cargo();
        self.engine.advance_days(1);
        self.totals.add(&report);
        Ok(report)
    }

    pub fn run_days(&mut self, days: u32) -> Result<VisitReport, EngineError> {
        let mut total = VisitReport::default();
        for _ in 0..days {
            total.add(&self.run_day()?);
        }
        Ok(total)
    }

    /// Remove a station from the engine, the vehicle routes and the
    /// production list.
    pub fn remove_station(&mut self, id: StationId) -> Result<(), EngineError> {
        self.engine.remove_station(id)?;
        self.traffic.on_station_removed(id);
        self.production.retain(|p| p.station != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cargo_packet::CargoPacket;
    use crate::core::ids::Tile;
    use crate::core::settings::DistributionSettings;
    use rust_decimal_macros::dec;

    const CARGO: CargoId = CargoId(0);

    fn pool() -> (StationPool, StationId, StationId) {
        let mut pool = StationPool::new();
        let a = pool.insert("A", Tile::new(0, 0), 1).unwrap();
        let b = pool.insert("B", Tile::new(10, 0), 1).unwrap();
        pool.goods_mut(b, CARGO).unwrap().acceptance_pickup.acceptance = true;
        (pool, a, b)
    }

    #[test]
    fn test_shuttle_delivers_and_records_links() {
        let (mut pool, a, b) = pool();
        pool.goods_mut(a, CARGO)
            .unwrap()
            .cargo
            .append(StationId::INVALID, CargoPacket::new(a, Tile::new(0, 0), 30, SourceType::Town, 0));

        let mut traffic = Traffic::new(dec!(1));
        let id = traffic.add_vehicle(CARGO, 20, vec![a, b], OrderUnloadFlags::default());

        let first = traffic.step(&mut pool);
        assert_eq!(first.loaded, 20);
        assert_eq!(pool.goods(a, CARGO).unwrap().cargo.count(), 10);
        assert_eq!(pool.goods(a, CARGO).unwrap().cargo.reserved_count(), 0);

        let second = traffic.step(&mut pool);
        assert_eq!(second.delivered, 20);
        assert_eq!(second.income, dec!(200));
        assert_eq!(traffic.vehicle(id).unwrap().income(), dec!(200));
        let link = pool.goods(b, CARGO).unwrap().link_stats[&a];
        assert_eq!((link.capacity, link.usage), (20, 20));
        assert!(pool.goods(a, CARGO).unwrap().outgoing.contains(&b));
    }

    #[test]
    #[should_panic(expected = "a vehicle route needs at least two stops")]
    fn test_single_stop_route_panics() {
        let (_, a, _) = pool();
        Traffic::new(dec!(1)).add_vehicle(CARGO, 10, vec![a], OrderUnloadFlags::default());
    }

    #[test]
    fn test_removed_stop_withdraws_shuttle() {
        let (_, a, b) = pool();
        let mut traffic = Traffic::new(dec!(1));
        traffic.add_vehicle(CARGO, 10, vec![a, b], OrderUnloadFlags::default());
        traffic.add_vehicle(CARGO, 10, vec![a, b, a, b], OrderUnloadFlags::default());
        traffic.on_station_removed(b);
        assert!(traffic.vehicles().is_empty());
    }

    #[test]
    fn test_removed_stop_keeps_longer_route() {
        let mut pool = StationPool::new();
        let ids: Vec<_> = (0..3).map(|i| pool.insert(format!("S{}", i), Tile::new(i, 0), 1).unwrap()).collect();
        let mut traffic = Traffic::new(dec!(1));
        traffic.add_vehicle(CARGO, 10, ids.clone(), OrderUnloadFlags::default());
        traffic.step(&mut pool);
        traffic.on_station_removed(ids[0]);
        let vehicle = &traffic.vehicles()[0];
        assert_eq!(vehicle.route(), &[ids[1], ids[2]]);
        assert_eq!(vehicle.current_stop(), ids[1]);
    }

    #[test]
    fn test_simulation_day_loop() {
        let settings = DistributionSettings {
            num_cargo: 1,
            ..Default::default()
        };
        let mut engine = DistributionEngine::new(settings, 32, 32).unwrap().with_inline_jobs();
        let a = engine.add_station("A", Tile::new(0, 0)).unwrap();
        let b = engine.add_station("B", Tile::new(10, 0)).unwrap();
        engine.set_acceptance(b, CARGO, true).unwrap();
        let mut traffic = Traffic::new(dec!(1));
        traffic.add_vehicle(CARGO, 50, vec![a, b], OrderUnloadFlags::default());
        let production = vec![Production {
            station: a,
            cargo: CARGO,
            amount: 10,
        }];
        let mut sim = Simulation::new(engine, traffic, production);

        let report = sim.run_days(10).unwrap();
        assert_eq!(sim.engine().date(), 10);
        assert!(report.delivered > 0);
        assert_eq!(sim.totals(), report);

        sim.remove_station(b).unwrap();
        assert!(sim.traffic().vehicles().is_empty());
        sim.run_day().unwrap();
    }
}

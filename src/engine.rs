//! The distribution engine: stations, link graphs and the tick schedule.
//!
//! One [`DistributionEngine`] owns everything that would otherwise be game
//! globals: the station pool, one [`LinkGraph`] per cargo type, the settings
//! and the worker pool. The host drives it with [`DistributionEngine::on_tick`]
//! and feeds it vehicle movements through [`DistributionEngine::record_link`].
//!
//! # Tick schedule
//!
//! A day has [`DAY_TICKS`] ticks. On the spawn tick of each day the cargo
//! `date % num_cargo` discovers its next component; when none is left it
//! tries to join instead. On the join tick every cargo commits its oldest
//! pending component if that one is due.

use crate::core::cargo_packet::CargoPacket;
use crate::core::goods::GoodsEntry;
use crate::core::ids::{CargoId, Date, SourceId, SourceType, StationId, Tile};
use crate::core::settings::{DistributionSettings, DistributionType, SettingsError, DAYS_PER_MONTH, DAY_TICKS};
use crate::core::station::{Station, StationError, StationPool};
use crate::graph::link_graph::LinkGraph;
use crate::optimization::job::{CommitReport, JobSettings};
use crate::optimization::worker::WorkerPool;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Station(#[from] StationError),

    #[error("cannot start link graph workers: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),
}

/// Everything the engine persists.
#[derive(Debug, Serialize, Deserialize)]
pub struct EngineState {
    pub settings: DistributionSettings,
    pub map_width: u32,
    pub map_height: u32,
    pub stations: StationPool,
    pub graphs: Vec<LinkGraph>,
    /// Ticks since the engine started.
    pub tick: u64,
    pub date: Date,
}

impl EngineState {
    pub fn new(settings: DistributionSettings, map_width: u32, map_height: u32) -> Self {
        let graphs = settings.cargos().map(LinkGraph::new).collect();
        Self {
            settings,
            map_width,
            map_height,
            stations: StationPool::new(),
            graphs,
            tick: 0,
            date: 0,
        }
    }
}

#[derive(Debug)]
pub struct DistributionEngine {
    state: EngineState,
    workers: Option<WorkerPool>,
}

impl DistributionEngine {
    /// Create an engine for a `map_width` x `map_height` map, with a worker
    /// pool sized by `settings.worker_threads`.
    pub fn new(settings: DistributionSettings, map_width: u32, map_height: u32) -> Result<Self, EngineError> {
        Self::from_state(EngineState::new(settings, map_width, map_height))
    }

    /// Resume from persisted state. Jobs that were running are recomputed
    /// when they are joined.
    pub fn from_state(mut state: EngineState) -> Result<Self, EngineError> {
        state.settings.validate()?;
        let num_cargo = state.settings.num_cargo as usize;
        while state.graphs.len() < num_cargo {
            let cargo = CargoId(state.graphs.len() as u8);
            state.graphs.push(LinkGraph::new(cargo));
        }
        let workers = WorkerPool::new(state.settings.worker_threads)?;
        debug!("link graph workers: {}", workers.threads());
        Ok(Self {
            state,
            workers: Some(workers),
        })
    }

    /// Compute every job on the main thread when it is joined.
    pub fn with_inline_jobs(mut self) -> Self {
        self.workers = None;
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn into_state(self) -> EngineState {
        self.state
    }

    pub fn settings(&self) -> &DistributionSettings {
        &self.state.settings
    }

    pub fn date(&self) -> Date {
        self.state.date
    }

    pub fn tick(&self) -> u64 {
        self.state.tick
    }

    /// Longest possible distance on the map.
    pub fn max_distance(&self) -> u32 {
        self.state.map_width + self.state.map_height
    }

    pub fn stations(&self) -> &StationPool {
        &self.state.stations
    }

    pub fn stations_mut(&mut self) -> &mut StationPool {
        &mut self.state.stations
    }

    pub fn graph(&self, cargo: CargoId) -> Option<&LinkGraph> {
        self.state.graphs.get(cargo.index())
    }

    pub fn graphs(&self) -> &[LinkGraph] {
        &self.state.graphs
    }

    pub fn goods(&self, station: StationId, cargo: CargoId) -> Result<&GoodsEntry, EngineError> {
        let st = self
            .state
            .stations
            .get(station)
            .ok_or(StationError::InvalidStation(station))?;
        Ok(st.goods(cargo).ok_or(StationError::InvalidCargo(cargo))?)
    }

    pub fn goods_mut(&mut self, station: StationId, cargo: CargoId) -> Result<&mut GoodsEntry, EngineError> {
        let st = self
            .state
            .stations
            .get_mut(station)
            .ok_or(StationError::InvalidStation(station))?;
        Ok(st.goods_mut(cargo).ok_or(StationError::InvalidCargo(cargo))?)
    }

    pub fn add_station(&mut self, name: impl Into<String>, xy: Tile) -> Result<StationId, EngineError> {
        let num_cargo = self.state.settings.num_cargo;
        Ok(self.state.stations.insert(name, xy, num_cargo)?)
    }

    /// Remove a station and every reference the remaining stations hold to
    /// it. Jobs still computing with it are cleaned up when they commit.
    pub fn remove_station(&mut self, id: StationId) -> Result<Station, EngineError> {
        let station = self.state.stations.remove(id)?;
        self.state.stations.purge_references(id);
        info!("removed station {} ({})", id, station.name);
        Ok(station)
    }

    pub fn set_acceptance(&mut self, station: StationId, cargo: CargoId, accepts: bool) -> Result<(), EngineError> {
        self.goods_mut(station, cargo)?.acceptance_pickup.acceptance = accepts;
        Ok(())
    }

    /// Override the averaged supply of a station, e.g. when loading a
    /// prepared network.
    pub fn set_supply(&mut self, station: StationId, cargo: CargoId, supply: u32) -> Result<(), EngineError> {
        self.goods_mut(station, cargo)?.supply = supply;
        Ok(())
    }

    /// A vehicle travelled `from -> to` with `capacity` space and `usage`
    /// units of `cargo` aboard.
    pub fn record_link(
        &mut self,
        from: StationId,
        to: StationId,
        cargo: CargoId,
        capacity: u32,
        usage: u32,
    ) -> Result<(), EngineError> {
        Ok(self.state.stations.record_link(from, to, cargo, capacity, usage)?)
    }

    /// Produce `amount` units of `cargo` at `station`.
    ///
    /// The cargo waits for the station's planned next hop for its own
    /// production and counts toward next month's supply.
    pub fn produce_cargo(
        &mut self,
        station: StationId,
        cargo: CargoId,
        amount: u32,
        source_type: SourceType,
        source_id: SourceId,
    ) -> Result<u32, EngineError> {
        let st = self
            .state
            .stations
            .get_mut(station)
            .ok_or(StationError::InvalidStation(station))?;
        let xy = st.xy;
        let ge = st.goods_mut(cargo).ok_or(StationError::InvalidCargo(cargo))?;
        let next = ge.via(station);

        let mut remaining = amount;
        while remaining > 0 {
            let chunk = remaining.min(CargoPacket::MAX_COUNT);
            ge.cargo
                .append(next, CargoPacket::new(station, xy, chunk as u16, source_type, source_id));
            remaining -= chunk;
        }
        ge.supply_new = ge.supply_new.saturating_add(amount);
        if amount > 0 {
            ge.acceptance_pickup.pickup = true;
        }
        Ok(amount)
    }

    /// Settings a job for `cargo` spawned today is computed with.
    pub fn job_settings(&self, cargo: CargoId) -> JobSettings {
        let settings = &self.state.settings;
        JobSettings {
            epsilon: settings.epsilon,
            max_distance: self.max_distance(),
            distribution: settings.distribution_for(cargo),
            join_date: self.state.date + settings.recalc_interval,
        }
    }

    /// Advance the engine by one tick.
    pub fn on_tick(&mut self) {
        self.state.tick += 1;
        let offset = (self.state.tick % DAY_TICKS as u64) as u32;
        if offset == 0 {
            self.on_new_day();
        }
        if offset == self.state.settings.spawn_tick {
            self.spawn_next();
        }
        if offset == self.state.settings.join_tick {
            self.join_due();
        }
    }

    /// Run whole days of ticks.
    pub fn advance_days(&mut self, days: u32) {
        for _ in 0..days as u64 * DAY_TICKS as u64 {
            self.on_tick();
        }
    }

    fn on_new_day(&mut self) {
        self.state.date += 1;
        if self.state.date % DAYS_PER_MONTH == 0 {
            debug!("month change on day {}", self.state.date);
            self.state.stations.on_month(self.state.settings.link_decay);
        }
    }

    fn spawn_next(&mut self) {
        let cargo = CargoId((self.state.date % self.state.settings.num_cargo as u32) as u8);
        if self.state.settings.distribution_for(cargo) == DistributionType::Manual {
            return;
        }
        let settings = self.job_settings(cargo);
        let date = self.state.date;
        let EngineState { stations, graphs, .. } = &mut self.state;
        let Some(graph) = graphs.get_mut(cargo.index()) else { return };
        if !graph.next_component(stations, settings, self.workers.as_ref()) {
            graph.join(stations, date);
        }
    }

    fn join_due(&mut self) {
        let date = self.state.date;
        let EngineState { stations, graphs, .. } = &mut self.state;
        for graph in graphs.iter_mut() {
            graph.join(stations, date);
        }
    }

    /// Plan every cargo from scratch: discover all components, compute them
    /// and commit the results immediately.
    pub fn recalculate_all(&mut self) -> CommitReport {
        let mut total = CommitReport::default();
        let cargos: Vec<CargoId> = self.state.settings.cargos().collect();
        for cargo in cargos {
            if self.state.settings.distribution_for(cargo) == DistributionType::Manual {
                continue;
            }
            let settings = self.job_settings(cargo);
            let EngineState { stations, graphs, .. } = &mut self.state;
            let Some(graph) = graphs.get_mut(cargo.index()) else { continue };
            while graph.next_component(stations, settings, self.workers.as_ref()) {}
            let report = graph.join_all(stations);
            total.stations_updated += report.stations_updated;
            total.stations_purged += report.stations_purged;
        }
        total
    }
}

//! Scenario files and random network generation.
//!
//! A scenario describes a map: stations with their acceptance and supply,
//! recorded links, daily production and the shuttle vehicles serving the
//! stations. Stations are referred to by name in the file.
//!
//! ```json
//! {
//!   "map": { "width": 64, "height": 64 },
//!   "settings": { "num_cargo": 1 },
//!   "stations": [
//!     { "name": "Mine", "x": 2, "y": 2, "production": { "0": 40 } },
//!     { "name": "Mill", "x": 30, "y": 2, "accepts": [0] }
//!   ],
//!   "links": [ { "from": "Mine", "to": "Mill", "capacity": 80, "bidirectional": true } ],
//!   "vehicles": [ { "route": ["Mine", "Mill"], "capacity": 40 } ]
//! }
//! ```

use crate::core::cargo_list::OrderUnloadFlags;
use crate::core::ids::{CargoId, StationId, Tile};
use crate::core::payment::Money;
use crate::core::settings::DistributionSettings;
use crate::engine::{DistributionEngine, EngineError};
use crate::simulation::traffic::{Production, Simulation, Traffic};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown station '{0}'")]
    UnknownStation(String),

    #[error("station name '{0}' is used twice")]
    DuplicateStation(String),

    #[error("vehicle {0} needs a route with at least two stops")]
    InvalidRoute(usize),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSize {
    pub width: u32,
    pub height: u32,
}

impl Default for MapSize {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSpec {
    pub name: String,
    pub x: u32,
    pub y: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepts: Vec<CargoId>,
    /// Initial averaged supply per cargo.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub supply: BTreeMap<CargoId, u32>,
    /// Units produced every day per cargo.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub production: BTreeMap<CargoId, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub from: String,
    pub to: String,
    #[serde(default = "default_cargo")]
    pub cargo: CargoId,
    pub capacity: u32,
    #[serde(default)]
    pub usage: u32,
    /// Also record the link in the opposite direction.
    #[serde(default)]
    pub bidirectional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub route: Vec<String>,
    #[serde(default = "default_cargo")]
    pub cargo: CargoId,
    pub capacity: u32,
    #[serde(default)]
    pub order: OrderUnloadFlags,
}

fn default_cargo() -> CargoId {
    CargoId(0)
}

fn default_rate() -> Money {
    dec!(0.05)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub map: MapSize,
    #[serde(default)]
    pub settings: DistributionSettings,
    /// Income per cargo unit and tile.
    #[serde(default = "default_rate")]
    pub payment_rate: Money,
    pub stations: Vec<StationSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    #[serde(default)]
    pub vehicles: Vec<VehicleSpec>,
}

impl Scenario {
    pub fn load(path: &str) -> Result<Self, ScenarioError> {
        let content = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ScenarioError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Set up an engine and its traffic as described.
    pub fn build(&self) -> Result<Simulation, ScenarioError> {
        let engine = DistributionEngine::new(self.settings.clone(), self.map.width, self.map.height)?;
        self.populate(engine)
    }

    /// Like [`Scenario::build`], but jobs are computed on the main thread.
    pub fn build_inline(&self) -> Result<Simulation, ScenarioError> {
        let engine = DistributionEngine::new(self.settings.clone(), self.map.width, self.map.height)?;
        self.populate(engine.with_inline_jobs())
    }

    fn populate(&self, mut engine: DistributionEngine) -> Result<Simulation, ScenarioError> {
        let mut ids: BTreeMap<&str, StationId> = BTreeMap::new();
        let mut production = Vec::new();
        for spec in &self.stations {
            if ids.contains_key(spec.name.as_str()) {
                return Err(ScenarioError::DuplicateStation(spec.name.clone()));
            }
            let id = engine.add_station(&spec.name, Tile::new(spec.x, spec.y))?;
            ids.insert(&spec.name, id);
            for cargo in &spec.accepts {
                engine.set_acceptance(id, *cargo, true)?;
            }
            for (cargo, supply) in &spec.supply {
                engine.set_supply(id, *cargo, *supply)?;
            }
            for (cargo, amount) in &spec.production {
                engine.goods(id, *cargo)?;
                production.push(Production {
                    station: id,
                    cargo: *cargo,
                    amount: *amount,
                });
            }
        }

        let lookup = |name: &str| {
            ids.get(name)
                .copied()
                .ok_or_else(|| ScenarioError::UnknownStation(name.to_string()))
        };

        for link in &self.links {
            let (from, to) = (lookup(link.from.as_str())?, lookup(link.to.as_str())?);
            engine.record_link(from, to, link.cargo, link.capacity, link.usage)?;
            if link.bidirectional {
                engine.record_link(to, from, link.cargo, link.capacity, link.usage)?;
            }
        }

        let mut traffic = Traffic::new(self.payment_rate);
        for (index, vehicle) in self.vehicles.iter().enumerate() {
            let route = vehicle
                .route
                .iter()
                .map(|name| lookup(name.as_str()))
                .collect::<Result<Vec<_>, _>>()?;
            if route.len() < 2 {
                return Err(ScenarioError::InvalidRoute(index));
            }
            engine.goods(route[0], vehicle.cargo)?;
            traffic.add_vehicle(vehicle.cargo, vehicle.capacity, route, vehicle.order);
        }

        Ok(Simulation::new(engine, traffic, production))
    }
}

/// Parameters of [`generate_random_network`].
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub station_count: usize,
    /// Links beyond the spanning tree that keeps the network connected.
    pub extra_links: usize,
    pub map: MapSize,
    pub num_cargo: u8,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub max_production: u32,
    /// Share of stations accepting each cargo, in percent.
    pub acceptance_percent: u32,
    /// Put a shuttle on every spanning tree link.
    pub shuttles: bool,
    /// Fixed seed for reproducible networks; random if `None`.
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            station_count: 12,
            extra_links: 6,
            map: MapSize::default(),
            num_cargo: 1,
            min_capacity: 20,
            max_capacity: 200,
            max_production: 50,
            acceptance_percent: 60,
            shuttles: true,
            seed: None,
        }
    }
}

/// Generate a random connected network scenario.
///
/// Every station after the first links to a random earlier one in both
/// directions, so each cargo's network forms a single component.
pub fn generate_random_network(config: &NetworkConfig) -> Scenario {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let cargos: Vec<CargoId> = (0..config.num_cargo.max(1)).map(CargoId).collect();
    let name = |i: usize| format!("ST-{:03}", i);

    let stations: Vec<StationSpec> = (0..config.station_count)
        .map(|i| {
            let production: BTreeMap<CargoId, u32> = cargos
                .iter()
                .map(|c| (*c, rng.gen_range(0..=config.max_production)))
                .filter(|(_, amount)| *amount > 0)
                .collect();
            StationSpec {
                name: name(i),
                x: rng.gen_range(0..config.map.width.max(1)),
                y: rng.gen_range(0..config.map.height.max(1)),
                accepts: cargos
                    .iter()
                    .copied()
                    .filter(|_| rng.gen_range(0..100) < config.acceptance_percent)
                    .collect(),
                // start as if the production had been running for a while
                supply: production.clone(),
                production,
            }
        })
        .collect();

    let mut links = Vec::new();
    let mut vehicles = Vec::new();
    let mut linked: BTreeSet<(usize, usize)> = BTreeSet::new();
    let min_capacity = config.min_capacity.min(config.max_capacity);
    for to in 1..config.station_count {
        let from = rng.gen_range(0..to);
        linked.insert((from, to));
        for cargo in &cargos {
            let capacity = rng.gen_range(min_capacity..=config.max_capacity);
            links.push(LinkSpec {
                from: name(from),
                to: name(to),
                cargo: *cargo,
                capacity,
                usage: 0,
                bidirectional: true,
            });
            if config.shuttles {
                vehicles.push(VehicleSpec {
                    route: vec![name(from), name(to)],
                    cargo: *cargo,
                    capacity: capacity.max(1),
                    order: OrderUnloadFlags::default(),
                });
            }
        }
    }

    if config.station_count > 1 {
        for _ in 0..config.extra_links {
            let a = rng.gen_range(0..config.station_count);
            let b = rng.gen_range(0..config.station_count);
            if a == b || !linked.insert((a.min(b), a.max(b))) {
                continue;
            }
            let cargo = cargos[rng.gen_range(0..cargos.len())];
            links.push(LinkSpec {
                from: name(a),
                to: name(b),
                cargo,
                capacity: rng.gen_range(min_capacity..=config.max_capacity),
                usage: 0,
                bidirectional: rng.gen_bool(0.5),
            });
        }
    }

    Scenario {
        map: config.map,
        settings: DistributionSettings {
            num_cargo: cargos.len() as u8,
            ..Default::default()
        },
        payment_rate: default_rate(),
        stations,
        links,
        vehicles,
    }
}

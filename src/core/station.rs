use crate::core::goods::GoodsEntry;
use crate::core::ids::{CargoId, StationId, Tile};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default capacity of a [`StationPool`].
pub const MAX_STATIONS: usize = 64_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StationError {
    #[error("station pool is full ({limit} stations)")]
    PoolFull { limit: usize },

    #[error("station {0} does not exist")]
    InvalidStation(StationId),

    #[error("{0} is not configured")]
    InvalidCargo(CargoId),
}

/// A station with one goods entry per cargo type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    id: StationId,
    pub name: String,
    pub xy: Tile,
    goods: Vec<GoodsEntry>,
}

impl Station {
    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn goods(&self, cargo: CargoId) -> Option<&GoodsEntry> {
        self.goods.get(cargo.index())
    }

    pub fn goods_mut(&mut self, cargo: CargoId) -> Option<&mut GoodsEntry> {
        self.goods.get_mut(cargo.index())
    }

    pub fn all_goods(&self) -> impl Iterator<Item = (CargoId, &GoodsEntry)> {
        self.goods.iter().enumerate().map(|(i, ge)| (CargoId(i as u8), ge))
    }

    pub fn all_goods_mut(&mut self) -> impl Iterator<Item = (CargoId, &mut GoodsEntry)> {
        self.goods.iter_mut().enumerate().map(|(i, ge)| (CargoId(i as u8), ge))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Slot {
    generation: u32,
    station: Option<Station>,
}

/// Generation-checked arena of stations.
///
/// Removing a station bumps its slot's generation, so ids handed out before
/// the removal stop resolving even after the slot is reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    limit: usize,
    len: usize,
}

impl Default for StationPool {
    fn default() -> Self {
        Self::with_limit(MAX_STATIONS)
    }
}

impl StationPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            limit,
            len: 0,
        }
    }

    /// Add a station with `num_cargo` empty goods entries.
    pub fn insert(&mut self, name: impl Into<String>, xy: Tile, num_cargo: u8) -> Result<StationId, StationError> {
        if self.len >= self.limit {
            return Err(StationError::PoolFull { limit: self.limit });
        }
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = StationId::new(index, slot.generation);
        slot.station = Some(Station {
            id,
            name: name.into(),
            xy,
            goods: vec![GoodsEntry::default(); num_cargo as usize],
        });
        self.len += 1;
        Ok(id)
    }

    /// Take a station out of the pool. References from other stations are
    /// left alone; see [`StationPool::purge_references`].
    pub fn remove(&mut self, id: StationId) -> Result<Station, StationError> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation() && slot.station.is_some())
            .ok_or(StationError::InvalidStation(id))?;
        let station = slot.station.take().ok_or(StationError::InvalidStation(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.len -= 1;
        Ok(station)
    }

    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.station.as_ref())
    }

    pub fn get_mut(&mut self, id: StationId) -> Option<&mut Station> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.station.as_mut())
    }

    pub fn contains(&self, id: StationId) -> bool {
        self.get(id).is_some()
    }

    pub fn goods(&self, id: StationId, cargo: CargoId) -> Option<&GoodsEntry> {
        self.get(id)?.goods(cargo)
    }

    pub fn goods_mut(&mut self, id: StationId, cargo: CargoId) -> Option<&mut GoodsEntry> {
        self.get_mut(id)?.goods_mut(cargo)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, live or free. Slot indices are below this bound.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Id of the station currently occupying slot `index`.
    pub fn id_at(&self, index: usize) -> Option<StationId> {
        self.slots.get(index)?.station.as_ref().map(Station::id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.slots.iter().filter_map(|slot| slot.station.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Station> {
        self.slots.iter_mut().filter_map(|slot| slot.station.as_mut())
    }

    /// Find a station by name.
    pub fn find(&self, name: &str) -> Option<StationId> {
        self.iter().find(|st| st.name == name).map(Station::id)
    }

    /// Record a vehicle travelling `from -> to` with `capacity` space and
    /// `usage` units of `cargo` aboard.
    pub fn record_link(
        &mut self,
        from: StationId,
        to: StationId,
        cargo: CargoId,
        capacity: u32,
        usage: u32,
    ) -> Result<(), StationError> {
        if from == to {
            return Ok(());
        }
        for id in [from, to] {
            if !self.contains(id) {
                return Err(StationError::InvalidStation(id));
            }
        }
        let dest = self.goods_mut(to, cargo).ok_or(StationError::InvalidCargo(cargo))?;
        dest.link_stats.entry(from).or_default().increase(capacity, usage);
        let origin = self.goods_mut(from, cargo).ok_or(StationError::InvalidCargo(cargo))?;
        origin.outgoing.insert(to);
        Ok(())
    }

    /// Remove every reference other stations hold to `removed`: link stats,
    /// flow plans, waiting cargo keyed by it and packet origins.
    pub fn purge_references(&mut self, removed: StationId) {
        for station in self.iter_mut() {
            for (_, ge) in station.all_goods_mut() {
                ge.purge_station(removed);
                ge.cargo.reroute(removed, &ge.flows);
                ge.cargo.invalidate_station(removed);
            }
        }
    }

    /// Month change for every station: supply averaging and link decay.
    pub fn on_month(&mut self, decay_links: bool) {
        let mut dead_links = Vec::new();
        for station in self.iter_mut() {
            let to = station.id();
            for (cargo, ge) in station.all_goods_mut() {
                for from in ge.on_month(decay_links) {
                    dead_links.push((from, to, cargo));
                }
            }
        }
        for (from, to, cargo) in dead_links {
            if let Some(ge) = self.goods_mut(from, cargo) {
                ge.outgoing.remove(&to);
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation-checked handle to a station in a [`StationPool`].
///
/// The `index` addresses a pool slot, the `generation` distinguishes the
/// current occupant of that slot from earlier stations that lived there.
/// A handle to a removed station therefore never aliases its successor.
///
/// Serialises as a single `u64` so it can key JSON maps.
///
/// # Examples
///
/// ```
/// use distribution_engine::core::ids::StationId;
///
/// let a = StationId::new(3, 0);
/// let b = StationId::new(3, 1);
/// assert_ne!(a, b);
/// assert!(!StationId::INVALID.is_valid());
/// ```
///
/// [`StationPool`]: crate::core::station::StationPool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct StationId {
    index: u32,
    generation: u32,
}

impl StationId {
    /// Sentinel for "no station": unknown next hop, nondeterministic order.
    pub const INVALID: StationId = StationId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl From<u64> for StationId {
    fn from(raw: u64) -> Self {
        Self {
            index: (raw >> 32) as u32,
            generation: raw as u32,
        }
    }
}

impl From<StationId> for u64 {
    fn from(id: StationId) -> Self {
        ((id.index as u64) << 32) | id.generation as u64
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "#{}.{}", self.index, self.generation)
        } else {
            write!(f, "#invalid")
        }
    }
}

/// Identifier of a vehicle, used to key cargo reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// Cargo type. Every cargo type has its own link graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CargoId(pub u8);

impl CargoId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CargoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cargo {}", self.0)
    }
}

/// Kind of producer a cargo packet originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SourceType {
    #[default]
    Industry,
    Town,
    Headquarters,
}

/// Producer reference inside its [`SourceType`] namespace.
pub type SourceId = u32;

/// Marker for a producer that no longer exists.
pub const INVALID_SOURCE: SourceId = u32::MAX;

/// A map position. Distances between stations are Manhattan distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
}

impl Tile {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: &Tile) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Game date in days since the start of the session.
pub type Date = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_id_u64_round_trip() {
        let id = StationId::new(17, 4);
        let raw: u64 = id.into();
        assert_eq!(StationId::from(raw), id);
        assert_eq!(StationId::from(u64::from(StationId::INVALID)), StationId::INVALID);
    }

    #[test]
    fn test_station_id_ordering() {
        assert!(StationId::new(1, 9) < StationId::new(2, 0));
        assert!(StationId::new(1, 0) < StationId::new(1, 1));
        assert!(StationId::new(5, 0) < StationId::INVALID);
    }

    #[test]
    fn test_station_id_as_json_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(StationId::new(2, 1), 10u32);
        let json = serde_json::to_string(&map).unwrap();
        let back: std::collections::BTreeMap<StationId, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_manhattan_symmetric() {
        let a = Tile::new(3, 10);
        let b = Tile::new(7, 2);
        assert_eq!(a.manhattan(&b), 12);
        assert_eq!(b.manhattan(&a), 12);
        assert_eq!(a.manhattan(&a), 0);
    }
}

//! Tunables of the distribution engine.
//!
//! Settings are plain serde data so they can live inside a scenario file or
//! a standalone `--config` JSON file. [`DistributionSettings::validate`] is
//! called once when an engine is built; everything downstream trusts the
//! values.

use crate::core::ids::CargoId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Ticks per game day.
pub const DAY_TICKS: u32 = 74;

/// Days per game month. Supply averaging and link decay run monthly.
pub const DAYS_PER_MONTH: u32 = 30;

/// Tick offset within a day at which a new component is spawned.
pub const COMPONENTS_SPAWN_TICK: u32 = 58;

/// Tick offset within a day at which due components are joined.
pub const COMPONENTS_JOIN_TICK: u32 = 21;

/// Upper bound for the number of cargo types.
pub const MAX_CARGO: u8 = 64;

/// How demand between the stations of a component is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistributionType {
    /// No routing plans; cargo follows vehicle orders only.
    Manual,
    /// Every pair of supplying stations exchanges roughly equal amounts.
    #[default]
    Symmetric,
    /// Supply flows toward accepting stations, with no return demand.
    Asymmetric,
}

/// Errors reported by [`DistributionSettings::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("epsilon must be in (0, 1), got {0}")]
    InvalidEpsilon(f64),

    #[error("recalculation interval must be at least one day, got {0}")]
    InvalidRecalcInterval(u32),

    #[error("number of cargo types must be in 1..={max}, got {0}", max = MAX_CARGO)]
    InvalidCargoCount(u8),

    #[error("tick offset {0} is outside a {len}-tick day", len = DAY_TICKS)]
    InvalidTickOffset(u32),

    #[error("spawn and join ticks must differ, both are {0}")]
    TickOffsetsCollide(u32),

    #[error("distribution override for unknown {0}")]
    UnknownCargo(CargoId),
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionSettings {
    /// Number of cargo types, each with its own link graph.
    pub num_cargo: u8,
    /// Days a component job may run before its result is committed.
    pub recalc_interval: u32,
    /// Approximation quality of the flow solver. Smaller is more accurate
    /// and slower.
    pub epsilon: f64,
    /// Distribution type used for cargo without an override.
    pub distribution: DistributionType,
    /// Per-cargo distribution type overrides.
    pub per_cargo: BTreeMap<CargoId, DistributionType>,
    /// Background solver threads, 0 lets rayon decide.
    pub worker_threads: usize,
    pub spawn_tick: u32,
    pub join_tick: u32,
    /// Decay link statistics every month so abandoned routes disappear.
    pub link_decay: bool,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            num_cargo: 32,
            recalc_interval: 4,
            epsilon: 0.25,
            distribution: DistributionType::Symmetric,
            per_cargo: BTreeMap::new(),
            worker_threads: 0,
            spawn_tick: COMPONENTS_SPAWN_TICK,
            join_tick: COMPONENTS_JOIN_TICK,
            link_decay: true,
        }
    }
}

impl DistributionSettings {
    /// Distribution type in effect for `cargo`.
    pub fn distribution_for(&self, cargo: CargoId) -> DistributionType {
        self.per_cargo.get(&cargo).copied().unwrap_or(self.distribution)
    }

    /// Override the distribution type of one cargo.
    pub fn with_distribution(mut self, cargo: CargoId, distribution: DistributionType) -> Self {
        self.per_cargo.insert(cargo, distribution);
        self
    }

    pub fn cargos(&self) -> impl Iterator<Item = CargoId> {
        (0..self.num_cargo).map(CargoId)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(SettingsError::InvalidEpsilon(self.epsilon));
        }
        if self.recalc_interval == 0 {
            return Err(SettingsError::InvalidRecalcInterval(self.recalc_interval));
        }
        if self.num_cargo == 0 || self.num_cargo > MAX_CARGO {
            return Err(SettingsError::InvalidCargoCount(self.num_cargo));
        }
        for tick in [self.spawn_tick, self.join_tick] {
            if tick >= DAY_TICKS {
                return Err(SettingsError::InvalidTickOffset(tick));
            }
        }
        if self.spawn_tick == self.join_tick {
            return Err(SettingsError::TickOffsetsCollide(self.spawn_tick));
        }
        if let Some(cargo) = self.per_cargo.keys().find(|c| c.0 >= self.num_cargo) {
            return Err(SettingsError::UnknownCargo(*cargo));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = DistributionSettings::default();
        assert_eq!(settings.validate(), Ok(()));
        assert_eq!(settings.epsilon, 0.25);
        assert_eq!(settings.spawn_tick, 58);
        assert_eq!(settings.join_tick, 21);
    }

    #[test]
    fn test_rejects_bad_epsilon() {
        for epsilon in [0.0, 1.0, -0.5, f64::NAN] {
            let settings = DistributionSettings {
                epsilon,
                ..Default::default()
            };
            assert!(matches!(settings.validate(), Err(SettingsError::InvalidEpsilon(_))));
        }
    }

    #[test]
    fn test_rejects_bad_ticks() {
        let settings = DistributionSettings {
            spawn_tick: DAY_TICKS,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::InvalidTickOffset(DAY_TICKS)));

        let settings = DistributionSettings {
            spawn_tick: 10,
            join_tick: 10,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::TickOffsetsCollide(10)));
    }

    #[test]
    fn test_rejects_unknown_override() {
        let settings = DistributionSettings {
            num_cargo: 2,
            ..Default::default()
        }
        .with_distribution(CargoId(5), DistributionType::Manual);
        assert_eq!(settings.validate(), Err(SettingsError::UnknownCargo(CargoId(5))));
    }

    #[test]
    fn test_per_cargo_override() {
        let settings = DistributionSettings::default().with_distribution(CargoId(1), DistributionType::Asymmetric);
        assert_eq!(settings.distribution_for(CargoId(0)), DistributionType::Symmetric);
        assert_eq!(settings.distribution_for(CargoId(1)), DistributionType::Asymmetric);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: DistributionSettings = serde_json::from_str(r#"{ "epsilon": 0.5, "num_cargo": 2 }"#).unwrap();
        assert_eq!(settings.epsilon, 0.5);
        assert_eq!(settings.num_cargo, 2);
        assert_eq!(settings.recalc_interval, 4);
    }
}

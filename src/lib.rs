//! # distribution-engine
//!
//! Cargo distribution for transport simulations.
//!
//! Vehicles travelling between stations leave link statistics behind. The
//! engine periodically splits each cargo type's link graph into connected
//! components, computes demand between their stations, routes that demand
//! with an approximate multicommodity flow solver and writes the result back
//! as per-station routing plans. Cargo packets consult those plans whenever a
//! vehicle unloads to decide whether they are delivered, transferred or stay
//! aboard.
//!
//! ## Architecture
//!
//! - **core**: Cargo packets and lists, stations, goods entries, payments, settings
//! - **graph**: Components, incremental component discovery, petgraph export
//! - **optimization**: Link graph jobs (demand, multicommodity flow, flow mapping) and workers
//! - **engine**: The [`DistributionEngine`](engine::DistributionEngine) context and tick schedule
//! - **simulation**: Scenario files, random networks and shuttle traffic

pub mod core;
pub mod engine;
pub mod graph;
pub mod optimization;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::cargo_list::{OrderUnloadFlags, StationCargoList, VehicleCargoList};
    pub use crate::core::cargo_packet::CargoPacket;
    pub use crate::core::goods::{FlowStat, FlowStatSet, GoodsEntry, LinkStat};
    pub use crate::core::ids::{CargoId, SourceType, StationId, Tile, VehicleId};
    pub use crate::core::payment::{CargoPayment, DistancePayment, Money};
    pub use crate::core::settings::{DistributionSettings, DistributionType};
    pub use crate::core::station::StationPool;
    pub use crate::engine::{DistributionEngine, EngineError};
    pub use crate::graph::component::Component;
    pub use crate::graph::link_graph::LinkGraph;
    pub use crate::optimization::job::LinkGraphJob;
    pub use crate::simulation::scenario::Scenario;
}

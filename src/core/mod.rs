pub mod cargo_list;
pub mod cargo_packet;
pub mod goods;
pub mod ids;
pub mod payment;
pub mod settings;
pub mod station;

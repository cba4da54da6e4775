pub mod demands;
pub mod flow_mapper;
pub mod job;
pub mod mcf;
pub mod worker;

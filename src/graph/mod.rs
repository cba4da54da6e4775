pub mod component;
pub mod export;
pub mod link_graph;

//! Graph algorithms for dependency-ordered loading

pub mod graph_builder;
pub mod kahns;

pub use graph_builder::{build_dependency_graph, validate_descriptors};
pub use kahns::kahns_depth_levels;

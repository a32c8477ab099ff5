//! Integration flows across the workspace crates.

pub mod api_flows;
pub mod bus_flows;
pub mod loader_flows;

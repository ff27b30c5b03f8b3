pub mod config;
pub mod sim;
#[allow(clippy::module_inception)]
pub mod simulator;
pub mod utils;

pub use simulator::Simulator;

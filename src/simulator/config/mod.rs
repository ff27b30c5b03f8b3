#[allow(clippy::module_inception)]
pub mod config;

pub use self::config::{load_and_merge_configs, to_toml, AppConfig, SimulationSection};

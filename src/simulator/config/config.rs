use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::arch::tpu::TpuConfig;
use crate::error::ConfigError;

/// Built-in defaults, the bottom configuration layer.
const DEFAULT_CONFIG: &str = include_str!("default.toml");

const ENV_PREFIX: &str = "TPUSIM";

/// Run harness settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  #[serde(default = "default_max_cycles")]
  pub max_cycles: u64,
}

fn default_max_cycles() -> u64 {
  1_000_000
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      max_cycles: default_max_cycles(),
    }
  }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub tpu: TpuConfig,
  #[serde(default)]
  pub simulation: SimulationSection,
}

fn environment() -> Environment {
  Environment::with_prefix(ENV_PREFIX)
    .prefix_separator("__")
    .separator("__")
    .try_parsing(true)
}

/// Layer defaults, an optional user file and environment overrides, in that order.
fn build_config(custom: Option<&Path>, env: Environment) -> Result<AppConfig, ConfigError> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
  if let Some(path) = custom {
    builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(true));
  }
  let config = builder.add_source(env).build()?;
  Ok(config.try_deserialize::<AppConfig>()?)
}

/// Load the built-in defaults only
pub fn load_default_config() -> Result<AppConfig, ConfigError> {
  let config = Config::builder()
    .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
    .build()?;
  Ok(config.try_deserialize::<AppConfig>()?)
}

/// Load a configuration file on top of the defaults, without environment overrides
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
  build_config(Some(path), Environment::default().source(Some(Default::default())))
}

/// Apply CLI parameters on top of the loaded configuration
pub fn apply_cli_overrides(
  config: &mut AppConfig,
  quiet: bool,
  step: bool,
  trace_file: Option<&str>,
  max_cycles: Option<u64>,
) {
  if quiet {
    config.simulation.quiet = true;
  }
  if step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = trace_file {
    config.simulation.trace_file = file.to_string();
  }
  if let Some(limit) = max_cycles {
    config.simulation.max_cycles = limit;
  }
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
  config.tpu.validate()?;
  if config.simulation.max_cycles == 0 {
    return Err(ConfigError::Invalid("max_cycles cannot be zero".to_string()));
  }
  Ok(())
}

/// Make relative paths relative to `root`
pub fn resolve_paths(config: &mut AppConfig, root: &Path) {
  config.simulation.trace_file = resolve_single_path(&config.simulation.trace_file, root);
}

fn resolve_single_path(path_str: &str, root: &Path) -> String {
  if path_str.is_empty() {
    return path_str.to_string();
  }
  let path = Path::new(path_str);
  if path.is_absolute() {
    return path_str.to_string();
  }
  root.join(path).to_string_lossy().to_string()
}

/// Effective configuration as TOML, for `--dump-config`
pub fn to_toml(config: &AppConfig) -> Result<String, ConfigError> {
  Ok(toml::to_string_pretty(config)?)
}

/// Load and merge configurations
///
/// 1. built-in defaults
/// 2. the custom configuration file, if given (relative to `root`)
/// 3. `TPUSIM__<SECTION>__<KEY>` environment variables
/// 4. CLI overrides
/// 5. path resolution and validation
pub fn load_and_merge_configs(
  custom_config_path: Option<&str>,
  root: &Path,
  quiet: bool,
  step: bool,
  trace_file: Option<&str>,
  max_cycles: Option<u64>,
) -> Result<AppConfig, ConfigError> {
  let custom = custom_config_path.map(|p| {
    let path = PathBuf::from(p);
    if path.is_absolute() {
      path
    } else {
      root.join(path)
    }
  });

  let mut config = build_config(custom.as_deref(), environment())?;
  apply_cli_overrides(&mut config, quiet, step, trace_file, max_cycles);
  resolve_paths(&mut config, root);
  validate_config(&config)?;
  Ok(config)
}

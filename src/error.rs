use thiserror::Error;

use crate::arch::tpu::Hazard;

/// Malformed instruction bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
  #[error("unknown opcode {opcode:#04x} at instruction {index}")]
  UnknownOpcode { opcode: u64, index: usize },

  #[error("program is {len} bytes, not a multiple of the {width}-byte instruction width")]
  Truncated { len: usize, width: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("invalid configuration: {0}")]
  Invalid(String),

  #[error("failed to load configuration: {0}")]
  Load(#[from] config::ConfigError),

  #[error("failed to serialize configuration: {0}")]
  Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Error)]
pub enum SimError {
  #[error(transparent)]
  Decode(#[from] DecodeError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("timing hazard at cycle {cycle}: {hazard}")]
  Hazard { cycle: u64, hazard: Hazard },

  #[error("program did not halt within {limit} cycles")]
  CycleLimit { limit: u64 },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

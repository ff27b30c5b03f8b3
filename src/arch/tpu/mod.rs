//! Cycle-accurate model of a weight-stationary systolic-array TPU core.

use serde::Serialize;
use thiserror::Error;

pub mod accumulator;
pub mod activation;
pub mod dispatcher;
pub mod host_dma;
pub mod isa;
pub mod memory;
pub mod params;
pub mod skew_buffer;
pub mod systolic_array;
#[allow(clippy::module_inception)]
pub mod tpu;
pub mod weight_fifo;

pub use activation::{ActivationFunction, ActivationResult};
pub use dispatcher::BusyCounters;
pub use isa::{Instruction, Opcode, Program};
pub use params::{HazardPolicy, InstructionLayout, TpuConfig};
pub use tpu::{CycleEvents, HazardEvent, RunSummary, Tpu, TpuSnapshot};
pub use weight_fifo::FifoSnapshot;

/// Timing violations a correctly scheduled program never triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Error)]
pub enum Hazard {
  #[error("weight switch reached the array before any tile was staged")]
  SwitchWithoutWeights,
  #[error("weight switch reached the array while a tile was still being programmed")]
  SwitchDuringLoad,
  #[error("weight burst arrived while the FIFO was full")]
  FifoOverflow,
}

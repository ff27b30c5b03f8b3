pub mod arch;
pub mod builtin;
pub mod error;
pub mod simulator;

pub use arch::tpu::{Instruction, Program, Tpu, TpuConfig};
pub use error::{Result, SimError};
pub use simulator::sim::mode::{SimConfig, StepMode};
pub use simulator::Simulator;

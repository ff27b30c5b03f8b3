//! Activation / control-flow unit.
//!
//! Streams accumulator rows into the scratchpad through an activation function. The last
//! element of each row doubles as a control tag, which turns the unit into the machine's
//! only source of branches: a row can ask for a conditional branch, an absolute jump, or an
//! equality / less-than-zero test whose result is written back like any other row.

use log::debug;
use serde::Serialize;

use super::accumulator::AccumulatorMemory;
use super::dispatcher::ActCommand;
use super::memory::RowWrite;
use super::params::{sign_extend, unsigned_bits, TpuConfig};
use crate::builtin::Module;

/// Sigmoid approximation, 255 / (1 + e^-x) in 8 bits, indexed by x in 0..8.
pub const SIGMOID_TABLE: [i64; 8] = [128, 187, 225, 243, 251, 254, 255, 255];

/// Control tags carried in the last element of an accumulator row.
pub mod tag {
  pub const BRANCH: i64 = 1;
  pub const EQUALITY: i64 = 2;
  pub const LESS_THAN: i64 = 3;
  pub const JUMP: i64 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivationFunction {
  Identity,
  Relu,
  Sigmoid,
}

impl ActivationFunction {
  /// Decode the 2-bit function select; code 3 is identity.
  pub fn from_bits(bits: u64) -> Self {
    match bits & 0x3 {
      1 => ActivationFunction::Relu,
      2 => ActivationFunction::Sigmoid,
      _ => ActivationFunction::Identity,
    }
  }

  pub fn bits(self) -> u64 {
    match self {
      ActivationFunction::Identity => 0,
      ActivationFunction::Relu => 1,
      ActivationFunction::Sigmoid => 2,
    }
  }

  /// Apply to one `acc_width` word. The result is not yet truncated to the data width.
  pub fn apply(self, value: i64, acc_width: u32) -> i64 {
    match self {
      ActivationFunction::Identity => value,
      ActivationFunction::Relu => {
        if value < 0 {
          0
        } else {
          value
        }
      }
      ActivationFunction::Sigmoid => {
        let word = unsigned_bits(value, acc_width);
        // any bit above the table index saturates, negatives included
        if word >> 3 != 0 {
          255
        } else {
          SIGMOID_TABLE[word as usize]
        }
      }
    }
  }
}

/// What one accumulator row turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationResult {
  /// Ordinary row, written back after the activation function.
  Activated(Vec<i64>),
  /// Conditional branch; `offset` is relative to the ACT instruction.
  Branch { taken: bool, offset: i64 },
  Equality(Vec<i64>),
  LessThan(Vec<i64>),
  Jump { target: u64 },
}

impl ActivationResult {
  /// Decode `row`. Branch and jump tags only count on the first row of an instruction;
  /// elsewhere those rows are ordinary activations.
  pub fn decode(
    row: &[i64],
    function: ActivationFunction,
    first: bool,
    data_width: u32,
    acc_width: u32,
  ) -> Self {
    let n = row.len();
    let wrap = |v: i64| sign_extend(v, data_width);

    match row[n - 1] {
      tag::BRANCH if first => {
        let taken = row[n - 2] != 0;
        let offset = if taken { row[0] } else { row[1] };
        ActivationResult::Branch {
          taken,
          offset: offset.wrapping_add(1),
        }
      }
      // jump rows come from the scratchpad, so the target is one data_width element
      tag::JUMP if first => ActivationResult::Jump {
        target: unsigned_bits(row[1], data_width),
      },
      tag::EQUALITY => {
        let mut out: Vec<i64> = row.iter().map(|&v| wrap(v)).collect();
        out[0] = i64::from(row[0] == 0);
        out[1] = 0;
        out[n - 1] = 0;
        ActivationResult::Equality(out)
      }
      tag::LESS_THAN => {
        let mut out: Vec<i64> = row.iter().map(|&v| wrap(v)).collect();
        out[0] = i64::from(row[0] < 0);
        ActivationResult::LessThan(out)
      }
      _ => ActivationResult::Activated(
        row
          .iter()
          .map(|&v| wrap(function.apply(v, acc_width)))
          .collect(),
      ),
    }
  }

  /// The row written to the scratchpad, if any.
  pub fn writeback(&self) -> Option<&[i64]> {
    match self {
      ActivationResult::Activated(row)
      | ActivationResult::Equality(row)
      | ActivationResult::LessThan(row) => Some(row),
      ActivationResult::Branch { .. } | ActivationResult::Jump { .. } => None,
    }
  }

  /// New PC for a control-flow row, given the PC of the ACT instruction.
  pub fn redirect(&self, pc: u64) -> Option<u64> {
    match *self {
      ActivationResult::Branch { offset, .. } => Some(pc.wrapping_add_signed(offset)),
      ActivationResult::Jump { target } => Some(target),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActJob {
  acc_addr: u64,
  ub_addr: u64,
  remaining: u64,
  function: ActivationFunction,
  pc: u64,
  first: bool,
}

#[derive(Debug, Clone)]
pub struct ActivationUnit {
  name: String,
  data_width: u32,
  acc_width: u32,
  job: Option<ActJob>,
}

pub struct ActInput<'a> {
  pub issue: Option<&'a ActCommand>,
  pub accumulators: &'a AccumulatorMemory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActOutput {
  pub write: Option<RowWrite>,
  /// PC override, applied at the end of this cycle.
  pub redirect: Option<u64>,
  /// The first row resolved as a branch or jump and ended the instruction.
  pub resolved: bool,
}

impl ActivationUnit {
  pub fn new(name: impl Into<String>, config: &TpuConfig) -> Self {
    Self {
      name: name.into(),
      data_width: config.data_width,
      acc_width: config.acc_width,
      job: None,
    }
  }

  pub fn is_busy(&self) -> bool {
    self.job.is_some()
  }
}

impl Module for ActivationUnit {
  type Input<'a> = ActInput<'a>;
  type Output = ActOutput;

  fn step(&self, input: ActInput<'_>) -> (Self, ActOutput) {
    let mut next = self.clone();
    let mut output = ActOutput::default();

    let job = match input.issue {
      Some(cmd) => Some(ActJob {
        acc_addr: cmd.acc_addr,
        ub_addr: cmd.ub_addr,
        remaining: cmd.length,
        function: cmd.function,
        pc: cmd.pc,
        first: true,
      }),
      None => self.job.clone(),
    };

    next.job = None;
    let Some(job) = job.filter(|j| j.remaining > 0) else {
      return (next, output);
    };

    let row = input.accumulators.read_row(job.acc_addr);
    let result =
      ActivationResult::decode(&row, job.function, job.first, self.data_width, self.acc_width);

    if let Some(target) = result.redirect(job.pc) {
      debug!("[{}] pc {} redirected to {} ({:?})", self.name, job.pc, target, result);
      output.redirect = Some(target);
      output.resolved = true;
      return (next, output);
    }

    output.write = result
      .writeback()
      .map(|r| RowWrite::new(job.ub_addr, r.to_vec()));
    if job.remaining > 1 {
      next.job = Some(ActJob {
        acc_addr: job.acc_addr.wrapping_add(1),
        ub_addr: job.ub_addr.wrapping_add(1),
        remaining: job.remaining - 1,
        first: false,
        ..job
      });
    }
    (next, output)
  }

  fn reset(&mut self) {
    self.job = None;
  }

  fn name(&self) -> &str {
    &self.name
  }
}

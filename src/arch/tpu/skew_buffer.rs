//! MMC row feeder and the triangular skew cascade between the scratchpad and the array.

use log::debug;
use serde::Serialize;

use super::dispatcher::MmcCommand;
use super::memory::UnifiedBuffer;
use crate::builtin::{DelayLine, Module, Wire};

/// One element entering the array's left edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Lane {
  pub data: i64,
  pub valid: bool,
  /// Flip the weight buffer selector in every cell this element passes.
  pub switch: bool,
}

/// Accumulator-side control travelling alongside a vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccControl {
  pub acc_addr: u64,
  pub overwrite: bool,
  /// Final vector of the instruction.
  pub last: bool,
}

/// A scratchpad vector on its way into the skew buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixRow {
  pub data: Vec<i64>,
  pub switch: bool,
  pub control: AccControl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MmcJob {
  ub_addr: u64,
  acc_addr: u64,
  remaining: u64,
  overwrite: bool,
  switch: bool,
}

/// Reads one scratchpad vector per cycle for the running MMC.
#[derive(Debug, Clone)]
pub struct MmcFeeder {
  name: String,
  job: Option<MmcJob>,
}

pub struct FeederInput<'a> {
  pub issue: Option<&'a MmcCommand>,
  pub ub: &'a UnifiedBuffer,
}

impl MmcFeeder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      job: None,
    }
  }
}

impl Module for MmcFeeder {
  type Input<'a> = FeederInput<'a>;
  type Output = Wire<MatrixRow>;

  fn step(&self, input: FeederInput<'_>) -> (Self, Wire<MatrixRow>) {
    let mut next = self.clone();
    let job = match input.issue {
      Some(cmd) => {
        debug!("[{}] start: {} rows from ub {}", self.name, cmd.length, cmd.ub_addr);
        Some(MmcJob {
          ub_addr: cmd.ub_addr,
          acc_addr: cmd.acc_addr,
          remaining: cmd.length,
          overwrite: cmd.overwrite,
          switch: cmd.switch,
        })
      }
      None => self.job.clone(),
    };

    let mut row = Wire::default();
    next.job = None;
    if let Some(job) = job.filter(|j| j.remaining > 0) {
      row.set(MatrixRow {
        data: input.ub.read(job.ub_addr).to_vec(),
        // only the first vector carries the switch
        switch: job.switch,
        control: AccControl {
          acc_addr: job.acc_addr,
          overwrite: job.overwrite,
          last: job.remaining == 1,
        },
      });
      if job.remaining > 1 {
        next.job = Some(MmcJob {
          ub_addr: job.ub_addr.wrapping_add(1),
          acc_addr: job.acc_addr.wrapping_add(1),
          remaining: job.remaining - 1,
          switch: false,
          ..job
        });
      }
    }
    (next, row)
  }

  fn reset(&mut self) {
    self.job = None;
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Lane r holds r + 1 registers, so element r of a vector presented at cycle t enters array
/// row r at t + 1 + r. The accumulator control is held back N + 1 cycles to meet column 0.
#[derive(Debug, Clone)]
pub struct SkewBuffer {
  name: String,
  lanes: Vec<DelayLine<Lane>>,
  control: DelayLine<Wire<AccControl>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkewOutput {
  pub lanes: Vec<Lane>,
  pub control: Wire<AccControl>,
}

impl SkewBuffer {
  pub fn new(name: impl Into<String>, n: usize) -> Self {
    Self {
      name: name.into(),
      lanes: (0..n).map(|r| DelayLine::new(r + 1)).collect(),
      control: DelayLine::new(n + 1),
    }
  }
}

impl Module for SkewBuffer {
  type Input<'b> = &'b Wire<MatrixRow>;
  type Output = SkewOutput;

  fn step(&self, input: &Wire<MatrixRow>) -> (Self, SkewOutput) {
    let row = input.get();
    let entering: Vec<Lane> = (0..self.lanes.len())
      .map(|r| match row {
        Some(row) => Lane {
          data: row.data.get(r).copied().unwrap_or(0),
          valid: true,
          switch: row.switch,
        },
        None => Lane::default(),
      })
      .collect();
    let control = Wire::from_option(row.map(|r| r.control.clone()));

    let output = SkewOutput {
      lanes: self
        .lanes
        .iter()
        .zip(&entering)
        .map(|(lane, input)| lane.output(input))
        .collect(),
      control: self.control.output(&control),
    };
    let next = Self {
      name: self.name.clone(),
      lanes: self
        .lanes
        .iter()
        .zip(entering)
        .map(|(lane, input)| lane.shifted(input))
        .collect(),
      control: self.control.shifted(control),
    };
    (next, output)
  }

  fn reset(&mut self) {
    self.lanes.iter_mut().for_each(DelayLine::reset);
    self.control.reset();
  }

  fn name(&self) -> &str {
    &self.name
  }
}

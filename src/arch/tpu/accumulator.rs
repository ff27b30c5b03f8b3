//! Accumulator bank: one memory per array column, fed by a control chain that delays each
//! column's write-enable one cycle more than its left neighbour's.

use log::trace;
use serde::Serialize;

use super::params::sign_extend;
use super::skew_buffer::AccControl;
use crate::builtin::{Module, Wire};

/// N column memories of `acc_width`-bit words. Row addresses wrap modulo the depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccumulatorMemory {
  /// `columns[c][row]`
  columns: Vec<Vec<i64>>,
}

/// One column write committed at the end of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccWrite {
  pub column: usize,
  pub addr: u64,
  pub value: i64,
}

impl AccumulatorMemory {
  pub fn new(n: usize, depth: usize) -> Self {
    Self {
      columns: vec![vec![0; depth]; n],
    }
  }

  fn index(&self, addr: u64) -> usize {
    (addr % self.depth() as u64) as usize
  }

  pub fn depth(&self) -> usize {
    self.columns.first().map_or(0, Vec::len)
  }

  pub fn read(&self, column: usize, addr: u64) -> i64 {
    self.columns[column][self.index(addr)]
  }

  /// Row `addr` across all columns.
  pub fn read_row(&self, addr: u64) -> Vec<i64> {
    let idx = self.index(addr);
    self.columns.iter().map(|col| col[idx]).collect()
  }

  pub fn write_row(&mut self, addr: u64, row: &[i64]) {
    let idx = self.index(addr);
    for (col, &v) in self.columns.iter_mut().zip(row) {
      col[idx] = v;
    }
  }

  pub fn apply(&mut self, writes: &[AccWrite]) {
    for w in writes {
      let idx = self.index(w.addr);
      self.columns[w.column][idx] = w.value;
    }
  }

  /// All rows, row-major.
  pub fn rows(&self) -> Vec<Vec<i64>> {
    (0..self.depth() as u64).map(|addr| self.read_row(addr)).collect()
  }
}

/// Control hop registers between accumulator j and j + 1.
#[derive(Debug, Clone)]
pub struct AccumulatorChain {
  name: String,
  acc_width: u32,
  /// `hops[j]` feeds accumulator j + 1.
  hops: Vec<Wire<AccControl>>,
}

pub struct AccInput<'a> {
  /// Control leaving the skew buffer, aligned with column 0's sum.
  pub control: &'a Wire<AccControl>,
  /// Partial sums leaving the array's bottom row.
  pub sums: &'a [i64],
  pub memory: &'a AccumulatorMemory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccOutput {
  pub writes: Vec<AccWrite>,
  /// The last accumulator committed the final vector of an MMC.
  pub done: bool,
}

impl AccumulatorChain {
  pub fn new(name: impl Into<String>, n: usize, acc_width: u32) -> Self {
    Self {
      name: name.into(),
      acc_width,
      hops: vec![Wire::default(); n.saturating_sub(1)],
    }
  }
}

impl Module for AccumulatorChain {
  type Input<'a> = AccInput<'a>;
  type Output = AccOutput;

  fn step(&self, input: AccInput<'_>) -> (Self, AccOutput) {
    let n = input.sums.len();
    let mut output = AccOutput::default();

    for column in 0..n {
      let control = if column == 0 {
        input.control
      } else {
        &self.hops[column - 1]
      };
      let Some(ctrl) = control.get() else {
        continue;
      };
      let sum = input.sums[column];
      let value = if ctrl.overwrite {
        sum
      } else {
        sign_extend(
          input.memory.read(column, ctrl.acc_addr).wrapping_add(sum),
          self.acc_width,
        )
      };
      output.writes.push(AccWrite {
        column,
        addr: ctrl.acc_addr,
        value,
      });
      if column == n - 1 && ctrl.last {
        trace!("[{}] last vector committed at row {}", self.name, ctrl.acc_addr);
        output.done = true;
      }
    }

    let mut hops = Vec::with_capacity(self.hops.len());
    if !self.hops.is_empty() {
      hops.push(input.control.clone());
      hops.extend(self.hops[..self.hops.len() - 1].iter().cloned());
    }
    let next = Self {
      name: self.name.clone(),
      acc_width: self.acc_width,
      hops,
    };
    (next, output)
  }

  fn reset(&mut self) {
    self.hops.iter_mut().for_each(Wire::clear);
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Control chain plus storage; the top level commits the chain's writes each edge.
#[derive(Debug, Clone)]
pub struct AccumulatorBank {
  pub chain: AccumulatorChain,
  pub memory: AccumulatorMemory,
}

impl AccumulatorBank {
  pub fn new(name: impl Into<String>, n: usize, depth: usize, acc_width: u32) -> Self {
    Self {
      chain: AccumulatorChain::new(name, n, acc_width),
      memory: AccumulatorMemory::new(n, depth),
    }
  }
}

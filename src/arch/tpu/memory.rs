//! Row-addressed storage: the unified buffer (scratchpad), host memory and the write ports
//! the pipeline uses to update them at a clock edge.

use serde::Serialize;

/// A full-row write committed at the end of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowWrite {
  pub addr: u64,
  pub row: Vec<i64>,
}

impl RowWrite {
  pub fn new(addr: u64, row: Vec<i64>) -> Self {
    Self { addr, row }
  }
}

/// N-wide vectors indexed by row. Addresses wrap modulo the depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowMemory {
  width: usize,
  rows: Vec<Vec<i64>>,
}

impl RowMemory {
  pub fn new(depth: usize, width: usize) -> Self {
    Self {
      width,
      rows: vec![vec![0; width]; depth],
    }
  }

  fn index(&self, addr: u64) -> usize {
    (addr % self.rows.len() as u64) as usize
  }

  pub fn read(&self, addr: u64) -> &[i64] {
    &self.rows[self.index(addr)]
  }

  /// Store `row`, zero-padding or truncating it to the memory width.
  pub fn write(&mut self, addr: u64, row: &[i64]) {
    let idx = self.index(addr);
    let dst = &mut self.rows[idx];
    dst.fill(0);
    for (d, &v) in dst.iter_mut().zip(row) {
      *d = v;
    }
  }

  pub fn apply(&mut self, write: &RowWrite) {
    self.write(write.addr, &write.row);
  }

  pub fn depth(&self) -> usize {
    self.rows.len()
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn rows(&self) -> &[Vec<i64>] {
    &self.rows
  }

  /// Rows holding at least one non-zero element, with their addresses.
  pub fn nonzero_rows(&self) -> impl Iterator<Item = (usize, &[i64])> {
    self
      .rows
      .iter()
      .enumerate()
      .filter(|(_, row)| row.iter().any(|&v| v != 0))
      .map(|(addr, row)| (addr, row.as_slice()))
  }
}

/// The on-chip scratchpad feeding the array and receiving activations.
pub type UnifiedBuffer = RowMemory;

/// Off-chip host memory, reached only through the host DMA.
pub type HostMemory = RowMemory;

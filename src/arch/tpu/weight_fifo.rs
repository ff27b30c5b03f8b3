//! Weight DRAM burst reader and the four-stage weight tile FIFO in front of the array.

use log::trace;
use serde::Serialize;

use super::params::{TpuConfig, FIFO_DEPTH};
use crate::builtin::{Module, Wire};

/// An N x N weight tile, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tile {
  n: usize,
  data: Vec<i64>,
}

impl Tile {
  pub fn new(n: usize, mut data: Vec<i64>) -> Self {
    data.resize(n * n, 0);
    Self { n, data }
  }

  pub fn get(&self, row: usize, col: usize) -> i64 {
    self.data[row * self.n + col]
  }

  pub fn row(&self, row: usize) -> &[i64] {
    &self.data[row * self.n..(row + 1) * self.n]
  }

  pub fn as_slice(&self) -> &[i64] {
    &self.data
  }
}

/// Off-chip weight storage, one tile per address. Addresses wrap modulo the capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightDram {
  tiles: Vec<Vec<i64>>,
}

impl WeightDram {
  pub fn new(capacity: usize, n: usize) -> Self {
    Self {
      tiles: vec![vec![0; n * n]; capacity],
    }
  }

  fn index(&self, addr: u64) -> usize {
    (addr % self.tiles.len() as u64) as usize
  }

  pub fn tile(&self, addr: u64) -> &[i64] {
    &self.tiles[self.index(addr)]
  }

  /// Store a row-major tile; short data is zero-padded.
  pub fn store(&mut self, addr: u64, data: &[i64]) {
    let idx = self.index(addr);
    let dst = &mut self.tiles[idx];
    dst.fill(0);
    for (d, &v) in dst.iter_mut().zip(data) {
      *d = v;
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BurstJob {
  tile: u64,
  wait: usize,
  next: usize,
}

/// Streams one tile out of the weight DRAM as fixed-size bursts after the access latency.
#[derive(Debug, Clone)]
pub struct BurstReader {
  name: String,
  latency: usize,
  burst_elems: usize,
  bursts: usize,
  job: Option<BurstJob>,
}

pub struct BurstInput<'a> {
  pub request: Option<u64>,
  pub dram: &'a WeightDram,
}

impl BurstReader {
  pub fn new(name: impl Into<String>, config: &TpuConfig) -> Self {
    Self {
      name: name.into(),
      latency: config.dram_latency,
      burst_elems: config.burst_elems(),
      bursts: config.bursts_per_tile(),
      job: None,
    }
  }

  pub fn is_busy(&self) -> bool {
    self.job.is_some()
  }
}

impl Module for BurstReader {
  type Input<'a> = BurstInput<'a>;
  type Output = Wire<Vec<i64>>;

  fn step(&self, input: BurstInput<'_>) -> (Self, Wire<Vec<i64>>) {
    let mut next = self.clone();
    let mut burst = Wire::default();

    if let Some(job) = &self.job {
      if job.wait > 0 {
        next.job = Some(BurstJob {
          wait: job.wait - 1,
          ..job.clone()
        });
      } else {
        let tile = input.dram.tile(job.tile);
        let start = job.next * self.burst_elems;
        let end = (start + self.burst_elems).min(tile.len());
        burst.set(tile[start..end].to_vec());
        trace!("[{}] tile {} burst {}", self.name, job.tile, job.next);
        next.job = (job.next + 1 < self.bursts).then(|| BurstJob {
          next: job.next + 1,
          ..job.clone()
        });
      }
    }

    if let Some(tile) = input.request {
      next.job = Some(BurstJob {
        tile,
        wait: self.latency,
        next: 0,
      });
    }

    (next, burst)
  }

  fn reset(&mut self) {
    self.job = None;
  }

  fn name(&self) -> &str {
    &self.name
  }
}

/// Four tile slots. Stage 1 assembles bursts into a tile; complete tiles ripple one stage per
/// cycle towards stage 4, whose occupant is the tile the array preloads next.
#[derive(Debug, Clone)]
pub struct WeightFifo {
  name: String,
  n: usize,
  fill: Vec<i64>,
  filled: usize,
  /// Stages 2..=4, front last.
  stages: Vec<Option<Tile>>,
}

pub struct FifoInput<'a> {
  pub burst: &'a Wire<Vec<i64>>,
  /// Drop the front tile at the end of this cycle.
  pub advance: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FifoOutput {
  /// A burst arrived while stage 1 was full and could not drain.
  pub overflow: bool,
}

/// FIFO contents for state dumps, stage 1 first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FifoSnapshot {
  pub occupancy: usize,
  pub filling: usize,
  pub stages: Vec<Option<Vec<i64>>>,
}

impl WeightFifo {
  pub fn new(name: impl Into<String>, n: usize) -> Self {
    Self {
      name: name.into(),
      n,
      fill: vec![0; n * n],
      filled: 0,
      stages: vec![None; FIFO_DEPTH - 1],
    }
  }

  fn stage1_full(&self) -> bool {
    self.filled >= self.n * self.n
  }

  /// A complete tile sits in stage 4.
  pub fn ready(&self) -> bool {
    self.front().is_some()
  }

  pub fn front(&self) -> Option<&Tile> {
    self.stages.last().and_then(Option::as_ref)
  }

  /// Complete tiles held, counting a full stage 1.
  pub fn occupancy(&self) -> usize {
    self.stages.iter().filter(|s| s.is_some()).count() + usize::from(self.stage1_full())
  }

  pub fn snapshot(&self) -> FifoSnapshot {
    let stage1 = self.stage1_full().then(|| self.fill.clone());
    let stages = std::iter::once(stage1)
      .chain(
        self
          .stages
          .iter()
          .map(|s| s.as_ref().map(|t| t.as_slice().to_vec())),
      )
      .collect();
    FifoSnapshot {
      occupancy: self.occupancy(),
      filling: self.filled.min(self.n * self.n),
      stages,
    }
  }
}

impl Module for WeightFifo {
  type Input<'a> = FifoInput<'a>;
  type Output = FifoOutput;

  fn step(&self, input: FifoInput<'_>) -> (Self, FifoOutput) {
    let mut next = self.clone();
    let mut output = FifoOutput::default();
    let front = self.stages.len() - 1;

    if input.advance {
      next.stages[front] = None;
    }
    // a stage moves only into a slot that is empty now, not one vacated this cycle
    for i in (0..front).rev() {
      if self.stages[i].is_some() && self.stages[i + 1].is_none() {
        next.stages[i + 1] = self.stages[i].clone();
        next.stages[i] = None;
      }
    }

    let stage1_drains = self.stage1_full() && self.stages[0].is_none();
    if stage1_drains {
      next.stages[0] = Some(Tile::new(self.n, self.fill.clone()));
      next.fill.fill(0);
      next.filled = 0;
    }

    if let Some(burst) = input.burst.get() {
      if self.stage1_full() && !stage1_drains {
        output.overflow = true;
      } else {
        let capacity = self.n * self.n;
        let start = next.filled.min(capacity);
        let end = (start + burst.len()).min(capacity);
        next.fill[start..end].copy_from_slice(&burst[..end - start]);
        next.filled = (next.filled + burst.len()).min(capacity);
      }
    }

    if next.occupancy() != self.occupancy() {
      trace!("[{}] occupancy {} -> {}", self.name, self.occupancy(), next.occupancy());
    }
    (next, output)
  }

  fn reset(&mut self) {
    self.fill.fill(0);
    self.filled = 0;
    self.stages.iter_mut().for_each(|s| *s = None);
  }

  fn name(&self) -> &str {
    &self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> TpuConfig {
    let mut config = TpuConfig::with_matrix_size(4);
    // 16 elements in two 8-element bursts
    config.burst_bytes = 8;
    config.dram_latency = 1;
    config
  }

  #[test]
  fn test_burst_reader_latency() {
    let config = config();
    let mut dram = WeightDram::new(4, 4);
    dram.store(2, &(1..=16i64).collect::<Vec<_>>());
    let mut reader = BurstReader::new("dram", &config);

    let mut bursts = Vec::new();
    for cycle in 0..6 {
      let request = (cycle == 0).then_some(2);
      let (next, out) = reader.step(BurstInput {
        request,
        dram: &dram,
      });
      reader = next;
      bursts.push(out.get().map(|b| b[0]));
    }
    // request at 0, latency 1: bursts at 2 and 3
    assert_eq!(bursts, vec![None, None, Some(1), Some(9), None, None]);
    assert!(!reader.is_busy());
  }

  fn feed(fifo: &WeightFifo, burst: Option<Vec<i64>>, advance: bool) -> (WeightFifo, FifoOutput) {
    let wire = Wire::from_option(burst);
    fifo.step(FifoInput {
      burst: &wire,
      advance,
    })
  }

  #[test]
  fn test_tile_ripples_to_front() {
    let mut fifo = WeightFifo::new("fifo", 4);
    let (next, _) = feed(&fifo, Some((0..8).collect()), false);
    fifo = next;
    let (next, _) = feed(&fifo, Some((8..16).collect()), false);
    fifo = next;
    assert_eq!(fifo.occupancy(), 1);

    let mut ready_after = 0;
    while !fifo.ready() {
      let (next, _) = feed(&fifo, None, false);
      fifo = next;
      ready_after += 1;
    }
    // stage 1 -> 2 -> 3 -> 4
    assert_eq!(ready_after, 3);
    assert_eq!(fifo.front().unwrap().row(3), &[12, 13, 14, 15]);

    let (fifo, _) = feed(&fifo, None, true);
    assert!(!fifo.ready());
    assert_eq!(fifo.occupancy(), 0);
  }

  #[test]
  fn test_order_is_preserved() {
    let mut fifo = WeightFifo::new("fifo", 4);
    for tile in 0..2 {
      for _ in 0..2 {
        let (next, _) = feed(&fifo, Some(vec![tile; 8]), false);
        fifo = next;
      }
      for _ in 0..3 {
        let (next, _) = feed(&fifo, None, false);
        fifo = next;
      }
    }
    assert_eq!(fifo.occupancy(), 2);
    assert_eq!(fifo.front().unwrap().get(0, 0), 0);

    let (mut fifo, _) = feed(&fifo, None, true);
    let (next, _) = feed(&fifo, None, false);
    fifo = next;
    assert_eq!(fifo.front().unwrap().get(0, 0), 1);
  }

  #[test]
  fn test_overflow_when_full() {
    let mut fifo = WeightFifo::new("fifo", 4);
    // four tiles fill every stage
    for tile in 0..4 {
      for _ in 0..2 {
        let (next, out) = feed(&fifo, Some(vec![tile; 8]), false);
        assert!(!out.overflow);
        fifo = next;
      }
      for _ in 0..3 {
        let (next, _) = feed(&fifo, None, false);
        fifo = next;
      }
    }
    assert_eq!(fifo.occupancy(), 4);
    let (_, out) = feed(&fifo, Some(vec![9; 8]), false);
    assert!(out.overflow);
  }
}

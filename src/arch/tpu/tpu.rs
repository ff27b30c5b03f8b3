//! Top level: wires every unit together and commits them at each clock edge.
//!
//! Evaluation order within a cycle:
//! 1. the activation unit (it may redirect the PC)
//! 2. the dispatcher, fed by the activation unit's redirect
//! 3. host DMA, MMC feeder and skew buffer, weight DRAM reader
//! 4. the array, then the FIFO it may advance
//! 5. the accumulator chain, fed by the array's bottom row
//!
//! Every unit reads only registers committed at the previous edge, so the order above only
//! matters for the few same-cycle wires (redirect, advance, sums).

use log::{debug, info, warn};
use serde::Serialize;

use super::accumulator::{AccInput, AccumulatorBank};
use super::activation::{ActInput, ActivationUnit};
use super::dispatcher::{BusyCounters, Command, DispatchInput, Dispatcher};
use super::host_dma::{HostDma, HostDmaInput};
use super::isa::{Instruction, Program};
use super::memory::{HostMemory, UnifiedBuffer};
use super::params::{HazardPolicy, TpuConfig};
use super::skew_buffer::{FeederInput, MmcFeeder, SkewBuffer};
use super::systolic_array::{ArrayInput, SystolicArray};
use super::weight_fifo::{BurstInput, BurstReader, FifoInput, FifoSnapshot, WeightDram, WeightFifo};
use super::Hazard;
use crate::builtin::Module;
use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HazardEvent {
  pub cycle: u64,
  pub hazard: Hazard,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleEvents {
  pub cycle: u64,
  /// PC at the start of the cycle.
  pub pc: u64,
  pub dispatched: Option<Instruction>,
  pub stalled: bool,
  pub redirect: Option<u64>,
  /// The last vector of an MMC was committed to the accumulators.
  pub mmc_done: bool,
  pub hazards: Vec<Hazard>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  pub cycles: u64,
  pub dispatched: u64,
  pub stall_cycles: u64,
  pub hazards: Vec<HazardEvent>,
}

/// Full architectural state, for dumps and differential testing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TpuSnapshot {
  pub cycle: u64,
  pub pc: u64,
  pub halted: bool,
  pub busy: BusyCounters,
  pub scratchpad: Vec<Vec<i64>>,
  pub accumulators: Vec<Vec<i64>>,
  pub fifo: FifoSnapshot,
  pub host: Vec<Vec<i64>>,
}

#[derive(Debug)]
pub struct Tpu {
  config: TpuConfig,
  program: Program,
  cycle: u64,
  dispatcher: Dispatcher,
  host_dma: HostDma,
  feeder: MmcFeeder,
  skew: SkewBuffer,
  array: SystolicArray,
  dram_reader: BurstReader,
  fifo: WeightFifo,
  accumulators: AccumulatorBank,
  activation: ActivationUnit,
  ub: UnifiedBuffer,
  host: HostMemory,
  weights: WeightDram,
  summary: RunSummary,
}

impl Tpu {
  pub fn new(config: TpuConfig, program: Program) -> Result<Self> {
    config.validate()?;
    let n = config.matrix_size;
    info!(
      "TPU {}x{}: {} instructions, ub {} rows, acc {} rows",
      n,
      n,
      program.len(),
      config.ub_rows,
      config.acc_rows
    );
    Ok(Self {
      dispatcher: Dispatcher::new("Dispatcher", &config),
      host_dma: HostDma::new("HostDma", &config),
      feeder: MmcFeeder::new("MmcFeeder"),
      skew: SkewBuffer::new("SkewBuffer", n),
      array: SystolicArray::new("SystolicArray", &config),
      dram_reader: BurstReader::new("WeightDram", &config),
      fifo: WeightFifo::new("WeightFifo", n),
      accumulators: AccumulatorBank::new("Accumulators", n, config.acc_rows, config.acc_width),
      activation: ActivationUnit::new("Activation", &config),
      ub: UnifiedBuffer::new(config.ub_rows, n),
      host: HostMemory::new(config.host_rows, n),
      weights: WeightDram::new(config.weight_tiles, n),
      summary: RunSummary::default(),
      cycle: 0,
      program,
      config,
    })
  }

  fn wrap_row(&self, row: &[i64]) -> Vec<i64> {
    row.iter().map(|&v| self.config.wrap_data(v)).collect()
  }

  pub fn write_host_row(&mut self, addr: u64, row: &[i64]) {
    let row = self.wrap_row(row);
    self.host.write(addr, &row);
  }

  pub fn write_ub_row(&mut self, addr: u64, row: &[i64]) {
    let row = self.wrap_row(row);
    self.ub.write(addr, &row);
  }

  /// Store a row-major N x N tile in weight DRAM.
  pub fn store_weight_tile(&mut self, addr: u64, tile: &[i64]) {
    let tile = self.wrap_row(tile);
    self.weights.store(addr, &tile);
  }

  /// Advance one clock cycle.
  ///
  /// Under `HazardPolicy::Fail` a detected hazard aborts the cycle before anything commits.
  pub fn tick(&mut self) -> Result<CycleEvents> {
    let issue = self.dispatcher.issue();

    let (activation, act) = self.activation.step(ActInput {
      issue: issue.and_then(Command::as_activate),
      accumulators: &self.accumulators.memory,
    });
    let (dispatcher, dispatch) = self.dispatcher.step(DispatchInput {
      program: &self.program,
      ub: &self.ub,
      redirect: act.redirect,
      resolved: act.resolved,
    });
    let (host_dma, dma) = self.host_dma.step(HostDmaInput {
      issue,
      ub: &self.ub,
      host: &self.host,
    });
    let (feeder, row) = self.feeder.step(FeederInput {
      issue: issue.and_then(Command::as_matrix),
      ub: &self.ub,
    });
    let (skew, skewed) = self.skew.step(&row);
    let (dram_reader, burst) = self.dram_reader.step(BurstInput {
      request: issue.and_then(Command::weight_request),
      dram: &self.weights,
    });
    let (array, array_out) = self.array.step(ArrayInput {
      lanes: &skewed.lanes,
      fifo_front: self.fifo.front(),
    });
    let (fifo, fifo_out) = self.fifo.step(FifoInput {
      burst: &burst,
      advance: array_out.advance,
    });
    let (chain, acc) = self.accumulators.chain.step(AccInput {
      control: &skewed.control,
      sums: &array_out.sums,
      memory: &self.accumulators.memory,
    });

    let hazards: Vec<Hazard> = array_out
      .hazard
      .into_iter()
      .chain(fifo_out.overflow.then_some(Hazard::FifoOverflow))
      .collect();
    for &hazard in &hazards {
      match self.config.hazard_policy {
        HazardPolicy::Ignore => {}
        HazardPolicy::Warn => warn!("cycle {}: {}", self.cycle, hazard),
        HazardPolicy::Fail => {
          return Err(SimError::Hazard {
            cycle: self.cycle,
            hazard,
          })
        }
      }
    }

    let events = CycleEvents {
      cycle: self.cycle,
      pc: self.dispatcher.pc(),
      dispatched: dispatch.dispatched,
      stalled: dispatch.stalled,
      redirect: act.redirect,
      mmc_done: acc.done,
      hazards,
    };
    if events.mmc_done {
      debug!("cycle {}: matrix multiply retired", self.cycle);
    }

    self.activation = activation;
    self.dispatcher = dispatcher;
    self.host_dma = host_dma;
    self.feeder = feeder;
    self.skew = skew;
    self.dram_reader = dram_reader;
    self.array = array;
    self.fifo = fifo;
    self.accumulators.chain = chain;

    // activation first so the host path wins a same-row collision
    if let Some(write) = &act.write {
      self.ub.apply(write);
    }
    if let Some(write) = &dma.ub_write {
      self.ub.apply(write);
    }
    if let Some(write) = &dma.host_write {
      self.host.apply(write);
    }
    self.accumulators.memory.apply(&acc.writes);

    self.summary.cycles += 1;
    self.summary.dispatched += u64::from(events.dispatched.is_some());
    self.summary.stall_cycles += u64::from(events.stalled);
    self.summary.hazards.extend(events.hazards.iter().map(|&hazard| HazardEvent {
      cycle: self.cycle,
      hazard,
    }));
    self.cycle += 1;
    Ok(events)
  }

  /// Tick until HLT retires, failing after `max_cycles` further cycles.
  pub fn run(&mut self, max_cycles: u64) -> Result<RunSummary> {
    let start = self.cycle;
    while !self.is_halted() {
      if self.cycle - start >= max_cycles {
        return Err(SimError::CycleLimit { limit: max_cycles });
      }
      self.tick()?;
    }
    info!(
      "halted at pc {} after {} cycles ({} dispatched, {} stalled)",
      self.pc(),
      self.summary.cycles,
      self.summary.dispatched,
      self.summary.stall_cycles
    );
    Ok(self.summary.clone())
  }

  /// Return the pipeline and PC to power-on state. Memory contents are kept.
  pub fn reset(&mut self) {
    self.dispatcher.reset();
    self.host_dma.reset();
    self.feeder.reset();
    self.skew.reset();
    self.array.reset();
    self.dram_reader.reset();
    self.fifo.reset();
    self.accumulators.chain.reset();
    self.activation.reset();
    self.summary = RunSummary::default();
    self.cycle = 0;
  }

  pub fn snapshot(&self) -> TpuSnapshot {
    TpuSnapshot {
      cycle: self.cycle,
      pc: self.pc(),
      halted: self.is_halted(),
      busy: self.busy(),
      scratchpad: self.ub.rows().to_vec(),
      accumulators: self.accumulators.memory.rows(),
      fifo: self.fifo.snapshot(),
      host: self.host.rows().to_vec(),
    }
  }

  pub fn config(&self) -> &TpuConfig {
    &self.config
  }

  pub fn program(&self) -> &Program {
    &self.program
  }

  pub fn cycle(&self) -> u64 {
    self.cycle
  }

  pub fn pc(&self) -> u64 {
    self.dispatcher.pc()
  }

  pub fn is_halted(&self) -> bool {
    self.dispatcher.is_halted()
  }

  pub fn busy(&self) -> BusyCounters {
    self.dispatcher.busy()
  }

  pub fn summary(&self) -> &RunSummary {
    &self.summary
  }

  pub fn ub_row(&self, addr: u64) -> &[i64] {
    self.ub.read(addr)
  }

  pub fn host_row(&self, addr: u64) -> &[i64] {
    self.host.read(addr)
  }

  pub fn accumulator_row(&self, addr: u64) -> Vec<i64> {
    self.accumulators.memory.read_row(addr)
  }

  pub fn fifo_tiles(&self) -> FifoSnapshot {
    self.fifo.snapshot()
  }

  pub fn scratchpad(&self) -> &UnifiedBuffer {
    &self.ub
  }

  pub fn host_memory(&self) -> &HostMemory {
    &self.host
  }

  pub fn array(&self) -> &SystolicArray {
    &self.array
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tpu::activation::ActivationFunction;

  fn config() -> TpuConfig {
    let mut config = TpuConfig::with_matrix_size(4);
    config.hazard_policy = HazardPolicy::Fail;
    config
  }

  #[test]
  fn test_empty_program_runs_into_nops() {
    let mut tpu = Tpu::new(config(), Program::default()).unwrap();
    assert!(matches!(
      tpu.run(10),
      Err(SimError::CycleLimit { limit: 10 })
    ));
    assert_eq!(tpu.pc(), 10);
  }

  #[test]
  fn test_invalid_config_is_rejected() {
    let config = TpuConfig::with_matrix_size(2);
    assert!(matches!(
      Tpu::new(config, Program::default()),
      Err(SimError::Config(_))
    ));
  }

  #[test]
  fn test_mmc_result_lands_on_schedule() {
    let mut tpu = Tpu::new(
      config(),
      Program::new(vec![
        Instruction::rw(0),
        Instruction::sync(),
        Instruction::mmc(0, 0, 1).switch_weights().overwrite(),
        Instruction::hlt(),
      ]),
    )
    .unwrap();
    // identity weights
    let mut eye = vec![0; 16];
    for i in 0..4 {
      eye[i * 4 + i] = 1;
    }
    tpu.store_weight_tile(0, &eye);
    tpu.write_ub_row(0, &[3, -1, 4, 1]);

    let summary = tpu.run(200).unwrap();
    assert_eq!(tpu.accumulator_row(0), vec![3, -1, 4, 1]);
    assert_eq!(summary.dispatched, 4);
    assert!(summary.hazards.is_empty());
    assert_eq!(tpu.fifo_tiles().occupancy, 0);
  }

  #[test]
  fn test_snapshot_reflects_state() {
    let mut tpu = Tpu::new(
      config(),
      Program::new(vec![
        Instruction::act(0, 1, 1, ActivationFunction::Identity),
        Instruction::hlt(),
      ]),
    )
    .unwrap();
    tpu.write_host_row(2, &[1, 2, 3, 300]);
    tpu.run(50).unwrap();

    let snapshot = tpu.snapshot();
    assert!(snapshot.halted);
    assert_eq!(snapshot.pc, 1);
    assert_eq!(snapshot.host[2], vec![1, 2, 3, 44]);
    assert_eq!(snapshot.scratchpad.len(), 256);
    assert_eq!(snapshot.accumulators[0], vec![0; 4]);
    assert!(snapshot.busy.is_idle());
  }

  #[test]
  fn test_host_read_wins_scratchpad_collision() {
    // RHM lands at the end of cycle 2, the ACT dispatched one cycle later writes the same row
    let mut tpu = Tpu::new(
      config(),
      Program::new(vec![
        Instruction::rhm(0, 5, 1),
        Instruction::act(0, 5, 1, ActivationFunction::Identity),
        Instruction::hlt(),
      ]),
    )
    .unwrap();
    tpu.write_host_row(0, &[7, 7, 7, 7]);

    for _ in 0..3 {
      tpu.tick().unwrap();
    }
    assert_eq!(tpu.ub_row(5), &[7, 7, 7, 7]);
    tpu.run(50).unwrap();
    assert_eq!(tpu.ub_row(5), &[7, 7, 7, 7]);
  }
}

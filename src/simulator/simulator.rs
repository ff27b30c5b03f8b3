use std::path::Path;

use log::info;

use super::sim::mode::{SimConfig, StepMode};
use super::sim::records::{TraceRecord, TraceWriter};
use super::sim::shell::{Shell, ShellCommand};
use super::utils::report::print_report;
use crate::arch::tpu::{CycleEvents, RunSummary, Tpu};
use crate::error::{Result, SimError};
use crate::log_info;

/// Drives a `Tpu` in continuous or interactive step mode, tracing every cycle on request.
pub struct Simulator {
  config: SimConfig,
  tpu: Tpu,
  trace: Option<TraceWriter>,
}

impl Simulator {
  pub fn new(config: SimConfig, tpu: Tpu) -> Result<Self> {
    let trace = match &config.trace_file {
      Some(path) => {
        info!("writing cycle trace to {}", path);
        Some(TraceWriter::create(Path::new(path))?)
      }
      None => None,
    };
    Ok(Self { config, tpu, trace })
  }

  pub fn run(&mut self) -> Result<RunSummary> {
    let result = match self.config.step_mode {
      StepMode::Continuous => self.run_continuous(),
      StepMode::Step => self.run_step_mode(),
    };
    if let Some(trace) = &mut self.trace {
      trace.flush()?;
    }
    result
  }

  /// Advance one cycle, recording it to the trace.
  pub fn step(&mut self) -> Result<CycleEvents> {
    let events = self.tpu.tick()?;
    if let Some(trace) = &mut self.trace {
      trace.record(&TraceRecord::new(&events, &self.tpu))?;
    }
    Ok(events)
  }

  fn check_limit(&self) -> Result<()> {
    if self.tpu.cycle() >= self.config.max_cycles {
      return Err(SimError::CycleLimit {
        limit: self.config.max_cycles,
      });
    }
    Ok(())
  }

  fn run_continuous(&mut self) -> Result<RunSummary> {
    log_info!("Continuous mode");
    while !self.tpu.is_halted() {
      self.check_limit()?;
      self.step()?;
    }
    info!("halted at pc {} after {} cycles", self.tpu.pc(), self.tpu.cycle());
    Ok(self.tpu.summary().clone())
  }

  fn run_step_mode(&mut self) -> Result<RunSummary> {
    log_info!("Step mode - Enter steps one cycle, 'si N' steps N, 'c' continues, 'p' prints, 'q' quits");
    let mut shell = Shell::new()?;
    while !self.tpu.is_halted() {
      match shell.read_command()? {
        ShellCommand::Step(n) => {
          for _ in 0..n {
            if self.tpu.is_halted() {
              break;
            }
            self.check_limit()?;
            let events = self.step()?;
            self.print_events(&events);
          }
        }
        ShellCommand::Continue => return self.run_continuous(),
        ShellCommand::Print => print_report(&self.tpu, self.tpu.summary()),
        ShellCommand::Quit => break,
      }
    }
    Ok(self.tpu.summary().clone())
  }

  fn print_events(&self, events: &CycleEvents) {
    let dispatched = events
      .dispatched
      .map(|inst| inst.to_string())
      .unwrap_or_else(|| "-".to_string());
    println!(
      "cycle {:>6}  pc {:>4}  {}{}  busy {:?}  fifo {}",
      events.cycle,
      events.pc,
      dispatched,
      if events.stalled { " (stall)" } else { "" },
      self.tpu.busy(),
      self.tpu.fifo_tiles().occupancy
    );
    for hazard in &events.hazards {
      println!("  hazard: {}", hazard);
    }
  }

  pub fn tpu(&self) -> &Tpu {
    &self.tpu
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tpu::{Instruction, Program, TpuConfig};
  use std::fs;

  fn program() -> Program {
    Program::new(vec![Instruction::rhm(0, 0, 2), Instruction::sync(), Instruction::hlt()])
  }

  #[test]
  fn test_continuous_run_writes_trace() {
    let path = std::env::temp_dir().join(format!("tpusim-trace-{}.jsonl", std::process::id()));
    let config = SimConfig {
      trace_file: Some(path.to_string_lossy().to_string()),
      ..SimConfig::default()
    };
    let tpu = Tpu::new(TpuConfig::with_matrix_size(4), program()).unwrap();
    let mut sim = Simulator::new(config, tpu).unwrap();
    let summary = sim.run().unwrap();
    assert!(sim.tpu().is_halted());

    let text = fs::read_to_string(&path).unwrap();
    fs::remove_file(&path).unwrap();
    assert_eq!(text.lines().count() as u64, summary.cycles);
    assert!(text.lines().last().unwrap().contains("\"dispatched\":\"HLT\""));
  }

  #[test]
  fn test_cycle_limit() {
    let config = SimConfig {
      max_cycles: 3,
      ..SimConfig::default()
    };
    let tpu = Tpu::new(TpuConfig::with_matrix_size(4), program()).unwrap();
    let mut sim = Simulator::new(config, tpu).unwrap();
    assert!(matches!(sim.run(), Err(SimError::CycleLimit { limit: 3 })));
    assert_eq!(sim.tpu().cycle(), 3);
  }
}

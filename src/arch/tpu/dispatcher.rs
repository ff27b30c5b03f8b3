//! Decoder and hazard-aware dispatcher: owns the PC and one busy counter per unit class.
//!
//! At most one instruction dispatches per cycle. A dispatched instruction is latched in the
//! issue register and reaches its unit at the start of the next cycle. An instruction whose
//! class is still busy stalls in place: the PC holds and nothing is issued.

use log::{debug, trace};
use serde::Serialize;

use super::activation::ActivationFunction;
use super::isa::{flags, Instruction, Opcode, Program};
use super::memory::UnifiedBuffer;
use super::params::{unsigned_bits, TpuConfig};
use crate::builtin::Module;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
  pub host_addr: u64,
  pub ub_addr: u64,
  pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmcCommand {
  pub ub_addr: u64,
  pub acc_addr: u64,
  pub length: u64,
  pub overwrite: bool,
  pub switch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActCommand {
  pub acc_addr: u64,
  pub ub_addr: u64,
  pub length: u64,
  pub function: ActivationFunction,
  /// Address of the ACT itself; branch offsets are relative to it.
  pub pc: u64,
}

/// A decoded instruction on its way to the unit that executes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  ReadHost(HostCommand),
  ConvertJump { target: u64, ub_addr: u64 },
  WriteHost(HostCommand),
  ReadWeights { tile: u64 },
  Matrix(MmcCommand),
  Activate(ActCommand),
}

impl Command {
  pub fn as_matrix(&self) -> Option<&MmcCommand> {
    match self {
      Command::Matrix(cmd) => Some(cmd),
      _ => None,
    }
  }

  pub fn as_activate(&self) -> Option<&ActCommand> {
    match self {
      Command::Activate(cmd) => Some(cmd),
      _ => None,
    }
  }

  pub fn weight_request(&self) -> Option<u64> {
    match self {
      Command::ReadWeights { tile } => Some(*tile),
      _ => None,
    }
  }
}

/// Remaining busy cycles per unit class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusyCounters {
  pub matrix: u64,
  pub activate: u64,
  /// Shared by RHM and WHM: host transfers run one at a time.
  pub host: u64,
  pub weights: u64,
}

impl BusyCounters {
  pub fn is_idle(&self) -> bool {
    self.matrix == 0
      && self.activate == 0
      && self.host == 0
      && self.weights == 0
  }

  fn decremented(&self) -> Self {
    Self {
      matrix: self.matrix.saturating_sub(1),
      activate: self.activate.saturating_sub(1),
      host: self.host.saturating_sub(1),
      weights: self.weights.saturating_sub(1),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
  name: String,
  config: TpuConfig,
  pc: u64,
  busy: BusyCounters,
  /// Cycles until another weight switch may dispatch.
  switch_cooldown: u64,
  halted: bool,
  issue: Option<Command>,
}

pub struct DispatchInput<'a> {
  pub program: &'a Program,
  /// Read for indirect RHM / WHM addressing.
  pub ub: &'a UnifiedBuffer,
  /// PC override from the activation unit.
  pub redirect: Option<u64>,
  /// The running ACT ended early on a branch or jump.
  pub resolved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutput {
  pub dispatched: Option<Instruction>,
  pub stalled: bool,
}

impl Dispatcher {
  pub fn new(name: impl Into<String>, config: &TpuConfig) -> Self {
    Self {
      name: name.into(),
      config: config.clone(),
      pc: 0,
      busy: BusyCounters::default(),
      switch_cooldown: 0,
      halted: false,
      issue: None,
    }
  }

  pub fn pc(&self) -> u64 {
    self.pc
  }

  pub fn busy(&self) -> BusyCounters {
    self.busy
  }

  pub fn is_halted(&self) -> bool {
    self.halted
  }

  /// The command latched at the last edge, visible to the units this cycle.
  pub fn issue(&self) -> Option<&Command> {
    self.issue.as_ref()
  }

  fn can_dispatch(&self, inst: &Instruction) -> bool {
    let busy = &self.busy;
    // a running ACT may still redirect the PC
    if busy.activate > 0 {
      return false;
    }
    match inst.opcode {
      Opcode::Nop | Opcode::Act => true,
      Opcode::Sync | Opcode::Hlt => busy.is_idle(),
      Opcode::Rhm | Opcode::Whm => busy.host == 0,
      Opcode::Rw => busy.weights == 0,
      Opcode::Mmc => {
        // the cooldown is a backstop: mmc_duration already outlasts it
        busy.matrix == 0 && (!inst.has_flag(flags::SWITCH) || self.switch_cooldown == 0)
      }
    }
  }

  /// Scratchpad row named by element 0 of row `ptr`.
  fn indirect(&self, ub: &UnifiedBuffer, ptr: u64) -> u64 {
    unsigned_bits(ub.read(ptr)[0], self.config.data_width)
  }

  fn host_command(&self, inst: &Instruction, ub: &UnifiedBuffer) -> HostCommand {
    if inst.has_flag(flags::SWITCH) {
      HostCommand {
        host_addr: inst.mem_addr,
        ub_addr: self.indirect(ub, inst.ub_addr),
        length: 1,
      }
    } else {
      HostCommand {
        host_addr: inst.mem_addr,
        ub_addr: inst.ub_addr,
        length: inst.length,
      }
    }
  }

  /// Latch `inst` into `next` and seed its busy counter.
  fn dispatch(&self, inst: &Instruction, ub: &UnifiedBuffer, next: &mut Self) {
    let config = &self.config;
    next.pc = self.pc.wrapping_add(1);

    match inst.opcode {
      Opcode::Nop | Opcode::Sync => {}
      Opcode::Hlt => {
        next.pc = self.pc;
        next.halted = true;
      }
      Opcode::Rhm if inst.has_flag(flags::CONVERT) => {
        next.busy.host = config.host_duration(1);
        next.issue = Some(Command::ConvertJump {
          target: inst.mem_addr,
          ub_addr: inst.ub_addr,
        });
      }
      Opcode::Rhm => {
        let cmd = self.host_command(inst, ub);
        next.busy.host = config.host_duration(cmd.length);
        next.issue = Some(Command::ReadHost(cmd));
      }
      Opcode::Whm => {
        let cmd = self.host_command(inst, ub);
        next.busy.host = config.host_duration(cmd.length);
        next.issue = Some(Command::WriteHost(cmd));
      }
      Opcode::Rw => {
        next.busy.weights = config.rw_duration();
        next.issue = Some(Command::ReadWeights {
          tile: inst.mem_addr,
        });
      }
      Opcode::Mmc => {
        let switch = inst.has_flag(flags::SWITCH);
        next.busy.matrix = config.mmc_duration(inst.length);
        if switch {
          next.switch_cooldown = config.matrix_size as u64 + 1;
        }
        next.issue = Some(Command::Matrix(MmcCommand {
          ub_addr: inst.ub_addr,
          acc_addr: inst.mem_addr,
          length: inst.length,
          overwrite: inst.has_flag(flags::OVERWRITE),
          switch,
        }));
      }
      Opcode::Act => {
        next.busy.activate = config.act_duration(inst.length);
        next.issue = Some(Command::Activate(ActCommand {
          acc_addr: inst.mem_addr,
          ub_addr: inst.ub_addr,
          length: inst.length,
          function: inst.act_function(),
          pc: self.pc,
        }));
      }
    }
  }
}

impl Module for Dispatcher {
  type Input<'a> = DispatchInput<'a>;
  type Output = DispatchOutput;

  fn step(&self, input: DispatchInput<'_>) -> (Self, DispatchOutput) {
    let mut next = Self {
      busy: self.busy.decremented(),
      switch_cooldown: self.switch_cooldown.saturating_sub(1),
      issue: None,
      ..self.clone()
    };
    if input.resolved {
      next.busy.activate = 0;
    }

    let mut output = DispatchOutput::default();
    if !self.halted {
      let inst = input.program.fetch(self.pc);
      if self.can_dispatch(&inst) {
        debug!("[{}] pc {}: {}", self.name, self.pc, inst);
        self.dispatch(&inst, input.ub, &mut next);
        output.dispatched = Some(inst);
      } else {
        trace!("[{}] pc {} stalled on {}", self.name, self.pc, inst.opcode);
        output.stalled = true;
      }
    }

    if let Some(target) = input.redirect {
      next.pc = target;
    }
    (next, output)
  }

  fn reset(&mut self) {
    self.pc = 0;
    self.busy = BusyCounters::default();
    self.switch_cooldown = 0;
    self.halted = false;
    self.issue = None;
  }

  fn name(&self) -> &str {
    &self.name
  }
}

//! Instruction set: opcodes, flag bits and the fixed-width big-endian encoding.

use serde::Serialize;
use std::fmt;

use super::activation::ActivationFunction;
use super::params::InstructionLayout;
use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
  Nop,
  Whm,
  Rw,
  Mmc,
  Act,
  Sync,
  Rhm,
  Hlt,
}

impl Opcode {
  pub fn from_bits(bits: u64) -> Option<Self> {
    let op = match bits {
      0 => Opcode::Nop,
      1 => Opcode::Whm,
      2 => Opcode::Rw,
      3 => Opcode::Mmc,
      4 => Opcode::Act,
      5 => Opcode::Sync,
      6 => Opcode::Rhm,
      7 => Opcode::Hlt,
      _ => return None,
    };
    Some(op)
  }

  pub fn bits(self) -> u64 {
    match self {
      Opcode::Nop => 0,
      Opcode::Whm => 1,
      Opcode::Rw => 2,
      Opcode::Mmc => 3,
      Opcode::Act => 4,
      Opcode::Sync => 5,
      Opcode::Rhm => 6,
      Opcode::Hlt => 7,
    }
  }

  pub fn mnemonic(self) -> &'static str {
    match self {
      Opcode::Nop => "NOP",
      Opcode::Whm => "WHM",
      Opcode::Rw => "RW",
      Opcode::Mmc => "MMC",
      Opcode::Act => "ACT",
      Opcode::Sync => "SYNC",
      Opcode::Rhm => "RHM",
      Opcode::Hlt => "HLT",
    }
  }
}

impl fmt::Display for Opcode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.mnemonic())
  }
}

/// Flag bits. Their meaning depends on the opcode.
pub mod flags {
  /// MMC: overwrite the accumulator instead of adding to it.
  pub const OVERWRITE: u64 = 0x01;
  /// MMC: switch to the preloaded weight tile. RHM/WHM: indirect scratchpad address.
  pub const SWITCH: u64 = 0x02;
  /// RHM: synthesize a jump vector instead of reading host memory.
  pub const CONVERT: u64 = 0x04;
  /// ACT: activation function select.
  pub const FUNC_MASK: u64 = 0x03;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instruction {
  pub opcode: Opcode,
  pub flags: u64,
  pub length: u64,
  /// Host row, weight tile or accumulator row, depending on the opcode.
  pub mem_addr: u64,
  /// Scratchpad row.
  pub ub_addr: u64,
}

impl Instruction {
  fn new(opcode: Opcode, flags: u64, length: u64, mem_addr: u64, ub_addr: u64) -> Self {
    Self {
      opcode,
      flags,
      length,
      mem_addr,
      ub_addr,
    }
  }

  pub fn nop() -> Self {
    Self::new(Opcode::Nop, 0, 0, 0, 0)
  }

  pub fn sync() -> Self {
    Self::new(Opcode::Sync, 0, 0, 0, 0)
  }

  pub fn hlt() -> Self {
    Self::new(Opcode::Hlt, 0, 0, 0, 0)
  }

  /// Host rows `host..host+length` into scratchpad rows `ub..ub+length`.
  pub fn rhm(host: u64, ub: u64, length: u64) -> Self {
    Self::new(Opcode::Rhm, 0, length, host, ub)
  }

  /// One host row into the scratchpad row named by element 0 of row `ub_ptr`.
  pub fn rhm_indirect(host: u64, ub_ptr: u64) -> Self {
    Self::new(Opcode::Rhm, flags::SWITCH, 1, host, ub_ptr)
  }

  /// Write a jump-to-`target` control vector into scratchpad row `ub`.
  pub fn rhm_convert(target: u64, ub: u64) -> Self {
    Self::new(Opcode::Rhm, flags::CONVERT, 1, target, ub)
  }

  /// Scratchpad rows `ub..ub+length` out to host rows `host..host+length`.
  pub fn whm(host: u64, ub: u64, length: u64) -> Self {
    Self::new(Opcode::Whm, 0, length, host, ub)
  }

  /// One scratchpad row, named by element 0 of row `ub_ptr`, out to host row `host`.
  pub fn whm_indirect(host: u64, ub_ptr: u64) -> Self {
    Self::new(Opcode::Whm, flags::SWITCH, 1, host, ub_ptr)
  }

  pub fn rw(tile: u64) -> Self {
    Self::new(Opcode::Rw, 0, 0, tile, 0)
  }

  /// Multiply scratchpad rows `ub..ub+length` into accumulator rows `acc..acc+length`.
  pub fn mmc(ub: u64, acc: u64, length: u64) -> Self {
    Self::new(Opcode::Mmc, 0, length, acc, ub)
  }

  pub fn act(acc: u64, ub: u64, length: u64, function: ActivationFunction) -> Self {
    Self::new(Opcode::Act, function.bits(), length, acc, ub)
  }

  pub fn overwrite(mut self) -> Self {
    self.flags |= flags::OVERWRITE;
    self
  }

  pub fn switch_weights(mut self) -> Self {
    self.flags |= flags::SWITCH;
    self
  }

  pub fn has_flag(&self, flag: u64) -> bool {
    self.flags & flag != 0
  }

  pub fn act_function(&self) -> ActivationFunction {
    ActivationFunction::from_bits(self.flags & flags::FUNC_MASK)
  }

  pub fn encode(&self, layout: &InstructionLayout) -> Vec<u8> {
    let values = [
      self.opcode.bits(),
      self.flags,
      self.length,
      self.mem_addr,
      self.ub_addr,
    ];
    let mut bytes = Vec::with_capacity(layout.width());
    for (value, width) in values.iter().zip(layout.fields()) {
      let be = value.to_be_bytes();
      bytes.extend_from_slice(&be[8 - width..]);
    }
    bytes
  }

  /// Decode one instruction; `index` is only used for error reporting.
  pub fn decode(bytes: &[u8], layout: &InstructionLayout, index: usize) -> Result<Self, DecodeError> {
    if bytes.len() != layout.width() {
      return Err(DecodeError::Truncated {
        len: bytes.len(),
        width: layout.width(),
      });
    }

    let mut values = [0u64; 5];
    let mut offset = 0;
    for (slot, width) in values.iter_mut().zip(layout.fields()) {
      *slot = bytes[offset..offset + width]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
      offset += width;
    }

    let opcode =
      Opcode::from_bits(values[0]).ok_or(DecodeError::UnknownOpcode { opcode: values[0], index })?;
    Ok(Self::new(opcode, values[1], values[2], values[3], values[4]))
  }
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.opcode {
      Opcode::Nop | Opcode::Sync | Opcode::Hlt => write!(f, "{}", self.opcode),
      Opcode::Rw => write!(f, "RW tile={}", self.mem_addr),
      _ => write!(
        f,
        "{} flags={:#x} len={} mem={} ub={}",
        self.opcode, self.flags, self.length, self.mem_addr, self.ub_addr
      ),
    }
  }
}

/// An instruction stream. Fetching past the end reads zeroed memory, which decodes as NOP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
  instructions: Vec<Instruction>,
}

impl Program {
  pub fn new(instructions: Vec<Instruction>) -> Self {
    Self { instructions }
  }

  pub fn from_bytes(bytes: &[u8], layout: &InstructionLayout) -> Result<Self, DecodeError> {
    let width = layout.width();
    if bytes.len() % width != 0 {
      return Err(DecodeError::Truncated {
        len: bytes.len(),
        width,
      });
    }
    let instructions = bytes
      .chunks_exact(width)
      .enumerate()
      .map(|(index, chunk)| Instruction::decode(chunk, layout, index))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { instructions })
  }

  pub fn to_bytes(&self, layout: &InstructionLayout) -> Vec<u8> {
    self
      .instructions
      .iter()
      .flat_map(|inst| inst.encode(layout))
      .collect()
  }

  pub fn fetch(&self, pc: u64) -> Instruction {
    usize::try_from(pc)
      .ok()
      .and_then(|pc| self.instructions.get(pc).copied())
      .unwrap_or_else(Instruction::nop)
  }

  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  pub fn instructions(&self) -> &[Instruction] {
    &self.instructions
  }
}

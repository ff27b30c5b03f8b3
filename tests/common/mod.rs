#![allow(dead_code)]

use tpusim::arch::tpu::HazardPolicy;
use tpusim::{Instruction, Program, Tpu, TpuConfig};

pub const N: usize = 4;

pub fn config() -> TpuConfig {
  let mut config = TpuConfig::with_matrix_size(N);
  config.hazard_policy = HazardPolicy::Fail;
  config
}

pub fn tpu(program: Vec<Instruction>) -> Tpu {
  Tpu::new(config(), Program::new(program)).unwrap()
}

/// `scale` times the identity, row-major.
pub fn identity(scale: i64) -> Vec<i64> {
  let mut tile = vec![0; N * N];
  for i in 0..N {
    tile[i * N + i] = scale;
  }
  tile
}

/// Lay instructions out at fixed addresses, NOP in between.
pub fn at(placed: &[(usize, Instruction)]) -> Vec<Instruction> {
  let len = placed.iter().map(|(pc, _)| pc + 1).max().unwrap_or(0);
  let mut program = vec![Instruction::nop(); len];
  for &(pc, inst) in placed {
    program[pc] = inst;
  }
  program
}

/// Reference result of `x * W` for a row-major tile.
pub fn vec_mat(x: &[i64], tile: &[i64]) -> Vec<i64> {
  (0..N)
    .map(|c| (0..N).map(|r| x[r] * tile[r * N + c]).sum())
    .collect()
}

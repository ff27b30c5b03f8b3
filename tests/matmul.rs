mod common;

use common::{identity, tpu, vec_mat, N};
use tpusim::{Instruction, Program, Tpu};

fn weights() -> Vec<i64> {
  (0..N * N).map(|i| (i as i64 % 7) - 3).collect()
}

#[test]
fn dot_product_in_first_column() {
  let mut tile = vec![0; N * N];
  for (r, b) in [5, -6, 7, 8].into_iter().enumerate() {
    tile[r * N] = b;
  }
  let mut tpu = tpu(vec![
    Instruction::rw(3),
    Instruction::sync(),
    Instruction::mmc(0, 9, 1).switch_weights().overwrite(),
    Instruction::hlt(),
  ]);
  tpu.store_weight_tile(3, &tile);
  tpu.write_ub_row(0, &[1, 2, 3, 4]);

  tpu.run(500).unwrap();
  assert_eq!(tpu.accumulator_row(9), vec![46, 0, 0, 0]);
}

#[test]
fn matrix_times_tile_row_by_row() {
  let x = [[1, 2, 3, 4], [-1, 0, 1, 0], [7, -7, 2, 2], [0, 0, 0, 5], [3, 3, 3, 3]];
  let tile = weights();
  let mut tpu = tpu(vec![
    Instruction::rw(0),
    Instruction::sync(),
    Instruction::mmc(4, 16, x.len() as u64).switch_weights().overwrite(),
    Instruction::hlt(),
  ]);
  tpu.store_weight_tile(0, &tile);
  for (i, row) in x.iter().enumerate() {
    tpu.write_ub_row(4 + i as u64, row);
  }

  let summary = tpu.run(500).unwrap();
  for (i, row) in x.iter().enumerate() {
    assert_eq!(tpu.accumulator_row(16 + i as u64), vec_mat(row, &tile), "row {}", i);
  }
  assert_eq!(summary.dispatched, 4);
  assert!(summary.hazards.is_empty());
}

#[test]
fn overwrite_is_idempotent_and_accumulate_adds() {
  let x = [1, -2, 3, 4];
  let mut tpu = tpu(vec![
    Instruction::rw(0),
    Instruction::sync(),
    Instruction::mmc(0, 0, 1).switch_weights().overwrite(),
    Instruction::mmc(0, 0, 1).overwrite(),
    Instruction::mmc(0, 1, 1),
    Instruction::mmc(0, 1, 1),
    // the overwrite discards whatever was accumulated before
    Instruction::mmc(0, 2, 1),
    Instruction::mmc(1, 2, 1).overwrite(),
    Instruction::hlt(),
  ]);
  tpu.store_weight_tile(0, &identity(1));
  tpu.write_ub_row(0, &x);
  tpu.write_ub_row(1, &[0, 5, 0, -5]);

  tpu.run(500).unwrap();
  assert_eq!(tpu.accumulator_row(0), vec![1, -2, 3, 4]);
  assert_eq!(tpu.accumulator_row(1), vec![2, -4, 6, 8]);
  assert_eq!(tpu.accumulator_row(2), vec![0, 5, 0, -5]);
}

#[test]
fn fifo_tiles_are_used_in_order() {
  let x = [1, 2, 3, 4];
  let mut tpu = tpu(vec![
    Instruction::rw(0),
    Instruction::rw(1),
    Instruction::sync(),
    // switches in tile 0
    Instruction::mmc(0, 0, 1).switch_weights().overwrite(),
    // keeps tile 0
    Instruction::mmc(0, 1, 1).overwrite(),
    // switches in tile 1
    Instruction::mmc(0, 2, 1).switch_weights().overwrite(),
    Instruction::hlt(),
  ]);
  tpu.store_weight_tile(0, &identity(1));
  tpu.store_weight_tile(1, &identity(2));
  tpu.write_ub_row(0, &x);

  let summary = tpu.run(1000).unwrap();
  assert!(summary.hazards.is_empty());
  assert_eq!(tpu.accumulator_row(0), vec![1, 2, 3, 4]);
  assert_eq!(tpu.accumulator_row(1), vec![1, 2, 3, 4]);
  assert_eq!(tpu.accumulator_row(2), vec![2, 4, 6, 8]);
  assert_eq!(tpu.fifo_tiles().occupancy, 0);
}

#[test]
fn binary_program_runs_like_the_typed_one() {
  let instructions = vec![
    Instruction::rw(0),
    Instruction::sync(),
    Instruction::mmc(0, 5, 1).switch_weights().overwrite(),
    Instruction::hlt(),
  ];
  let config = common::config();
  let bytes = Program::new(instructions.clone()).to_bytes(&config.layout);
  assert_eq!(bytes.len(), 4 * config.layout.width());
  let decoded = Program::from_bytes(&bytes, &config.layout).unwrap();
  assert_eq!(decoded.instructions(), instructions.as_slice());

  let mut tpu = Tpu::new(config, decoded).unwrap();
  tpu.store_weight_tile(0, &identity(3));
  tpu.write_ub_row(0, &[1, 1, 2, -1]);
  tpu.run(500).unwrap();
  assert_eq!(tpu.accumulator_row(5), vec![3, 3, 6, -3]);
}

#[test]
fn reset_reruns_against_kept_memories() {
  let mut tpu = tpu(vec![
    Instruction::rw(0),
    Instruction::sync(),
    Instruction::mmc(0, 0, 1).switch_weights().overwrite(),
    Instruction::hlt(),
  ]);
  tpu.store_weight_tile(0, &identity(1));
  tpu.write_ub_row(0, &[4, 3, 2, 1]);
  let first = tpu.run(500).unwrap();

  tpu.reset();
  assert_eq!(tpu.pc(), 0);
  assert!(!tpu.is_halted());
  let second = tpu.run(500).unwrap();
  assert_eq!(first, second);
  assert_eq!(tpu.accumulator_row(0), vec![4, 3, 2, 1]);
}

mod common;

use common::tpu;
use tpusim::Instruction;

#[test]
fn read_then_write_back_round_trip() {
  let rows = [[1, 2, 3, 4], [-1, -2, -3, -4], [127, -128, 0, 1], [9, 9, 9, 9]];
  let mut tpu = tpu(vec![
    Instruction::rhm(0, 10, rows.len() as u64),
    Instruction::whm(20, 10, rows.len() as u64),
    Instruction::hlt(),
  ]);
  for (i, row) in rows.iter().enumerate() {
    tpu.write_host_row(i as u64, row);
  }
  let summary = tpu.run(200).unwrap();

  for (i, row) in rows.iter().enumerate() {
    assert_eq!(tpu.ub_row(10 + i as u64), row);
    assert_eq!(tpu.host_row(20 + i as u64), row);
  }
  // the WHM shares the RHM's counter and waits for the last row to land
  assert!(summary.stall_cycles >= rows.len() as u64 + 1);
}

#[test]
fn write_right_after_single_row_read() {
  let mut tpu = tpu(vec![
    Instruction::rhm(0, 10, 1),
    Instruction::whm(20, 10, 1),
    Instruction::hlt(),
  ]);
  tpu.write_host_row(0, &[1, 2, 3, 4]);
  tpu.run(100).unwrap();

  assert_eq!(tpu.ub_row(10), &[1, 2, 3, 4]);
  assert_eq!(tpu.host_row(20), &[1, 2, 3, 4]);
}

#[test]
fn back_to_back_reads_serialize() {
  let mut tpu = tpu(vec![
    Instruction::rhm(0, 0, 2),
    Instruction::rhm(2, 2, 2),
    Instruction::hlt(),
  ]);
  for i in 0..4 {
    tpu.write_host_row(i, &[i as i64; 4]);
  }
  let summary = tpu.run(200).unwrap();

  for i in 0..4 {
    assert_eq!(tpu.ub_row(i), &[i as i64; 4]);
  }
  // the second RHM waits out the first one's length + 1 cycles
  assert!(summary.stall_cycles >= 2);
}

#[test]
fn indirect_transfers_follow_the_pointer_row() {
  let mut tpu = tpu(vec![
    Instruction::rhm_indirect(5, 1),
    Instruction::sync(),
    Instruction::whm_indirect(30, 1),
    Instruction::hlt(),
  ]);
  // pointer 200 is stored as the signed byte -56 and read back unsigned
  tpu.write_ub_row(1, &[200, 0, 0, 0]);
  tpu.write_host_row(5, &[4, 3, 2, 1]);
  tpu.run(200).unwrap();

  assert_eq!(tpu.ub_row(1), &[-56, 0, 0, 0]);
  assert_eq!(tpu.ub_row(200), &[4, 3, 2, 1]);
  assert_eq!(tpu.host_row(30), &[4, 3, 2, 1]);
}

#[test]
fn addresses_wrap_around_memory_size() {
  let mut tpu = tpu(vec![Instruction::rhm(1024 + 3, 256 + 7, 1), Instruction::hlt()]);
  tpu.write_host_row(3, &[5, 6, 7, 8]);
  tpu.run(200).unwrap();
  assert_eq!(tpu.ub_row(7), &[5, 6, 7, 8]);
}

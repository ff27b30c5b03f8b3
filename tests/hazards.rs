mod common;

use common::{config, identity};
use tpusim::arch::tpu::{Hazard, HazardEvent, HazardPolicy};
use tpusim::{Instruction, Program, SimError, Tpu};

fn early_switch() -> Program {
  Program::new(vec![
    Instruction::rw(0),
    // no SYNC: the switch reaches the array long before the tile does
    Instruction::mmc(0, 0, 1).switch_weights().overwrite(),
    Instruction::hlt(),
  ])
}

#[test]
fn fail_policy_aborts_on_the_hazard_cycle() {
  let mut tpu = Tpu::new(config(), early_switch()).unwrap();
  tpu.store_weight_tile(0, &identity(1));
  tpu.write_ub_row(0, &[1, 2, 3, 4]);

  let err = tpu.run(500).unwrap_err();
  assert!(matches!(
    err,
    SimError::Hazard {
      cycle: 3,
      hazard: Hazard::SwitchWithoutWeights
    }
  ));
  // nothing from the failing cycle was committed
  assert_eq!(tpu.cycle(), 3);
}

#[test]
fn warn_policy_records_and_continues() {
  let mut config = config();
  config.hazard_policy = HazardPolicy::Warn;
  let mut tpu = Tpu::new(config, early_switch()).unwrap();
  tpu.store_weight_tile(0, &identity(1));
  tpu.write_ub_row(0, &[1, 2, 3, 4]);

  let summary = tpu.run(500).unwrap();
  assert!(tpu.is_halted());
  assert_eq!(
    summary.hazards,
    vec![HazardEvent {
      cycle: 3,
      hazard: Hazard::SwitchWithoutWeights
    }]
  );
  // the vector met the empty staging registers
  assert_eq!(tpu.accumulator_row(0), vec![0, 0, 0, 0]);
}

#[test]
fn synchronized_program_is_hazard_free() {
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
  tpu.store_weight_tile(0, &identity(1));
  tpu.write_ub_row(0, &[1, 2, 3, 4]);

  assert!(tpu.run(500).unwrap().hazards.is_empty());
  assert_eq!(tpu.accumulator_row(0), vec![1, 2, 3, 4]);
  // the staged tile was consumed by the switch
  assert!(!tpu.array().is_loaded());
}

use std::fmt::Write;

use crate::arch::tpu::{RunSummary, Tpu};

fn write_row(out: &mut String, label: &str, addr: usize, row: &[i64]) {
  let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
  let _ = writeln!(out, "  {}[{:>4}]: [{}]", label, addr, values.join(", "));
}

/// End-of-run report: counters, hazards, then every non-zero scratchpad and accumulator row.
pub fn format_report(tpu: &Tpu, summary: &RunSummary) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "\n--- Simulation Report ---");
  let _ = writeln!(
    out,
    "cycles: {}  dispatched: {}  stalled: {}  pc: {}  halted: {}",
    summary.cycles,
    summary.dispatched,
    summary.stall_cycles,
    tpu.pc(),
    tpu.is_halted()
  );
  if !summary.hazards.is_empty() {
    let _ = writeln!(out, "hazards:");
    for event in &summary.hazards {
      let _ = writeln!(out, "  cycle {}: {}", event.cycle, event.hazard);
    }
  }

  let _ = writeln!(out, "scratchpad:");
  for (addr, row) in tpu.scratchpad().nonzero_rows() {
    write_row(&mut out, "ub", addr, row);
  }

  let _ = writeln!(out, "accumulators:");
  for addr in 0..tpu.config().acc_rows {
    let row = tpu.accumulator_row(addr as u64);
    if row.iter().any(|&v| v != 0) {
      write_row(&mut out, "acc", addr, &row);
    }
  }
  let _ = writeln!(out, "--- End Report ---");
  out
}

pub fn print_report(tpu: &Tpu, summary: &RunSummary) {
  print!("{}", format_report(tpu, summary));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tpu::{Instruction, Program, TpuConfig};

  #[test]
  fn test_report_lists_only_nonzero_rows() {
    let mut tpu = Tpu::new(
      TpuConfig::with_matrix_size(4),
      Program::new(vec![Instruction::rhm(0, 3, 1), Instruction::hlt()]),
    )
    .unwrap();
    tpu.write_host_row(0, &[1, 0, -2, 0]);
    let summary = tpu.run(50).unwrap();

    let report = format_report(&tpu, &summary);
    assert!(report.contains("ub[   3]: [1, 0, -2, 0]"));
    assert!(!report.contains("ub[   0]"));
    assert!(!report.contains("acc["));
    assert!(!report.contains("hazards:"));
  }
}

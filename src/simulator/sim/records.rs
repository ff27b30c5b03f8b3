use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;

use crate::arch::tpu::{BusyCounters, CycleEvents, Hazard, Tpu};

/// One line of the per-cycle trace
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
  pub cycle: u64,
  pub pc: u64,
  pub dispatched: Option<String>,
  pub stalled: bool,
  pub redirect: Option<u64>,
  pub busy: BusyCounters,
  pub fifo_occupancy: usize,
  pub hazards: Vec<Hazard>,
}

impl TraceRecord {
  /// `events` from the cycle just ticked; `tpu` holds the state after its edge.
  pub fn new(events: &CycleEvents, tpu: &Tpu) -> Self {
    Self {
      cycle: events.cycle,
      pc: events.pc,
      dispatched: events.dispatched.map(|inst| inst.to_string()),
      stalled: events.stalled,
      redirect: events.redirect,
      busy: tpu.busy(),
      fifo_occupancy: tpu.fifo_tiles().occupancy,
      hazards: events.hazards.clone(),
    }
  }
}

/// JSON-lines trace sink
pub struct TraceWriter<W: Write = BufWriter<File>> {
  writer: W,
}

impl TraceWriter {
  pub fn create(path: &Path) -> Result<Self> {
    Ok(Self::new(BufWriter::new(File::create(path)?)))
  }
}

impl<W: Write> TraceWriter<W> {
  pub fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn record(&mut self, record: &TraceRecord) -> Result<()> {
    serde_json::to_writer(&mut self.writer, record)?;
    writeln!(self.writer)
  }

  pub fn flush(&mut self) -> Result<()> {
    self.writer.flush()
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tpu::{Instruction, Program, TpuConfig};

  #[test]
  fn test_records_are_json_lines() {
    let config = TpuConfig::with_matrix_size(4);
    let mut tpu = Tpu::new(config, Program::new(vec![Instruction::rw(0), Instruction::sync()])).unwrap();
    let mut trace = TraceWriter::new(Vec::new());
    for _ in 0..3 {
      let events = tpu.tick().unwrap();
      trace.record(&TraceRecord::new(&events, &tpu)).unwrap();
    }

    let text = String::from_utf8(trace.into_inner()).unwrap();
    let lines: Vec<serde_json::Value> = text
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["cycle"], 0);
    assert_eq!(lines[0]["dispatched"], "RW tile=0");
    assert_eq!(lines[1]["stalled"], true);
    assert!(lines[1]["busy"]["weights"].as_u64().unwrap() > 0);
  }
}

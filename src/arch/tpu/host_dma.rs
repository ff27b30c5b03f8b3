//! Host DMA: RHM / WHM transfers between host memory and the scratchpad, one row per cycle.
//! Host reads answer one cycle after the request through a response register.

use log::{debug, trace};

use super::activation::tag;
use super::dispatcher::{Command, HostCommand};
use super::memory::{HostMemory, RowWrite, UnifiedBuffer};
use super::params::{sign_extend, TpuConfig};
use crate::builtin::{Module, Wire};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TransferJob {
  host_addr: u64,
  ub_addr: u64,
  remaining: u64,
}

impl TransferJob {
  fn from_command(cmd: &HostCommand) -> Self {
    Self {
      host_addr: cmd.host_addr,
      ub_addr: cmd.ub_addr,
      remaining: cmd.length,
    }
  }

  fn advanced(&self) -> Option<Self> {
    (self.remaining > 1).then(|| Self {
      host_addr: self.host_addr.wrapping_add(1),
      ub_addr: self.ub_addr.wrapping_add(1),
      remaining: self.remaining - 1,
    })
  }
}

#[derive(Debug, Clone)]
pub struct HostDma {
  name: String,
  n: usize,
  data_width: u32,
  read_job: Option<TransferJob>,
  write_job: Option<TransferJob>,
  /// Host read data (or a synthesized jump row) landing in the scratchpad this cycle.
  response: Wire<RowWrite>,
  /// Host row whose write is acknowledged this cycle.
  ack: Wire<u64>,
}

pub struct HostDmaInput<'a> {
  pub issue: Option<&'a Command>,
  pub ub: &'a UnifiedBuffer,
  pub host: &'a HostMemory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDmaOutput {
  pub ub_write: Option<RowWrite>,
  pub host_write: Option<RowWrite>,
  pub acked: Option<u64>,
}

impl HostDma {
  pub fn new(name: impl Into<String>, config: &TpuConfig) -> Self {
    Self {
      name: name.into(),
      n: config.matrix_size,
      data_width: config.data_width,
      read_job: None,
      write_job: None,
      response: Wire::default(),
      ack: Wire::default(),
    }
  }

  /// `[0, target, 0, .., 0, JUMP]`: an ACT reading this row back jumps to `target`.
  pub fn jump_vector(&self, target: u64) -> Vec<i64> {
    let mut row = vec![0; self.n];
    row[1] = sign_extend(target as i64, self.data_width);
    row[self.n - 1] = tag::JUMP;
    row
  }

  pub fn is_busy(&self) -> bool {
    self.read_job.is_some() || self.write_job.is_some() || self.response.valid
  }
}

impl Module for HostDma {
  type Input<'a> = HostDmaInput<'a>;
  type Output = HostDmaOutput;

  fn step(&self, input: HostDmaInput<'_>) -> (Self, HostDmaOutput) {
    let mut next = self.clone();
    next.response.clear();
    next.ack.clear();

    let mut output = HostDmaOutput {
      ub_write: self.response.get().cloned(),
      acked: self.ack.get().copied(),
      ..HostDmaOutput::default()
    };
    if let Some(addr) = output.acked {
      trace!("[{}] host row {} acknowledged", self.name, addr);
    }

    let mut read_job = self.read_job.clone();
    let mut write_job = self.write_job.clone();
    match input.issue {
      Some(Command::ReadHost(cmd)) => {
        debug!("[{}] read {} rows from host {}", self.name, cmd.length, cmd.host_addr);
        read_job = Some(TransferJob::from_command(cmd));
      }
      Some(Command::WriteHost(cmd)) => {
        debug!("[{}] write {} rows to host {}", self.name, cmd.length, cmd.host_addr);
        write_job = Some(TransferJob::from_command(cmd));
      }
      Some(Command::ConvertJump { target, ub_addr }) => {
        debug!("[{}] jump vector to {} into ub {}", self.name, target, ub_addr);
        next.response.set(RowWrite::new(*ub_addr, self.jump_vector(*target)));
      }
      _ => {}
    }

    next.read_job = None;
    if let Some(job) = read_job.filter(|j| j.remaining > 0) {
      next
        .response
        .set(RowWrite::new(job.ub_addr, input.host.read(job.host_addr).to_vec()));
      next.read_job = job.advanced();
    }

    next.write_job = None;
    if let Some(job) = write_job.filter(|j| j.remaining > 0) {
      output.host_write = Some(RowWrite::new(
        job.host_addr,
        input.ub.read(job.ub_addr).to_vec(),
      ));
      next.ack.set(job.host_addr);
      next.write_job = job.advanced();
    }

    (next, output)
  }

  fn reset(&mut self) {
    self.read_job = None;
    self.write_job = None;
    self.response.clear();
    self.ack.clear();
  }

  fn name(&self) -> &str {
    &self.name
  }
}

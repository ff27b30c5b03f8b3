//! Chip parameters: array size, datapath widths, memory sizes and the instruction layout.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Number of tile slots in the weight FIFO.
pub const FIFO_DEPTH: usize = 4;

/// Extra cycles an MMC stays busy after its last vector enters the skew buffer and the
/// wavefront has crossed the array and the accumulator chain.
pub const MMC_LATENCY: u64 = 2;

/// What the pipeline does when it detects a timing hazard the schedule should have excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardPolicy {
  /// Keep simulating silently; state diverges exactly as the timing rules dictate.
  Ignore,
  /// Log the hazard and keep simulating.
  Warn,
  /// Abort the current cycle with an error.
  Fail,
}

impl Default for HazardPolicy {
  fn default() -> Self {
    if cfg!(debug_assertions) {
      HazardPolicy::Fail
    } else {
      HazardPolicy::Warn
    }
  }
}

/// Byte widths of the instruction fields, in encoding order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionLayout {
  pub opcode_bytes: usize,
  pub flags_bytes: usize,
  pub length_bytes: usize,
  pub host_addr_bytes: usize,
  pub ub_addr_bytes: usize,
}

impl InstructionLayout {
  /// Total instruction width in bytes.
  pub fn width(&self) -> usize {
    self.fields().iter().sum()
  }

  pub(crate) fn fields(&self) -> [usize; 5] {
    [
      self.opcode_bytes,
      self.flags_bytes,
      self.length_bytes,
      self.host_addr_bytes,
      self.ub_addr_bytes,
    ]
  }
}

impl Default for InstructionLayout {
  fn default() -> Self {
    Self {
      opcode_bytes: 1,
      flags_bytes: 1,
      length_bytes: 2,
      host_addr_bytes: 8,
      ub_addr_bytes: 2,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpuConfig {
  /// N: the array is N x N and every vector is N elements wide.
  pub matrix_size: usize,
  /// Bits per scratchpad, host and weight element.
  pub data_width: u32,
  /// Bits of MAC partial sums and accumulator memories.
  pub acc_width: u32,
  pub ub_rows: usize,
  pub acc_rows: usize,
  pub host_rows: usize,
  pub weight_tiles: usize,
  pub burst_bytes: usize,
  pub dram_latency: usize,
  pub hazard_policy: HazardPolicy,
  pub layout: InstructionLayout,
}

impl Default for TpuConfig {
  fn default() -> Self {
    Self {
      matrix_size: 8,
      data_width: 8,
      acc_width: 32,
      ub_rows: 256,
      acc_rows: 256,
      host_rows: 1024,
      weight_tiles: 64,
      burst_bytes: 64,
      dram_latency: 2,
      hazard_policy: HazardPolicy::default(),
      layout: InstructionLayout::default(),
    }
  }
}

impl TpuConfig {
  pub fn with_matrix_size(matrix_size: usize) -> Self {
    Self {
      matrix_size,
      ..Self::default()
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::Invalid(msg));

    if self.matrix_size < 4 {
      return invalid(format!("matrix_size must be at least 4, got {}", self.matrix_size));
    }
    // the control tags 1..=4 must survive truncation to the data width
    if !(4..=32).contains(&self.data_width) {
      return invalid(format!("data_width must be in 4..=32, got {}", self.data_width));
    }
    if self.acc_width < self.data_width || self.acc_width > 63 {
      return invalid(format!(
        "acc_width must be in {}..=63, got {}",
        self.data_width, self.acc_width
      ));
    }
    for (name, rows) in [
      ("ub_rows", self.ub_rows),
      ("acc_rows", self.acc_rows),
      ("host_rows", self.host_rows),
      ("weight_tiles", self.weight_tiles),
    ] {
      if rows == 0 {
        return invalid(format!("{} cannot be zero", name));
      }
    }
    let burst_bits = self.burst_bytes * 8;
    if burst_bits == 0 || burst_bits % self.data_width as usize != 0 {
      return invalid(format!(
        "burst_bytes ({}) must hold a whole number of {}-bit elements",
        self.burst_bytes, self.data_width
      ));
    }
    if self.layout.opcode_bytes == 0 || self.layout.flags_bytes == 0 {
      return invalid("opcode and flags fields need at least one byte".to_string());
    }
    if self.layout.fields().iter().any(|&w| w == 0 || w > 8) {
      return invalid(format!("instruction field widths must be 1..=8 bytes: {:?}", self.layout));
    }
    Ok(())
  }

  /// Elements delivered by one weight DRAM burst.
  pub fn burst_elems(&self) -> usize {
    self.burst_bytes * 8 / self.data_width as usize
  }

  /// Bursts needed to move one N x N tile.
  pub fn bursts_per_tile(&self) -> usize {
    let n = self.matrix_size;
    (n * n).div_ceil(self.burst_elems())
  }

  pub fn mmc_duration(&self, length: u64) -> u64 {
    2 * self.matrix_size as u64 + length + MMC_LATENCY
  }

  /// Covers the DRAM fetch, the FIFO ripple and the array's programming window.
  pub fn rw_duration(&self) -> u64 {
    (self.bursts_per_tile() + self.dram_latency + self.matrix_size + FIFO_DEPTH) as u64
  }

  pub fn host_duration(&self, length: u64) -> u64 {
    length + 1
  }

  pub fn act_duration(&self, length: u64) -> u64 {
    length
  }

  /// Truncate to a signed `data_width` element.
  pub fn wrap_data(&self, value: i64) -> i64 {
    sign_extend(value, self.data_width)
  }
}

/// Keep the low `bits` bits of `value`, reinterpreted as two's complement.
pub fn sign_extend(value: i64, bits: u32) -> i64 {
  let shift = 64 - bits;
  (value << shift) >> shift
}

/// The low `bits` bits of `value` as an unsigned word.
pub fn unsigned_bits(value: i64, bits: u32) -> u64 {
  if bits >= 64 {
    value as u64
  } else {
    (value as u64) & ((1u64 << bits) - 1)
  }
}

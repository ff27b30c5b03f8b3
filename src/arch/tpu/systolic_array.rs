//! Weight-stationary N x N MAC array with double-buffered weights.
//!
//! Activations enter on the left (already skewed) and move one cell right per cycle; partial
//! sums move one cell down per cycle and leave at the bottom. Each cell holds two weight
//! registers: the active one feeds the multiplier while the other is programmed in the
//! background. A switch bit travelling with the data flips the selector cell by cell, so the
//! new weights take effect exactly on the wavefront that carries the switch.

use log::{debug, trace};

use super::params::TpuConfig;
use super::skew_buffer::Lane;
use super::weight_fifo::Tile;
use super::Hazard;
use crate::builtin::{DelayLine, Module};

/// Weight programming signal. `tag` counts the cells it has travelled down; a cell commits
/// the weight into its inactive register when the tag it sees equals N - 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct WeightFeed {
  weight: i64,
  tag: usize,
  wen: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacCell {
  weights: [i64; 2],
  active: usize,
  /// Registered activation, forwarded right.
  left: Lane,
  /// Registered partial sum, forwarded down.
  sum: i64,
  /// Registered programming signal, forwarded down.
  feed: WeightFeed,
}

impl MacCell {
  pub fn active_weight(&self) -> i64 {
    self.weights[self.active]
  }

  pub fn staged_weight(&self) -> i64 {
    self.weights[1 - self.active]
  }
}

#[derive(Debug, Clone)]
pub struct SystolicArray {
  name: String,
  n: usize,
  acc_width: u32,
  /// Row-major.
  cells: Vec<MacCell>,
  /// Column c delays the broadcast by c cycles along the top edge.
  top: Vec<DelayLine<WeightFeed>>,
  /// Current programming step.
  programming: Option<usize>,
  /// The staged registers hold a complete tile waiting for a switch.
  loaded: bool,
}

pub struct ArrayInput<'a> {
  /// Left-edge lanes from the skew buffer, one per row.
  pub lanes: &'a [Lane],
  /// Tile in the FIFO's front stage, present iff the FIFO is ready.
  pub fifo_front: Option<&'a Tile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayOutput {
  /// Partial sums leaving the bottom row, one per column.
  pub sums: Vec<i64>,
  /// The front tile has been fully broadcast; the FIFO may drop it.
  pub advance: bool,
  pub hazard: Option<Hazard>,
}

impl SystolicArray {
  pub fn new(name: impl Into<String>, config: &TpuConfig) -> Self {
    let n = config.matrix_size;
    Self {
      name: name.into(),
      n,
      acc_width: config.acc_width,
      cells: vec![MacCell::default(); n * n],
      top: (0..n).map(DelayLine::new).collect(),
      programming: None,
      loaded: false,
    }
  }

  pub fn cell(&self, row: usize, col: usize) -> &MacCell {
    &self.cells[row * self.n + col]
  }

  /// The weights currently feeding the multipliers, row-major.
  pub fn active_weights(&self) -> Vec<Vec<i64>> {
    (0..self.n)
      .map(|r| (0..self.n).map(|c| self.cell(r, c).active_weight()).collect())
      .collect()
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded
  }

  pub fn is_programming(&self) -> bool {
    self.programming.is_some()
  }

  fn wrap(&self, value: i64) -> i64 {
    super::params::sign_extend(value, self.acc_width)
  }
}

impl Module for SystolicArray {
  type Input<'a> = ArrayInput<'a>;
  type Output = ArrayOutput;

  fn step(&self, input: ArrayInput<'_>) -> (Self, ArrayOutput) {
    let n = self.n;
    let mut output = ArrayOutput {
      sums: (0..n).map(|c| self.cell(n - 1, c).sum).collect(),
      ..ArrayOutput::default()
    };

    let entry = &input.lanes[0];
    let switching = entry.valid && entry.switch;
    if switching {
      if self.programming.is_some() {
        output.hazard = Some(Hazard::SwitchDuringLoad);
      } else if !self.loaded {
        output.hazard = Some(Hazard::SwitchWithoutWeights);
      } else {
        debug!("[{}] weight switch at array entry", self.name);
      }
    }
    let loaded = self.loaded && !switching;

    // step k broadcasts tile row N-1-k so that it settles in array row N-1-k
    let broadcast: Vec<WeightFeed> = match (self.programming, input.fifo_front) {
      (Some(k), Some(tile)) => tile
        .row(n - 1 - k)
        .iter()
        .map(|&weight| WeightFeed {
          weight,
          tag: k,
          wen: true,
        })
        .collect(),
      _ => vec![WeightFeed::default(); n],
    };
    let top_in: Vec<WeightFeed> = self
      .top
      .iter()
      .zip(&broadcast)
      .map(|(line, feed)| line.output(feed))
      .collect();

    let mut cells = Vec::with_capacity(n * n);
    for r in 0..n {
      for c in 0..n {
        let cell = self.cell(r, c);
        let left = if c == 0 {
          input.lanes[r].clone()
        } else {
          self.cell(r, c - 1).left.clone()
        };
        let sum_in = if r == 0 { 0 } else { self.cell(r - 1, c).sum };
        let feed = if r == 0 {
          top_in[c].clone()
        } else {
          self.cell(r - 1, c).feed.clone()
        };

        let active = if left.valid && left.switch {
          1 - cell.active
        } else {
          cell.active
        };
        let sum = self.wrap(cell.weights[active].wrapping_mul(left.data).wrapping_add(sum_in));
        let mut weights = cell.weights;
        if feed.wen && feed.tag == n - 1 {
          weights[1 - active] = feed.weight;
        }

        cells.push(MacCell {
          weights,
          active,
          left,
          sum,
          feed: WeightFeed {
            tag: feed.tag + 1,
            ..feed
          },
        });
      }
    }

    let (programming, loaded) = match self.programming {
      Some(k) if k + 1 == n => {
        output.advance = true;
        debug!("[{}] tile staged", self.name);
        (None, true)
      }
      Some(k) => (Some(k + 1), loaded),
      None if !loaded && input.fifo_front.is_some() => {
        trace!("[{}] programming from fifo front", self.name);
        (Some(0), false)
      }
      None => (None, loaded),
    };

    let next = Self {
      name: self.name.clone(),
      n,
      acc_width: self.acc_width,
      cells,
      top: self
        .top
        .iter()
        .zip(broadcast)
        .map(|(line, feed)| line.shifted(feed))
        .collect(),
      programming,
      loaded,
    };
    (next, output)
  }

  fn reset(&mut self) {
    self.cells.iter_mut().for_each(|c| *c = MacCell::default());
    self.top.iter_mut().for_each(DelayLine::reset);
    self.programming = None;
    self.loaded = false;
  }

  fn name(&self) -> &str {
    &self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tpu::skew_buffer::{AccControl, MatrixRow, SkewBuffer};
  use crate::builtin::Wire;

  const N: usize = 4;

  fn tile() -> Tile {
    Tile::new(N, (1..=(N * N) as i64).collect())
  }

  fn idle_lanes() -> Vec<Lane> {
    vec![Lane::default(); N]
  }

  #[test]
  fn test_programming_takes_n_cycles() {
    let config = TpuConfig::with_matrix_size(N);
    let mut array = SystolicArray::new("array", &config);
    let tile = tile();
    let lanes = idle_lanes();

    let mut advance_at = None;
    for t in 0..8 {
      let (next, out) = array.step(ArrayInput {
        lanes: &lanes,
        fifo_front: advance_at.is_none().then_some(&tile),
      });
      array = next;
      if out.advance {
        advance_at = Some(t);
      }
    }
    // decides at 0, broadcasts at 1..=4
    assert_eq!(advance_at, Some(N));
    assert!(array.is_loaded());
    // nothing switched yet
    assert_eq!(array.active_weights(), vec![vec![0; N]; N]);
    for r in 0..N {
      for c in 0..N {
        assert_eq!(array.cell(r, c).staged_weight(), tile.get(r, c));
      }
    }
  }

  #[test]
  fn test_switch_without_weights_is_a_hazard() {
    let config = TpuConfig::with_matrix_size(N);
    let array = SystolicArray::new("array", &config);
    let mut lanes = idle_lanes();
    lanes[0] = Lane {
      data: 1,
      valid: true,
      switch: true,
    };
    let (_, out) = array.step(ArrayInput {
      lanes: &lanes,
      fifo_front: None,
    });
    assert_eq!(out.hazard, Some(Hazard::SwitchWithoutWeights));
  }

  #[test]
  fn test_vector_times_tile_with_column_skew() {
    let config = TpuConfig::with_matrix_size(N);
    let mut array = SystolicArray::new("array", &config);
    let mut skew = SkewBuffer::new("skew", N);
    let tile = tile();
    let x = [1i64, 2, 3, 4];

    let mut fifo_has_tile = true;
    let mut results = vec![None; N];
    for t in 0..16 {
      let row = if t == 6 {
        Wire::driven(MatrixRow {
          data: x.to_vec(),
          switch: true,
          control: AccControl::default(),
        })
      } else {
        Wire::default()
      };
      let (next_skew, skewed) = skew.step(&row);
      let (next_array, out) = array.step(ArrayInput {
        lanes: &skewed.lanes,
        fifo_front: fifo_has_tile.then_some(&tile),
      });
      assert_eq!(out.hazard, None);
      if out.advance {
        fifo_has_tile = false;
      }
      for c in 0..N {
        if t == 6 + N + 1 + c {
          results[c] = Some(out.sums[c]);
        }
      }
      skew = next_skew;
      array = next_array;
    }

    for c in 0..N {
      let expected: i64 = (0..N).map(|r| x[r] * tile.get(r, c)).sum();
      assert_eq!(results[c], Some(expected), "column {}", c);
    }
    assert_eq!(array.cell(2, 1).active_weight(), tile.get(2, 1));
  }
}

//! Flat memory images: signed big-endian elements of `ceil(data_width / 8)` bytes, row-major.
//! With the default 8-bit data width that is one signed byte per element.

use std::io;

use crate::arch::tpu::{Tpu, TpuConfig};
use crate::error::Result;

pub fn element_bytes(config: &TpuConfig) -> usize {
  config.data_width.div_ceil(8) as usize
}

fn decode_elements(bytes: &[u8], width: usize) -> Vec<i64> {
  bytes
    .chunks_exact(width)
    .map(|chunk| {
      let raw = chunk.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
      let shift = 64 - 8 * width as u32;
      ((raw << shift) as i64) >> shift
    })
    .collect()
}

fn encode_elements(values: &[i64], width: usize, out: &mut Vec<u8>) {
  for &v in values {
    let bytes = v.to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
  }
}

fn split_image(bytes: &[u8], chunk: usize, what: &str) -> Result<Vec<Vec<u8>>> {
  if bytes.len() % chunk != 0 {
    return Err(
      io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{} image is {} bytes, not a multiple of {}", what, bytes.len(), chunk),
      )
      .into(),
    );
  }
  Ok(bytes.chunks(chunk).map(<[u8]>::to_vec).collect())
}

/// Load host memory rows from row 0 on. Returns the number of rows written.
pub fn load_host_image(tpu: &mut Tpu, bytes: &[u8]) -> Result<usize> {
  let width = element_bytes(tpu.config());
  let n = tpu.config().matrix_size;
  let rows = split_image(bytes, n * width, "host")?;
  for (addr, row) in rows.iter().enumerate() {
    tpu.write_host_row(addr as u64, &decode_elements(row, width));
  }
  Ok(rows.len())
}

/// Load N x N weight tiles from tile 0 on. Returns the number of tiles written.
pub fn load_weight_image(tpu: &mut Tpu, bytes: &[u8]) -> Result<usize> {
  let width = element_bytes(tpu.config());
  let n = tpu.config().matrix_size;
  let tiles = split_image(bytes, n * n * width, "weight")?;
  for (addr, tile) in tiles.iter().enumerate() {
    tpu.store_weight_tile(addr as u64, &decode_elements(tile, width));
  }
  Ok(tiles.len())
}

/// The whole host memory in the same image format.
pub fn dump_host_image(tpu: &Tpu) -> Vec<u8> {
  let width = element_bytes(tpu.config());
  let mut out = Vec::new();
  for row in tpu.host_memory().rows() {
    encode_elements(row, width, &mut out);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::tpu::Program;

  fn tpu(data_width: u32) -> Tpu {
    let mut config = TpuConfig::with_matrix_size(4);
    config.data_width = data_width;
    config.host_rows = 4;
    Tpu::new(config, Program::default()).unwrap()
  }

  #[test]
  fn test_signed_bytes() {
    let mut tpu = tpu(8);
    let rows = load_host_image(&mut tpu, &[1, 0xff, 0x80, 0x7f, 5, 6, 7, 8]).unwrap();
    assert_eq!(rows, 2);
    assert_eq!(tpu.host_row(0), &[1, -1, -128, 127]);
    assert_eq!(tpu.host_row(1), &[5, 6, 7, 8]);

    let dump = dump_host_image(&tpu);
    assert_eq!(dump.len(), 16);
    assert_eq!(&dump[..4], &[1, 0xff, 0x80, 0x7f]);
    assert!(dump[8..].iter().all(|&b| b == 0));
  }

  #[test]
  fn test_wide_elements() {
    let mut tpu = tpu(16);
    load_host_image(&mut tpu, &[0xff, 0xfe, 0x01, 0x00, 0, 0, 0, 3]).unwrap();
    assert_eq!(tpu.host_row(0), &[-2, 256, 0, 3]);
  }

  #[test]
  fn test_ragged_image_is_rejected() {
    let mut tpu = tpu(8);
    assert!(load_host_image(&mut tpu, &[1, 2, 3]).is_err());
    assert!(load_weight_image(&mut tpu, &[0; 15]).is_err());
    assert_eq!(load_weight_image(&mut tpu, &[0; 32]).unwrap(), 2);
  }
}

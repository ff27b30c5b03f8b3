//! Fixed-length chains of pipeline registers

/// `len` registers in series: a value entering at cycle t leaves at cycle t + len.
/// Register 0 is nearest the input; a zero-length line is a plain wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayLine<T> {
  regs: Vec<T>,
}

impl<T: Clone + Default> DelayLine<T> {
  pub fn new(len: usize) -> Self {
    Self {
      regs: vec![T::default(); len],
    }
  }

  pub fn len(&self) -> usize {
    self.regs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.regs.is_empty()
  }

  /// The value leaving the line during this cycle.
  pub fn output(&self, input: &T) -> T {
    match self.regs.last() {
      Some(last) => last.clone(),
      None => input.clone(),
    }
  }

  /// The registers after the next clock edge, with `input` captured by register 0.
  pub fn shifted(&self, input: T) -> Self {
    let mut regs = Vec::with_capacity(self.regs.len());
    if !self.regs.is_empty() {
      regs.push(input);
      regs.extend(self.regs[..self.regs.len() - 1].iter().cloned());
    }
    Self { regs }
  }

  pub fn reset(&mut self) {
    self.regs.fill(T::default());
  }
}

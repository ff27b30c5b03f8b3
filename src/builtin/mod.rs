//! Clocked module plumbing shared by every pipeline component
mod delay;
mod port;

pub use delay::DelayLine;
pub use port::Wire;

/// A synchronous pipeline component.
///
/// `step` is evaluated once per clock cycle: it reads only the registers committed at the
/// previous edge (`&self`) plus this cycle's inputs, and returns the registers to commit at
/// the next edge together with the outputs driven during the cycle. Nothing is mutated in
/// place, so the top level can evaluate components in any order and commit them atomically.
pub trait Module: Sized {
  type Input<'a>;
  type Output;

  fn step(&self, input: Self::Input<'_>) -> (Self, Self::Output);

  /// Return every register to its power-on value.
  fn reset(&mut self);

  fn name(&self) -> &str;
}

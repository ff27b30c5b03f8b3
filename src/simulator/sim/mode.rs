use crate::simulator::config::SimulationSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
  pub quiet: bool,
  pub step_mode: StepMode,
  pub trace_file: Option<String>,
  pub max_cycles: u64,
}

impl Default for SimConfig {
  fn default() -> Self {
    SimConfig::from(&SimulationSection::default())
  }
}

impl From<&SimulationSection> for SimConfig {
  fn from(section: &SimulationSection) -> Self {
    Self {
      quiet: section.quiet,
      step_mode: if section.step_mode {
        StepMode::Step
      } else {
        StepMode::Continuous
      },
      trace_file: (!section.trace_file.is_empty()).then(|| section.trace_file.clone()),
      max_cycles: section.max_cycles,
    }
  }
}

/// tpusim - cycle-accurate systolic-array TPU simulator
///
/// Loads a binary instruction stream plus optional host and weight images,
/// runs it to HLT and prints the end-of-run report.
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tpusim::simulator::config::{load_and_merge_configs, to_toml};
use tpusim::simulator::utils::image::{dump_host_image, load_host_image, load_weight_image};
use tpusim::simulator::utils::log::init_log;
use tpusim::simulator::utils::report::print_report;
use tpusim::simulator::Simulator;
use tpusim::{log_info, Program, Result, SimConfig, Tpu};

#[derive(Parser, Debug)]
#[command(name = "tpusim", version, about = "Cycle-accurate systolic-array TPU simulator")]
struct Args {
  /// Binary instruction stream
  #[arg(short, long, required_unless_present = "dump_config")]
  program: Option<PathBuf>,

  /// Host memory image
  #[arg(long)]
  host: Option<PathBuf>,

  /// Weight DRAM image
  #[arg(short, long)]
  weights: Option<PathBuf>,

  /// Configuration file layered over the built-in defaults
  #[arg(short, long)]
  config: Option<String>,

  /// Interactive step mode
  #[arg(short, long)]
  step: bool,

  #[arg(short, long)]
  quiet: bool,

  /// JSON-lines per-cycle trace output
  #[arg(long)]
  trace_file: Option<String>,

  #[arg(long)]
  max_cycles: Option<u64>,

  /// Print the effective configuration and exit
  #[arg(long)]
  dump_config: bool,

  /// Write the final host memory image here
  #[arg(long)]
  dump_host: Option<PathBuf>,
}

fn run(args: Args) -> Result<()> {
  let root = std::env::current_dir()?;
  let app = load_and_merge_configs(
    args.config.as_deref(),
    &root,
    args.quiet,
    args.step,
    args.trace_file.as_deref(),
    args.max_cycles,
  )?;
  init_log(app.simulation.quiet);

  if args.dump_config {
    print!("{}", to_toml(&app)?);
    return Ok(());
  }

  let Some(program_path) = args.program else {
    return Ok(());
  };
  let program = Program::from_bytes(&fs::read(&program_path)?, &app.tpu.layout)?;
  log_info!("Loaded {} instructions from {}", program.len(), program_path.display());

  let mut tpu = Tpu::new(app.tpu.clone(), program)?;
  if let Some(path) = &args.host {
    let rows = load_host_image(&mut tpu, &fs::read(path)?)?;
    log_info!("Loaded {} host rows from {}", rows, path.display());
  }
  if let Some(path) = &args.weights {
    let tiles = load_weight_image(&mut tpu, &fs::read(path)?)?;
    log_info!("Loaded {} weight tiles from {}", tiles, path.display());
  }

  let mut simulator = Simulator::new(SimConfig::from(&app.simulation), tpu)?;
  let summary = simulator.run()?;
  print_report(simulator.tpu(), &summary);

  if let Some(path) = &args.dump_host {
    write_host_dump(simulator.tpu(), path)?;
  }
  Ok(())
}

fn write_host_dump(tpu: &Tpu, path: &Path) -> Result<()> {
  fs::write(path, dump_host_image(tpu))?;
  log_info!("Host memory written to {}", path.display());
  Ok(())
}

fn main() -> ExitCode {
  match run(Args::parse()) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("tpusim: {}", err);
      ExitCode::FAILURE
    }
  }
}

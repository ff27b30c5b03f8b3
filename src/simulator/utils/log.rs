//! Logging setup and the console echo used by the run harness.

use std::sync::atomic::{AtomicBool, Ordering};

static ENABLE_LOG: AtomicBool = AtomicBool::new(true);

/// Set console echo enabled
pub fn set_log(enabled: bool) {
  ENABLE_LOG.store(enabled, Ordering::Relaxed);
}

/// Check if console echo is enabled, default is true
pub fn is_log_enabled() -> bool {
  ENABLE_LOG.load(Ordering::Relaxed)
}

/// Install the `env_logger` backend. `RUST_LOG` overrides the default level,
/// which is `info`, or `warn` when quiet. Calling this twice is harmless.
pub fn init_log(quiet: bool) {
  set_log(!quiet);
  let default = if quiet { "warn" } else { "info" };
  let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
    .format_timestamp(None)
    .try_init();
}

/// Print a message with a blue [Log] prefix unless quiet
#[macro_export]
macro_rules! log_info {
  ($($arg:tt)*) => {
    if $crate::simulator::utils::log::is_log_enabled() {
      println!("\x1b[34m[Log]\x1b[0m {}", format!($($arg)*));
    }
  };
}

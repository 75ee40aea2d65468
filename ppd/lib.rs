use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser as _;

pub mod actions;
pub mod drivers;
pub mod engine;
pub mod profile;

pub mod dbus;
pub mod fs;

pub mod auth;
pub mod client;
pub mod daemon;
pub mod error;
pub mod lock;
pub mod persistence;
pub mod upower;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
pub struct Cli {
  #[command(flatten)]
  verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

  /// Root prefix for sysfs and procfs access. Tests point this at a shadow
  /// tree.
  #[arg(long, env = "POWER_PROFILE_DAEMON_ROOT", default_value = "/")]
  pub root: PathBuf,

  /// Where the last user-chosen profile is persisted.
  #[arg(long, env = "POWER_PROFILE_DAEMON_STATE_FILE")]
  pub state_file: Option<PathBuf>,
}

pub fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  yansi::whenever(yansi::Condition::TTY_AND_COLOR);

  env_logger::Builder::new()
    .filter_level(cli.verbosity.log_level_filter())
    .format_timestamp(None)
    .format_module_path(false)
    .init();

  log::info!("starting power profile daemon");

  // Everything runs on one scheduler thread: bus calls, watcher callbacks
  // and timers interleave between transactions, never during one.
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to build the event loop")?;

  runtime.block_on(daemon::run(cli))
}

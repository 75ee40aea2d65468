use std::{
  collections::HashMap,
  process,
};

use anyhow::Context as _;
use clap::{
  Parser,
  Subcommand,
};
use zbus::zvariant::OwnedValue;

use ppd::{
  client::PowerProfilesProxy,
  profile::Profile,
};

#[derive(Parser, Debug)]
#[command(
  name = "powerprofilesctl",
  version,
  about = "Query and set power profiles"
)]
struct Ctl {
  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the available profiles and their drivers
  List,

  /// Print the currently active profile
  Get,

  /// Switch to the given profile
  Set {
    profile: String,
  },

  /// List the active profile holds
  ListHolds,

  /// Hold a profile for the lifetime of a command
  Launch {
    /// Profile to hold while the command runs.
    #[arg(short, long, default_value = "performance")]
    profile: String,

    /// Reason reported to the daemon.
    #[arg(short, long)]
    reason: Option<String>,

    /// Application id reported to the daemon.
    #[arg(short = 'i', long)]
    app_id: Option<String>,

    /// Command to run.
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
  },

  /// Print the client and daemon versions
  Version,
}

fn main() {
  match run() {
    Ok(code) => process::exit(code),

    Err(error) => {
      eprintln!("error: {error:#}");
      process::exit(1);
    },
  }
}

fn run() -> anyhow::Result<i32> {
  let cli = Ctl::parse();

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to build the event loop")?;

  runtime.block_on(execute(cli))
}

async fn execute(cli: Ctl) -> anyhow::Result<i32> {
  let connection = zbus::Connection::system()
    .await
    .context("failed to connect to the system bus")?;

  let proxy = PowerProfilesProxy::new(&connection)
    .await
    .context("failed to reach the daemon, is it running?")?;

  match cli.command.unwrap_or(Command::List) {
    Command::Get => {
      let active = proxy
        .active_profile()
        .await
        .context("failed to read the active profile")?;

      println!("{active}");
    },

    Command::List => {
      list(&proxy).await?;
    },

    Command::Set { profile } => {
      if Profile::parse(&profile).is_none() {
        anyhow::bail!(
          "invalid profile '{profile}', valid: power-saver, balanced, \
           performance"
        );
      }

      proxy
        .set_active_profile(&profile)
        .await
        .context("failed to set the profile")?;
    },

    Command::ListHolds => {
      list_holds(&proxy).await?;
    },

    Command::Launch {
      profile,
      reason,
      app_id,
      command,
    } => return launch(&proxy, profile, reason, app_id, command).await,

    Command::Version => {
      let daemon = proxy
        .version()
        .await
        .context("failed to read the daemon version")?;

      println!("client: {version}", version = env!("CARGO_PKG_VERSION"));
      println!("daemon: {daemon}");
    },
  }

  Ok(0)
}

fn string_field(
  row: &HashMap<String, OwnedValue>,
  key: &str,
) -> Option<String> {
  row
    .get(key)
    .and_then(|value| String::try_from(value.clone()).ok())
}

async fn list(proxy: &PowerProfilesProxy<'_>) -> anyhow::Result<i32> {
  let active = proxy
    .active_profile()
    .await
    .context("failed to read the active profile")?;
  let degraded = proxy
    .performance_degraded()
    .await
    .context("failed to read the degradation state")?;
  let profiles = proxy
    .profiles()
    .await
    .context("failed to read the profile list")?;

  // Performance first, like the profiles feel to the user.
  let mut rows = profiles.into_iter().rev().peekable();

  while let Some(row) = rows.next() {
    let Some(name) = string_field(&row, "Profile") else {
      continue;
    };

    let marker = if name == active { "*" } else { " " };
    println!("{marker} {name}:");

    if let Some(cpu_driver) = string_field(&row, "CpuDriver") {
      println!("    CpuDriver:      {cpu_driver}");
    }

    if let Some(platform_driver) = string_field(&row, "PlatformDriver") {
      println!("    PlatformDriver: {platform_driver}");
    }

    if name == "performance" {
      println!(
        "    Degraded:       {state}",
        state = if degraded.is_empty() { "no" } else { &degraded },
      );
    }

    if rows.peek().is_some() {
      println!();
    }
  }

  Ok(0)
}

async fn list_holds(proxy: &PowerProfilesProxy<'_>) -> anyhow::Result<i32> {
  let holds = proxy
    .active_profile_holds()
    .await
    .context("failed to read the hold list")?;

  for (index, hold) in holds.iter().enumerate() {
    if index > 0 {
      println!();
    }

    println!("Hold:");
    println!(
      "  Profile:       {profile}",
      profile = string_field(hold, "Profile").unwrap_or_default(),
    );
    println!(
      "  ApplicationId: {application_id}",
      application_id = string_field(hold, "ApplicationId").unwrap_or_default(),
    );
    println!(
      "  Reason:        {reason}",
      reason = string_field(hold, "Reason").unwrap_or_default(),
    );
  }

  Ok(0)
}

/// Hold `profile` while a child command runs, then release. If we die first
/// the daemon notices the vanished bus name and drops the hold itself.
async fn launch(
  proxy: &PowerProfilesProxy<'_>,
  profile: String,
  reason: Option<String>,
  app_id: Option<String>,
  command: Vec<String>,
) -> anyhow::Result<i32> {
  let (program, args) =
    command.split_first().context("no command given")?;

  let reason =
    reason.unwrap_or_else(|| "launched by powerprofilesctl".to_owned());
  let app_id = app_id.unwrap_or_else(|| program.clone());

  let cookie = proxy
    .hold_profile(&profile, &reason, &app_id)
    .await
    .with_context(|| format!("failed to hold '{profile}'"))?;

  let status = tokio::process::Command::new(program)
    .args(args)
    .status()
    .await;

  let _ = proxy.release_profile(cookie).await;

  let status =
    status.with_context(|| format!("failed to run '{program}'"))?;

  Ok(status.code().unwrap_or(1))
}

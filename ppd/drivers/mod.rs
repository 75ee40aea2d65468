use std::{
  collections::HashSet,
  path::{
    Path,
    PathBuf,
  },
};

use crate::{
  fs::Sysfs,
  profile::Profile,
};

pub mod amd_pstate;
pub mod fake;
pub mod intel_pstate;
pub mod placeholder;
pub mod platform_profile;

/// Which control plane a back end drives. At most one driver of each kind is
/// active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
  Cpu,
  Platform,
}

/// Outcome of probing a back end against the running kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
  /// Prerequisites present, driver operational.
  Loaded,

  /// Prerequisites missing but expected to appear later (module load,
  /// firmware handshake). The driver stays dormant and is re-probed when its
  /// watched directories change.
  Defer,

  /// Not usable on this system.
  Failed(String),
}

/// What a monitored file change means to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
  None,

  /// The driver's degradation state changed.
  DegradationChanged,

  /// The kernel value was changed behind our back (firmware hotkey). Treated
  /// like a manual profile selection.
  ProfileChanged(Profile),
}

/// A back end translating the abstract profile into kernel writes.
///
/// Mutation only ever happens through `&mut self` under the engine's
/// transaction lock; the `Send + Sync` bound is what lets the registry live
/// inside that lock.
pub trait Driver: Send + Sync {
  fn id(&self) -> &'static str;

  fn kind(&self) -> Kind;

  fn probe(&mut self) -> Probe;

  /// Profiles this back end can realize.
  fn profiles(&self) -> Vec<Profile>;

  fn apply(&mut self, profile: Profile) -> anyhow::Result<()>;

  fn degradation(&self) -> Option<String> {
    None
  }

  fn inhibited(&self) -> Option<String> {
    None
  }

  /// Directories whose contents this driver wants change events for, both
  /// while dormant (prerequisites) and while loaded (external writes).
  fn monitor_dirs(&self) -> Vec<PathBuf> {
    Vec::new()
  }

  fn handle_change(&mut self, _path: &Path) -> Notice {
    Notice::None
  }
}

/// Parse a comma-separated id blocklist, as carried by
/// `POWER_PROFILE_DAEMON_DRIVER_BLOCK` and `POWER_PROFILE_DAEMON_ACTION_BLOCK`.
pub fn parse_blocklist(value: Option<&str>) -> HashSet<String> {
  value
    .unwrap_or_default()
    .split(',')
    .map(str::trim)
    .filter(|id| !id.is_empty())
    .map(str::to_owned)
    .collect()
}

/// All known back ends in registration order. The first loaded driver of each
/// kind becomes active.
pub fn candidates(
  sysfs: &Sysfs,
  blocked: &HashSet<String>,
  with_fake: bool,
) -> Vec<Box<dyn Driver>> {
  let mut drivers: Vec<Box<dyn Driver>> = Vec::new();

  if with_fake {
    drivers.push(Box::new(fake::Fake));
  }

  drivers.push(Box::new(intel_pstate::IntelPstate::new(sysfs.clone())));
  drivers.push(Box::new(amd_pstate::AmdPstate::new(sysfs.clone())));
  drivers.push(Box::new(platform_profile::PlatformProfile::new(
    sysfs.clone(),
  )));

  drivers.retain(|driver| {
    let keep = !blocked.contains(driver.id());

    if !keep {
      log::info!("driver '{id}' is blocklisted", id = driver.id());
    }

    keep
  });

  drivers
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blocklist_splits_on_commas_and_ignores_blanks() {
    let blocked =
      parse_blocklist(Some("platform_profile, amd_pstate,,intel_pstate "));

    assert!(blocked.contains("platform_profile"));
    assert!(blocked.contains("amd_pstate"));
    assert!(blocked.contains("intel_pstate"));
    assert_eq!(blocked.len(), 3);

    assert!(parse_blocklist(None).is_empty());
    assert!(parse_blocklist(Some("")).is_empty());
  }

  #[test]
  fn blocklisted_drivers_are_dropped_from_the_candidate_set() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());

    let blocked = parse_blocklist(Some("platform_profile,amd_pstate"));
    let drivers = candidates(&sysfs, &blocked, false);

    assert_eq!(
      drivers.iter().map(|driver| driver.id()).collect::<Vec<_>>(),
      ["intel_pstate"],
    );
  }
}

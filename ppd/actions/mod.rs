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

pub mod amdgpu_panel_power;
pub mod trickle_charge;

/// A per-profile side effect outside core policy. Actions cannot veto a
/// transition and are never rolled back; failures are logged and forgotten.
pub trait Action: Send + Sync {
  fn id(&self) -> &'static str;

  fn activate(
    &mut self,
    profile: Profile,
    on_battery: bool,
  ) -> anyhow::Result<()>;

  /// Directories to watch for device hotplug.
  fn monitor_dirs(&self) -> Vec<PathBuf> {
    Vec::new()
  }

  /// A new device directory appeared under a watched directory.
  fn handle_created(
    &mut self,
    _path: &Path,
    _profile: Profile,
    _on_battery: bool,
  ) -> anyhow::Result<()> {
    Ok(())
  }
}

/// All built-in actions in registration order, minus the blocklisted ones.
pub fn candidates(
  sysfs: &Sysfs,
  blocked: &HashSet<String>,
) -> Vec<Box<dyn Action>> {
  let mut actions: Vec<Box<dyn Action>> = vec![
    Box::new(trickle_charge::TrickleCharge::new(sysfs.clone())),
    Box::new(amdgpu_panel_power::AmdgpuPanelPower::new(sysfs.clone())),
  ];

  actions.retain(|action| {
    let keep = !blocked.contains(action.id());

    if !keep {
      log::info!("action '{id}' is blocklisted", id = action.id());
    }

    keep
  });

  actions
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::drivers::parse_blocklist;

  #[test]
  fn blocklisted_actions_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());

    let actions =
      candidates(&sysfs, &parse_blocklist(Some("amdgpu_panel_power")));

    assert_eq!(
      actions.iter().map(|action| action.id()).collect::<Vec<_>>(),
      ["trickle_charge"],
    );
  }
}

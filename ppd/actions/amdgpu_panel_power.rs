use anyhow::Context;

use crate::{
  fs::Sysfs,
  profile::Profile,
};

use super::Action;

const DRM_DIR: &str = "sys/class/drm";

/// Panel self-refresh aggressiveness, 0 (off) to 4.
fn savings_level(profile: Profile) -> &'static str {
  match profile {
    Profile::Performance => "0",
    Profile::Balanced => "1",
    Profile::PowerSaver => "3",
  }
}

/// Drives the `panel_power_savings` knob of amdgpu-driven eDP panels. The
/// technique costs color accuracy, so it is only dialed in on battery; on AC
/// it is switched off regardless of profile.
pub struct AmdgpuPanelPower {
  sysfs: Sysfs,
}

impl AmdgpuPanelPower {
  pub fn new(sysfs: Sysfs) -> Self {
    Self { sysfs }
  }
}

impl Action for AmdgpuPanelPower {
  fn id(&self) -> &'static str {
    "amdgpu_panel_power"
  }

  fn activate(
    &mut self,
    profile: Profile,
    on_battery: bool,
  ) -> anyhow::Result<()> {
    let Some(entries) = self.sysfs.read_dir(DRM_DIR)? else {
      return Ok(());
    };

    let value = if on_battery {
      savings_level(profile)
    } else {
      "0"
    };

    for entry in entries {
      let entry = entry.context("failed to read drm entry")?;

      if !entry.file_name().to_string_lossy().contains("-eDP-") {
        continue;
      }

      let connector = entry.path();

      if self.sysfs.read(connector.join("status"))?.as_deref()
        != Some("connected")
      {
        continue;
      }

      let knob = connector.join("amdgpu/panel_power_savings");

      if !self.sysfs.exists(&knob) {
        continue;
      }

      self
        .sysfs
        .write(&knob, value)
        .context("failed to set panel power savings")?;

      log::debug!(
        "panel power savings of '{connector}' set to {value}",
        connector = connector.display(),
      );
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  fn panel(sysfs: &Sysfs, name: &str, status: &str) -> PathBuf {
    let dir = sysfs.at(format!("{DRM_DIR}/{name}"));
    std::fs::create_dir_all(dir.join("amdgpu")).unwrap();
    std::fs::write(dir.join("status"), format!("{status}\n")).unwrap();
    std::fs::write(dir.join("amdgpu/panel_power_savings"), "0").unwrap();

    dir
  }

  fn level(panel: &PathBuf) -> String {
    String::from_utf8(
      std::fs::read(panel.join("amdgpu/panel_power_savings")).unwrap(),
    )
    .unwrap()
  }

  #[test]
  fn battery_levels_follow_the_profile() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());
    let edp = panel(&sysfs, "card0-eDP-1", "connected");

    let mut action = AmdgpuPanelPower::new(sysfs);

    action.activate(Profile::PowerSaver, true).unwrap();
    assert_eq!(level(&edp), "3");

    action.activate(Profile::Balanced, true).unwrap();
    assert_eq!(level(&edp), "1");

    action.activate(Profile::Performance, true).unwrap();
    assert_eq!(level(&edp), "0");
  }

  #[test]
  fn on_ac_the_savings_are_off_for_every_profile() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());
    let edp = panel(&sysfs, "card0-eDP-1", "connected");

    let mut action = AmdgpuPanelPower::new(sysfs);

    action.activate(Profile::PowerSaver, false).unwrap();
    assert_eq!(level(&edp), "0");
  }

  #[test]
  fn disconnected_panels_and_other_connectors_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());

    let unplugged = panel(&sysfs, "card0-eDP-2", "disconnected");
    let hdmi = panel(&sysfs, "card0-HDMI-A-1", "connected");

    let mut action = AmdgpuPanelPower::new(sysfs);
    action.activate(Profile::PowerSaver, true).unwrap();

    assert_eq!(level(&unplugged), "0");
    assert_eq!(level(&hdmi), "0");
  }
}

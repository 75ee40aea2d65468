use std::path::{
  Path,
  PathBuf,
};

use anyhow::Context;

use crate::{
  fs::Sysfs,
  profile::Profile,
};

use super::Action;

const SUPPLY_DIR: &str = "sys/class/power_supply";

fn charge_type(profile: Profile) -> &'static str {
  match profile {
    Profile::PowerSaver => "Trickle",
    Profile::Balanced | Profile::Performance => "Fast",
  }
}

/// Slows the charging of `scope=Device` power supplies (phones and other
/// peripherals charging off the machine) while power-saving. System supplies
/// are never touched.
pub struct TrickleCharge {
  sysfs: Sysfs,
}

impl TrickleCharge {
  pub fn new(sysfs: Sysfs) -> Self {
    Self { sysfs }
  }

  fn apply_supply(
    &self,
    supply: &Path,
    profile: Profile,
  ) -> anyhow::Result<()> {
    if self.sysfs.read(supply.join("scope"))?.as_deref() != Some("Device") {
      return Ok(());
    }

    let knob = supply.join("charge_type");

    let Some(current) = self.sysfs.read(&knob)? else {
      return Ok(());
    };

    let target = charge_type(profile);

    // Leave the mtime alone when nothing would change.
    if current == target {
      return Ok(());
    }

    self
      .sysfs
      .write(&knob, target)
      .context("failed to set the charge type")?;

    log::debug!(
      "charge type of '{supply}' set to {target}",
      supply = supply.display(),
    );

    Ok(())
  }
}

impl Action for TrickleCharge {
  fn id(&self) -> &'static str {
    "trickle_charge"
  }

  fn activate(
    &mut self,
    profile: Profile,
    _on_battery: bool,
  ) -> anyhow::Result<()> {
    let Some(entries) = self.sysfs.read_dir(SUPPLY_DIR)? else {
      return Ok(());
    };

    for entry in entries {
      let entry = entry.context("failed to read power supply entry")?;

      self.apply_supply(&entry.path(), profile)?;
    }

    Ok(())
  }

  fn monitor_dirs(&self) -> Vec<PathBuf> {
    vec![self.sysfs.at(SUPPLY_DIR)]
  }

  fn handle_created(
    &mut self,
    path: &Path,
    profile: Profile,
    _on_battery: bool,
  ) -> anyhow::Result<()> {
    if path.parent() != Some(self.sysfs.at(SUPPLY_DIR).as_path()) {
      return Ok(());
    }

    self.apply_supply(path, profile)
  }
}

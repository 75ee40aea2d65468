use std::path::PathBuf;

use anyhow::Context;

use crate::{
  fs::Sysfs,
  profile::Profile,
};

use super::{
  Driver,
  Kind,
  Probe,
};

const PSTATE_DIR: &str = "sys/devices/system/cpu/amd_pstate";
const STATUS: &str = "sys/devices/system/cpu/amd_pstate/status";
const PM_PROFILE: &str = "sys/firmware/acpi/pm_profile";
const CPUFREQ_DIR: &str = "sys/devices/system/cpu/cpufreq";

/// ACPI FADT preferred PM profile codes for server-class machines, where
/// energy-preference juggling does more harm than good.
const SERVER_PM_PROFILES: &[u32] = &[4, 5, 7];

fn epp_token(profile: Profile) -> &'static str {
  match profile {
    Profile::PowerSaver => "power",
    Profile::Balanced => "balance_performance",
    Profile::Performance => "performance",
  }
}

fn governor(profile: Profile) -> &'static str {
  match profile {
    Profile::PowerSaver | Profile::Balanced => "powersave",
    Profile::Performance => "performance",
  }
}

/// AMD P-State back end. Drives the energy-performance preference and the
/// scaling governor of every cpufreq policy.
pub struct AmdPstate {
  sysfs:    Sysfs,
  policies: Vec<PathBuf>,
}

impl AmdPstate {
  pub fn new(sysfs: Sysfs) -> Self {
    Self {
      sysfs,
      policies: Vec::new(),
    }
  }

  fn probe_inner(&mut self) -> anyhow::Result<Probe> {
    let Some(status) = self.sysfs.read(STATUS)? else {
      return Ok(Probe::Defer);
    };

    if status != "active" {
      return Ok(Probe::Failed(format!(
        "amd_pstate status is '{status}'"
      )));
    }

    if let Some(pm_profile) = self.sysfs.read_n::<u32>(PM_PROFILE)? {
      if SERVER_PM_PROFILES.contains(&pm_profile) {
        return Ok(Probe::Failed(format!(
          "server PM profile ({pm_profile})"
        )));
      }
    }

    self.policies = super::intel_pstate::policy_dirs(&self.sysfs)?;

    if self.policies.is_empty() {
      return Ok(Probe::Defer);
    }

    log::info!(
      "amd_pstate loaded ({policies} policies)",
      policies = self.policies.len(),
    );

    Ok(Probe::Loaded)
  }
}

impl Driver for AmdPstate {
  fn id(&self) -> &'static str {
    "amd_pstate"
  }

  fn kind(&self) -> Kind {
    Kind::Cpu
  }

  fn probe(&mut self) -> Probe {
    match self.probe_inner() {
      Ok(probe) => probe,
      Err(error) => Probe::Failed(format!("{error:#}")),
    }
  }

  fn profiles(&self) -> Vec<Profile> {
    Profile::all().to_vec()
  }

  fn apply(&mut self, profile: Profile) -> anyhow::Result<()> {
    for policy in &self.policies {
      self
        .sysfs
        .write(
          policy.join("energy_performance_preference"),
          epp_token(profile),
        )
        .context("failed to set the energy performance preference")?;

      self
        .sysfs
        .write(policy.join("scaling_governor"), governor(profile))
        .context("failed to set the scaling governor")?;
    }

    Ok(())
  }

  fn monitor_dirs(&self) -> Vec<PathBuf> {
    vec![self.sysfs.at(PSTATE_DIR), self.sysfs.at(CPUFREQ_DIR)]
  }
}

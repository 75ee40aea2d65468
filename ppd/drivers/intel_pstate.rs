use std::path::{
  Path,
  PathBuf,
};

use anyhow::Context;

use crate::{
  fs::Sysfs,
  profile::Profile,
};

use super::{
  Driver,
  Kind,
  Notice,
  Probe,
};

const PSTATE_DIR: &str = "sys/devices/system/cpu/intel_pstate";
const STATUS: &str = "sys/devices/system/cpu/intel_pstate/status";
const NO_TURBO: &str = "sys/devices/system/cpu/intel_pstate/no_turbo";
const TURBO_PCT: &str = "sys/devices/system/cpu/intel_pstate/turbo_pct";
const CPU_DIR: &str = "sys/devices/system/cpu";
const CPUFREQ_DIR: &str = "sys/devices/system/cpu/cpufreq";

fn epp_token(profile: Profile) -> &'static str {
  match profile {
    Profile::PowerSaver => "power",
    Profile::Balanced => "balance_performance",
    Profile::Performance => "performance",
  }
}

fn epb_value(profile: Profile) -> &'static str {
  match profile {
    Profile::PowerSaver => "15",
    Profile::Balanced => "6",
    Profile::Performance => "0",
  }
}

/// Intel P-State back end.
///
/// In active mode the energy-performance preference of every cpufreq policy
/// is driven; the legacy per-cpu energy-perf-bias knob is driven alongside
/// when present, and alone when the driver sits in passive mode. `no_turbo`
/// is monitored as a thermal degradation signal.
pub struct IntelPstate {
  sysfs:    Sysfs,
  /// `cpufreq/policy*` directories, relative to the root.
  policies: Vec<PathBuf>,
  /// `cpu*/power/energy_perf_bias` files, relative to the root.
  epb:      Vec<PathBuf>,
  /// Whether the preference knob is usable (status == active).
  use_epp:  bool,
  degraded: bool,
}

impl IntelPstate {
  pub fn new(sysfs: Sysfs) -> Self {
    Self {
      sysfs,
      policies: Vec::new(),
      epb: Vec::new(),
      use_epp: false,
      degraded: false,
    }
  }

  fn refresh_turbo(&mut self) -> bool {
    let no_turbo =
      matches!(self.sysfs.read_n::<u32>(NO_TURBO), Ok(Some(1)));

    // turbo_pct of zero means the part has no turbo at all; losing nothing
    // is not a degradation.
    let turbo_capable =
      !matches!(self.sysfs.read_n::<u32>(TURBO_PCT), Ok(Some(0)));

    let degraded = no_turbo && turbo_capable;
    let changed = degraded != self.degraded;
    self.degraded = degraded;

    changed
  }

  fn probe_inner(&mut self) -> anyhow::Result<Probe> {
    let Some(status) = self.sysfs.read(STATUS)? else {
      return Ok(Probe::Defer);
    };

    self.policies = policy_dirs(&self.sysfs)?;
    self.epb = epb_knobs(&self.sysfs)?;

    match status.as_str() {
      "active" => {
        if self.policies.is_empty() {
          return Ok(Probe::Defer);
        }

        // EPP cannot be lowered under the performance governor; flip such
        // policies to powersave once so the preference writes stick.
        for policy in &self.policies {
          let governor_path = policy.join("scaling_governor");

          if self.sysfs.read(&governor_path)?.as_deref()
            == Some("performance")
          {
            self.sysfs.write(&governor_path, "powersave").context(
              "failed to reset the scaling governor to powersave",
            )?;
          }
        }

        self.use_epp = true;
      },

      "passive" => {
        if self.epb.is_empty() {
          return Ok(Probe::Failed(
            "intel_pstate is in passive mode".to_owned(),
          ));
        }

        // Only the legacy bias knob is functional without HWP.
        self.use_epp = false;
      },

      other => {
        return Ok(Probe::Failed(format!(
          "intel_pstate status is '{other}'"
        )));
      },
    }

    self.refresh_turbo();

    log::info!(
      "intel_pstate loaded ({mode} mode, {policies} policies, {epb} bias \
       knobs)",
      mode = status,
      policies = self.policies.len(),
      epb = self.epb.len(),
    );

    Ok(Probe::Loaded)
  }
}

/// Enumerate `cpufreq/policy*` directories carrying a preference knob,
/// relative to the root, in stable order. Shared with the AMD back end.
pub(crate) fn policy_dirs(sysfs: &Sysfs) -> anyhow::Result<Vec<PathBuf>> {
  let mut policies = Vec::new();

  let Some(entries) = sysfs.read_dir(CPUFREQ_DIR)? else {
    return Ok(policies);
  };

  for entry in entries {
    let entry = entry.context("failed to read cpufreq entry")?;
    let name = entry.file_name();

    let Some(name) = name.to_str() else {
      continue;
    };

    if !name.starts_with("policy")
      || name["policy".len()..].parse::<u32>().is_err()
    {
      continue;
    }

    let policy = PathBuf::from(CPUFREQ_DIR).join(name);

    if sysfs.exists(policy.join("energy_performance_preference")) {
      policies.push(policy);
    }
  }

  policies.sort();

  Ok(policies)
}

/// Enumerate per-cpu `power/energy_perf_bias` knobs, relative to the root.
fn epb_knobs(sysfs: &Sysfs) -> anyhow::Result<Vec<PathBuf>> {
  let mut knobs = Vec::new();

  let Some(entries) = sysfs.read_dir(CPU_DIR)? else {
    return Ok(knobs);
  };

  for entry in entries {
    let entry = entry.context("failed to read cpu entry")?;
    let name = entry.file_name();

    let Some(name) = name.to_str() else {
      continue;
    };

    let Some(number) = name.strip_prefix("cpu") else {
      continue;
    };

    if number.parse::<u32>().is_err() {
      continue;
    }

    let knob = PathBuf::from(CPU_DIR)
      .join(name)
      .join("power/energy_perf_bias");

    if sysfs.exists(&knob) {
      knobs.push(knob);
    }
  }

  knobs.sort();

  Ok(knobs)
}

impl Driver for IntelPstate {
  fn id(&self) -> &'static str {
    "intel_pstate"
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
    if self.use_epp {
      for policy in &self.policies {
        self
          .sysfs
          .write(
            policy.join("energy_performance_preference"),
            epp_token(profile),
          )
          .context("failed to set the energy performance preference")?;
      }
    }

    for knob in &self.epb {
      self
        .sysfs
        .write(knob, epb_value(profile))
        .context("failed to set the energy perf bias")?;
    }

    Ok(())
  }

  fn degradation(&self) -> Option<String> {
    self
      .degraded
      .then(|| "high-operating-temperature".to_owned())
  }

  fn monitor_dirs(&self) -> Vec<PathBuf> {
    vec![self.sysfs.at(PSTATE_DIR), self.sysfs.at(CPUFREQ_DIR)]
  }

  fn handle_change(&mut self, path: &Path) -> Notice {
    if path != self.sysfs.at(NO_TURBO) && path != self.sysfs.at(TURBO_PCT) {
      return Notice::None;
    }

    if self.refresh_turbo() {
      Notice::DegradationChanged
    } else {
      Notice::None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fixture(status: &str, policies: usize) -> (tempfile::TempDir, Sysfs) {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());

    std::fs::create_dir_all(sysfs.at(PSTATE_DIR)).unwrap();
    std::fs::write(sysfs.at(STATUS), format!("{status}\n")).unwrap();
    std::fs::write(sysfs.at(NO_TURBO), "0\n").unwrap();

    for number in 0..policies {
      let policy = sysfs.at(format!("{CPUFREQ_DIR}/policy{number}"));
      std::fs::create_dir_all(&policy).unwrap();
      std::fs::write(policy.join("scaling_governor"), "powersave\n").unwrap();
      std::fs::write(
        policy.join("energy_performance_preference"),
        "performance\n",
      )
      .unwrap();
    }

    (dir, sysfs)
  }

  fn add_epb(sysfs: &Sysfs, cpu: usize, value: &str) {
    let dir = sysfs.at(format!("{CPU_DIR}/cpu{cpu}/power"));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("energy_perf_bias"), value).unwrap();
  }

  fn epp(sysfs: &Sysfs, policy: usize) -> String {
    sysfs
      .read(format!(
        "{CPUFREQ_DIR}/policy{policy}/energy_performance_preference"
      ))
      .unwrap()
      .unwrap()
  }

  #[test]
  fn missing_status_defers() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());

    let mut driver = IntelPstate::new(sysfs);
    assert_eq!(driver.probe(), Probe::Defer);
  }

  #[test]
  fn active_mode_writes_every_policy() {
    let (_dir, sysfs) = fixture("active", 2);
    let mut driver = IntelPstate::new(sysfs.clone());

    assert_eq!(driver.probe(), Probe::Loaded);

    driver.apply(Profile::Balanced).unwrap();
    assert_eq!(epp(&sysfs, 0), "balance_performance");
    assert_eq!(epp(&sysfs, 1), "balance_performance");

    driver.apply(Profile::Performance).unwrap();
    assert_eq!(epp(&sysfs, 1), "performance");

    driver.apply(Profile::PowerSaver).unwrap();
    assert_eq!(epp(&sysfs, 0), "power");
  }

  #[test]
  fn performance_governor_is_reset_to_powersave_at_probe() {
    let (_dir, sysfs) = fixture("active", 1);
    std::fs::write(
      sysfs.at(format!("{CPUFREQ_DIR}/policy0/scaling_governor")),
      "performance\n",
    )
    .unwrap();

    let mut driver = IntelPstate::new(sysfs.clone());
    assert_eq!(driver.probe(), Probe::Loaded);

    assert_eq!(
      sysfs
        .read(format!("{CPUFREQ_DIR}/policy0/scaling_governor"))
        .unwrap()
        .unwrap(),
      "powersave",
    );
  }

  #[test]
  fn passive_mode_without_bias_knobs_fails() {
    let (_dir, sysfs) = fixture("passive", 1);
    let mut driver = IntelPstate::new(sysfs);

    assert!(matches!(driver.probe(), Probe::Failed(_)));
  }

  #[test]
  fn passive_mode_with_bias_knobs_drives_only_the_bias() {
    let (_dir, sysfs) = fixture("passive", 1);
    add_epb(&sysfs, 0, "6");

    let mut driver = IntelPstate::new(sysfs.clone());
    assert_eq!(driver.probe(), Probe::Loaded);

    driver.apply(Profile::PowerSaver).unwrap();
    assert_eq!(
      sysfs
        .read(format!("{CPU_DIR}/cpu0/power/energy_perf_bias"))
        .unwrap()
        .unwrap(),
      "15",
    );
    // The preference file is not functional in passive mode.
    assert_eq!(epp(&sysfs, 0), "performance");

    driver.apply(Profile::Performance).unwrap();
    assert_eq!(
      sysfs
        .read(format!("{CPU_DIR}/cpu0/power/energy_perf_bias"))
        .unwrap()
        .unwrap(),
      "0",
    );
  }

  #[test]
  fn active_mode_with_bias_knobs_drives_both() {
    let (_dir, sysfs) = fixture("active", 1);
    add_epb(&sysfs, 0, "6");
    add_epb(&sysfs, 1, "6");

    let mut driver = IntelPstate::new(sysfs.clone());
    assert_eq!(driver.probe(), Probe::Loaded);

    driver.apply(Profile::PowerSaver).unwrap();
    assert_eq!(epp(&sysfs, 0), "power");
    assert_eq!(
      sysfs
        .read(format!("{CPU_DIR}/cpu1/power/energy_perf_bias"))
        .unwrap()
        .unwrap(),
      "15",
    );
  }

  #[test]
  fn disabling_turbo_degrades_performance() {
    let (_dir, sysfs) = fixture("active", 1);
    let mut driver = IntelPstate::new(sysfs.clone());

    assert_eq!(driver.probe(), Probe::Loaded);
    assert_eq!(driver.degradation(), None);

    std::fs::write(sysfs.at(NO_TURBO), "1\n").unwrap();
    assert_eq!(
      driver.handle_change(&sysfs.at(NO_TURBO)),
      Notice::DegradationChanged,
    );
    assert_eq!(
      driver.degradation(),
      Some("high-operating-temperature".to_owned()),
    );

    std::fs::write(sysfs.at(NO_TURBO), "0\n").unwrap();
    assert_eq!(
      driver.handle_change(&sysfs.at(NO_TURBO)),
      Notice::DegradationChanged,
    );
    assert_eq!(driver.degradation(), None);
  }

  #[test]
  fn turboless_hardware_never_degrades() {
    let (_dir, sysfs) = fixture("active", 1);
    std::fs::write(sysfs.at(NO_TURBO), "1\n").unwrap();
    std::fs::write(sysfs.at(TURBO_PCT), "0\n").unwrap();

    let mut driver = IntelPstate::new(sysfs.clone());
    assert_eq!(driver.probe(), Probe::Loaded);
    assert_eq!(driver.degradation(), None);

    assert_eq!(driver.handle_change(&sysfs.at(NO_TURBO)), Notice::None);
  }
}

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

const CHOICES: &str = "sys/firmware/acpi/platform_profile_choices";
const PROFILE: &str = "sys/firmware/acpi/platform_profile";
const ACPI_DIR: &str = "sys/firmware/acpi";

const DYTC_LAPMODE: &str =
  "sys/devices/platform/thinkpad_acpi/dytc_lapmode";
const DYTC_DIR: &str = "sys/devices/platform/thinkpad_acpi";

/// ACPI platform profile back end.
///
/// Maps the abstract profiles onto whatever firmware tokens the machine
/// advertises in `platform_profile_choices` and follows external writes to
/// `platform_profile` (firmware hotkeys such as Fn+H). On ThinkPads the DYTC
/// lap sensor is bound as a degradation source.
pub struct PlatformProfile {
  sysfs:    Sysfs,
  choices:  Vec<String>,
  /// Last value we wrote or acknowledged, used to tell our own writes apart
  /// from external ones when the monitor fires.
  current:  Option<String>,
  has_dytc: bool,
  lap_mode: bool,
}

/// How a firmware token reads back as an abstract profile. `cool` is a fan
/// posture and reads as balanced even though it doubles as the power-saver
/// write token of last resort.
fn value_to_profile(value: &str) -> Option<Profile> {
  match value {
    "low-power" | "quiet" => Some(Profile::PowerSaver),
    "cool" | "balanced" => Some(Profile::Balanced),
    "performance" | "balanced-performance" => Some(Profile::Performance),
    _ => None,
  }
}

impl PlatformProfile {
  pub fn new(sysfs: Sysfs) -> Self {
    Self {
      sysfs,
      choices: Vec::new(),
      current: None,
      has_dytc: false,
      lap_mode: false,
    }
  }

  fn has_choice(&self, token: &str) -> bool {
    self.choices.iter().any(|choice| choice == token)
  }

  /// The firmware token written for `profile`, by preference order.
  fn write_token(&self, profile: Profile) -> Option<&'static str> {
    let preferences: &[&'static str] = match profile {
      Profile::PowerSaver => &["low-power", "quiet", "cool"],
      Profile::Balanced => &["balanced"],
      Profile::Performance => &["performance", "balanced-performance"],
    };

    preferences
      .iter()
      .copied()
      .find(|token| self.has_choice(token))
  }

  fn refresh_lap_mode(&mut self) -> bool {
    let lap_mode = matches!(
      self.sysfs.read_n::<u32>(DYTC_LAPMODE),
      Ok(Some(1)),
    );

    let changed = lap_mode != self.lap_mode;
    self.lap_mode = lap_mode;

    if changed {
      log::info!(
        "dytc_lapmode is now {state}",
        state = if lap_mode { "on" } else { "off" },
      );
    }

    changed
  }

  fn probe_inner(&mut self) -> anyhow::Result<Probe> {
    let Some(choices) = self.sysfs.read(CHOICES)? else {
      return Ok(Probe::Defer);
    };

    self.choices = choices
      .split_whitespace()
      .map(str::to_owned)
      .collect();

    if self.choices.is_empty() {
      return Ok(Probe::Defer);
    }

    // Remember the boot value so the monitor does not mistake it for a
    // hotkey press later, but never adopt it as the active profile.
    self.current = self.sysfs.read(PROFILE)?;

    self.has_dytc = self.sysfs.exists(DYTC_LAPMODE);
    if self.has_dytc {
      self.refresh_lap_mode();
    }

    log::info!(
      "platform_profile loaded, choices: {choices}",
      choices = self.choices.join(", "),
    );

    Ok(Probe::Loaded)
  }
}

impl Driver for PlatformProfile {
  fn id(&self) -> &'static str {
    "platform_profile"
  }

  fn kind(&self) -> Kind {
    Kind::Platform
  }

  fn probe(&mut self) -> Probe {
    match self.probe_inner() {
      Ok(probe) => probe,
      Err(error) => Probe::Failed(format!("{error:#}")),
    }
  }

  fn profiles(&self) -> Vec<Profile> {
    Profile::all()
      .into_iter()
      .filter(|profile| self.write_token(*profile).is_some())
      .collect()
  }

  fn apply(&mut self, profile: Profile) -> anyhow::Result<()> {
    let token = self.write_token(profile).with_context(|| {
      format!("firmware offers no platform profile for '{profile}'")
    })?;

    let current = self.sysfs.read(PROFILE)?;

    // The hardware may already express the target profile under a different
    // token (`cool` for balanced); leave it alone then.
    if current.as_deref().and_then(value_to_profile) == Some(profile) {
      self.current = current;
      return Ok(());
    }

    self
      .sysfs
      .write(PROFILE, token)
      .context("failed to set ACPI platform profile")?;

    self.current = Some(token.to_owned());

    Ok(())
  }

  fn degradation(&self) -> Option<String> {
    self.lap_mode.then(|| "lap-detected".to_owned())
  }

  fn monitor_dirs(&self) -> Vec<PathBuf> {
    let mut dirs = vec![self.sysfs.at(ACPI_DIR)];

    if self.has_dytc {
      dirs.push(self.sysfs.at(DYTC_DIR));
    }

    dirs
  }

  fn handle_change(&mut self, path: &Path) -> Notice {
    if path == self.sysfs.at(DYTC_LAPMODE) {
      if self.has_dytc && self.refresh_lap_mode() {
        return Notice::DegradationChanged;
      }

      return Notice::None;
    }

    if path != self.sysfs.at(PROFILE) {
      return Notice::None;
    }

    let value = match self.sysfs.read(PROFILE) {
      Ok(Some(value)) => value,
      Ok(None) => return Notice::None,

      Err(error) => {
        log::warn!("failed to read changed platform profile: {error:#}");
        return Notice::None;
      },
    };

    if Some(value.as_str()) == self.current.as_deref() {
      return Notice::None;
    }

    let Some(profile) = value_to_profile(&value) else {
      log::debug!("ignoring unknown platform profile value '{value}'");
      return Notice::None;
    };

    log::info!("platform profile changed externally to '{value}'");
    self.current = Some(value);

    Notice::ProfileChanged(profile)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fixture(choices: &str, current: &str) -> (tempfile::TempDir, Sysfs) {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());

    std::fs::create_dir_all(sysfs.at(ACPI_DIR)).unwrap();
    std::fs::write(sysfs.at(CHOICES), format!("{choices}\n")).unwrap();
    std::fs::write(sysfs.at(PROFILE), format!("{current}\n")).unwrap();

    (dir, sysfs)
  }

  fn loaded(sysfs: &Sysfs) -> PlatformProfile {
    let mut driver = PlatformProfile::new(sysfs.clone());
    assert_eq!(driver.probe(), Probe::Loaded);

    driver
  }

  #[test]
  fn missing_or_empty_choices_defer() {
    let dir = tempfile::tempdir().unwrap();
    let sysfs = Sysfs::new(dir.path());

    let mut driver = PlatformProfile::new(sysfs.clone());
    assert_eq!(driver.probe(), Probe::Defer);

    std::fs::create_dir_all(sysfs.at(ACPI_DIR)).unwrap();
    std::fs::write(sysfs.at(CHOICES), "\n").unwrap();
    std::fs::write(sysfs.at(PROFILE), "\n").unwrap();
    assert_eq!(driver.probe(), Probe::Defer);
  }

  #[test]
  fn newline_separated_choices_parse() {
    let (_dir, sysfs) = fixture("low-power\nbalanced\nperformance", "balanced");
    let driver = loaded(&sysfs);

    assert_eq!(driver.profiles(), Profile::all().to_vec());
  }

  #[test]
  fn low_power_is_preferred_over_quiet_and_cool() {
    let (_dir, sysfs) =
      fixture("low-power quiet cool balanced performance", "balanced");
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::PowerSaver).unwrap();
    assert_eq!(sysfs.read(PROFILE).unwrap().unwrap(), "low-power");
  }

  #[test]
  fn quiet_stands_in_for_low_power() {
    let (_dir, sysfs) = fixture(
      "quiet balanced balanced-performance performance",
      "balanced",
    );
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::PowerSaver).unwrap();
    assert_eq!(sysfs.read(PROFILE).unwrap().unwrap(), "quiet");
  }

  #[test]
  fn cool_is_the_power_saver_token_of_last_resort() {
    let (_dir, sysfs) = fixture("cool balanced performance", "balanced");
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::PowerSaver).unwrap();
    assert_eq!(sysfs.read(PROFILE).unwrap().unwrap(), "cool");
  }

  #[test]
  fn a_cool_boot_value_is_not_clobbered_by_balanced() {
    let (_dir, sysfs) = fixture("cool balanced performance", "cool");
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::Balanced).unwrap();
    assert_eq!(sysfs.read(PROFILE).unwrap().unwrap(), "cool");

    driver.apply(Profile::Performance).unwrap();
    driver.apply(Profile::Balanced).unwrap();
    assert_eq!(sysfs.read(PROFILE).unwrap().unwrap(), "balanced");
  }

  #[test]
  fn a_quiet_boot_value_is_rewritten_by_balanced() {
    let (_dir, sysfs) = fixture(
      "quiet balanced balanced-performance performance",
      "quiet",
    );
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::Balanced).unwrap();
    assert_eq!(sysfs.read(PROFILE).unwrap().unwrap(), "balanced");
  }

  #[test]
  fn performance_falls_back_to_balanced_performance() {
    let (_dir, sysfs) =
      fixture("quiet balanced balanced-performance", "balanced");
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::Performance).unwrap();
    assert_eq!(
      sysfs.read(PROFILE).unwrap().unwrap(),
      "balanced-performance",
    );
  }

  #[test]
  fn missing_performance_choice_narrows_the_profile_set() {
    let (_dir, sysfs) = fixture("quiet balanced", "balanced");
    let driver = loaded(&sysfs);

    assert_eq!(
      driver.profiles(),
      vec![Profile::PowerSaver, Profile::Balanced],
    );
  }

  #[test]
  fn own_writes_are_not_reported_as_external_changes() {
    let (_dir, sysfs) =
      fixture("low-power balanced performance", "balanced");
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::Performance).unwrap();
    assert_eq!(
      driver.handle_change(&sysfs.at(PROFILE)),
      Notice::None,
    );
  }

  #[test]
  fn external_writes_map_to_a_profile_change() {
    let (_dir, sysfs) =
      fixture("low-power balanced performance", "balanced");
    let mut driver = loaded(&sysfs);

    driver.apply(Profile::Balanced).unwrap();

    std::fs::write(sysfs.at(PROFILE), "performance\n").unwrap();
    assert_eq!(
      driver.handle_change(&sysfs.at(PROFILE)),
      Notice::ProfileChanged(Profile::Performance),
    );

    std::fs::write(sysfs.at(PROFILE), "made-up-token\n").unwrap();
    assert_eq!(
      driver.handle_change(&sysfs.at(PROFILE)),
      Notice::None,
    );
  }

  #[test]
  fn dytc_lapmode_drives_the_lap_detected_degradation() {
    let (_dir, sysfs) =
      fixture("low-power balanced performance", "performance");

    std::fs::create_dir_all(sysfs.at(DYTC_DIR)).unwrap();
    std::fs::write(sysfs.at(DYTC_LAPMODE), "0\n").unwrap();

    let mut driver = loaded(&sysfs);
    assert_eq!(driver.degradation(), None);

    std::fs::write(sysfs.at(DYTC_LAPMODE), "1\n").unwrap();
    assert_eq!(
      driver.handle_change(&sysfs.at(DYTC_LAPMODE)),
      Notice::DegradationChanged,
    );
    assert_eq!(driver.degradation(), Some("lap-detected".to_owned()));

    std::fs::write(sysfs.at(DYTC_LAPMODE), "0\n").unwrap();
    assert_eq!(
      driver.handle_change(&sysfs.at(DYTC_LAPMODE)),
      Notice::DegradationChanged,
    );
    assert_eq!(driver.degradation(), None);
  }
}

use std::path::{
  Path,
  PathBuf,
};

use crate::{
  actions::Action,
  drivers::{
    Driver,
    Kind,
    Notice,
    Probe,
    placeholder,
  },
  error::Error,
  fs::FileEvent,
  persistence::StateFile,
  profile::{
    HoldRegistry,
    Profile,
  },
};

/// Observable fallout of one engine transaction. The bus facade turns this
/// into coalesced signal emission: `ProfileReleased` per cookie first, then
/// `ActiveProfile`, `PerformanceDegraded` and `ActiveProfileHolds`
/// property-change notifications, in that order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Changes {
  /// Cookies of holds removed during the transaction, in removal order.
  pub released: Vec<u32>,

  pub active_profile: bool,
  pub degraded:       bool,
  pub holds:          bool,
  pub profiles:       bool,
}

impl Changes {
  pub fn is_empty(&self) -> bool {
    self.released.is_empty()
      && !self.active_profile
      && !self.degraded
      && !self.holds
      && !self.profiles
  }

  fn merge(&mut self, other: Changes) {
    self.released.extend(other.released);
    self.active_profile |= other.active_profile;
    self.degraded |= other.degraded;
    self.holds |= other.holds;
    self.profiles |= other.profiles;
  }
}

/// One row of the `Profiles` bus property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
  pub profile:         Profile,
  pub driver:          String,
  pub cpu_driver:      Option<String>,
  pub platform_driver: String,
}

/// The profile-arbitration engine.
///
/// Owns the driver and action registries and every piece of mutable policy
/// state. All mutation goes through the transaction methods below, which the
/// daemon serializes behind a single lock; each returns the [`Changes`] the
/// bus facade must announce.
pub struct Engine {
  state_file: StateFile,

  user_profile: Profile,
  effective:    Profile,
  holds:        HoldRegistry,

  /// Active cpu back end. `None` leaves the cpu side undriven; the exposed
  /// profile list then comes from the platform driver alone.
  cpu:      Option<Box<dyn Driver>>,
  /// Active platform back end, the placeholder when no real one loaded.
  platform: Box<dyn Driver>,
  /// Probed drivers waiting for their kernel prerequisites to appear.
  dormant:  Vec<Box<dyn Driver>>,

  actions: Vec<Box<dyn Action>>,

  /// Persisted profile not yet adopted because no real driver was around to
  /// realize it.
  saved: Option<Profile>,

  on_battery: bool,
}

impl Engine {
  pub fn new(
    state_file: StateFile,
    candidates: Vec<Box<dyn Driver>>,
    actions: Vec<Box<dyn Action>>,
  ) -> Self {
    let mut cpu: Option<Box<dyn Driver>> = None;
    let mut platform: Option<Box<dyn Driver>> = None;
    let mut dormant = Vec::new();

    for mut driver in candidates {
      let slot_taken = match driver.kind() {
        Kind::Cpu => cpu.is_some(),
        Kind::Platform => platform.is_some(),
      };

      if slot_taken {
        continue;
      }

      match driver.probe() {
        Probe::Loaded => {
          log::info!("driver '{id}' loaded", id = driver.id());

          match driver.kind() {
            Kind::Cpu => cpu = Some(driver),
            Kind::Platform => platform = Some(driver),
          }
        },

        Probe::Defer => {
          log::debug!(
            "driver '{id}' is waiting for kernel prerequisites",
            id = driver.id(),
          );
          dormant.push(driver);
        },

        Probe::Failed(reason) => {
          log::info!(
            "driver '{id}' is not usable: {reason}",
            id = driver.id(),
          );
        },
      }
    }

    let saved = state_file.load();

    let mut engine = Self {
      state_file,
      user_profile: Profile::Balanced,
      effective: Profile::Balanced,
      holds: HoldRegistry::new(),
      cpu,
      platform: platform
        .unwrap_or_else(|| Box::new(placeholder::Placeholder)),
      dormant,
      actions,
      saved,
      on_battery: false,
    };

    engine.try_restore_saved();
    engine.startup();

    engine
  }

  fn active(&self) -> Vec<&dyn Driver> {
    let mut drivers: Vec<&dyn Driver> = Vec::with_capacity(2);

    if let Some(cpu) = &self.cpu {
      drivers.push(cpu.as_ref());
    }

    drivers.push(self.platform.as_ref());

    drivers
  }

  fn active_mut(&mut self) -> Vec<&mut Box<dyn Driver>> {
    let mut drivers: Vec<&mut Box<dyn Driver>> = Vec::with_capacity(2);

    if let Some(cpu) = &mut self.cpu {
      drivers.push(cpu);
    }

    drivers.push(&mut self.platform);

    drivers
  }

  fn has_real_driver(&self) -> bool {
    self.cpu.is_some() || self.platform.id() != placeholder::ID
  }

  fn supported(&self, profile: Profile) -> bool {
    self
      .active()
      .iter()
      .any(|driver| driver.profiles().contains(&profile))
  }

  fn ensure_supported(&self, profile: Profile) -> Result<(), Error> {
    if !self.supported(profile) {
      return Err(Error::NotSupported(format!(
        "no active driver supports '{profile}'"
      )));
    }

    if profile == Profile::Performance {
      let inhibited = self.inhibition();

      if !inhibited.is_empty() {
        return Err(Error::NotSupported(format!(
          "performance is inhibited: {inhibited}"
        )));
      }
    }

    Ok(())
  }

  /// Adopt the persisted profile once a real driver can realize it.
  fn try_restore_saved(&mut self) {
    let Some(saved) = self.saved else {
      return;
    };

    if !self.has_real_driver() || !self.supported(saved) {
      return;
    }

    log::info!("restoring saved profile '{saved}'");
    self.user_profile = saved;
    self.saved = None;
  }

  /// Initial activation. Unlike a transaction this tolerates driver errors:
  /// a machine with a stuck knob still gets a daemon.
  fn startup(&mut self) {
    let target = self.holds.effective(self.user_profile);

    log::info!("activating '{target}'");

    for driver in self.active_mut() {
      if let Err(error) = driver.apply(target) {
        log::warn!(
          "failed to activate '{target}' on '{id}': {error:#}",
          id = driver.id(),
        );
      }
    }

    self.effective = target;
    self.run_actions();
  }

  /// Apply `target` to every active driver in registration order. On failure
  /// the drivers that already switched are rolled back, in reverse, to the
  /// pre-transaction profile.
  fn apply_to_drivers(&mut self, target: Profile) -> Result<(), Error> {
    let previous = self.effective;
    let mut drivers = self.active_mut();

    for index in 0..drivers.len() {
      let Err(error) = drivers[index].apply(target) else {
        continue;
      };

      log::warn!(
        "failed to apply '{target}' to '{id}', rolling back: {error:#}",
        id = drivers[index].id(),
      );

      for done in drivers[..index].iter_mut().rev() {
        if let Err(rollback_error) = done.apply(previous) {
          log::error!(
            "rollback of '{id}' to '{previous}' failed: {rollback_error:#}",
            id = done.id(),
          );
        }
      }

      return Err(Error::Io(error));
    }

    Ok(())
  }

  fn run_actions(&mut self) {
    let profile = self.effective;
    let on_battery = self.on_battery;

    for action in &mut self.actions {
      if let Err(error) = action.activate(profile, on_battery) {
        log::warn!(
          "action '{id}' failed: {error:#}",
          id = action.id(),
        );
      }
    }
  }

  /// Re-derive the effective profile and realize it if it moved.
  fn settle(&mut self, changes: &mut Changes) -> Result<(), Error> {
    let target = self.holds.effective(self.user_profile);

    if target == self.effective {
      return Ok(());
    }

    self.apply_to_drivers(target)?;
    self.effective = target;
    changes.active_profile = true;
    self.run_actions();

    Ok(())
  }

  /// A user picked a profile, via the bus property or a firmware hotkey.
  /// Releases every hold; the chosen profile is persisted.
  pub fn set_user_profile(
    &mut self,
    profile: Profile,
  ) -> Result<Changes, Error> {
    self.ensure_supported(profile)?;

    let mut changes = Changes::default();

    if profile != self.effective {
      self.apply_to_drivers(profile)?;
      self.effective = profile;
      changes.active_profile = true;
    }

    let released = self.holds.drain_all();

    if !released.is_empty() {
      changes.holds = true;
      changes.released = released.iter().map(|hold| hold.cookie).collect();

      for hold in &released {
        log::info!(
          "hold {cookie} overridden by manual selection",
          cookie = hold.cookie,
        );
      }
    }

    if self.user_profile != profile {
      self.user_profile = profile;
      self.state_file.save(profile);
    }

    // An explicit choice supersedes any pending restore.
    self.saved = None;

    if changes.active_profile {
      self.run_actions();
    }

    Ok(changes)
  }

  pub fn add_hold(
    &mut self,
    profile: Profile,
    reason: &str,
    application_id: &str,
    client: &str,
  ) -> Result<(u32, Changes), Error> {
    if profile == Profile::Balanced {
      return Err(Error::InvalidArgs(
        "cannot hold the balanced profile".to_owned(),
      ));
    }

    self.ensure_supported(profile)?;

    let mut changes = Changes {
      holds: true,
      ..Changes::default()
    };

    let target = match self.holds.winner() {
      Some(winner) if !profile.outranks(winner) => winner,
      _ => profile,
    };

    if target != self.effective {
      self.apply_to_drivers(target)?;
      self.effective = target;
      changes.active_profile = true;
      self.run_actions();
    }

    let cookie = self.holds.insert(
      profile,
      reason.to_owned(),
      application_id.to_owned(),
      client.to_owned(),
    );

    log::info!(
      "hold {cookie} added: '{profile}' for '{application_id}' ({client})",
    );

    Ok((cookie, changes))
  }

  /// Release a hold. Unknown cookies are a silent no-op; cookies owned by a
  /// different client are rejected.
  pub fn release_hold(
    &mut self,
    cookie: u32,
    client: &str,
  ) -> Result<Changes, Error> {
    match self.holds.get(cookie) {
      None => {
        log::debug!("release of unknown cookie {cookie} ignored");
        return Ok(Changes::default());
      },

      Some(hold) if hold.client != client => {
        return Err(Error::InvalidArgs(format!(
          "cookie {cookie} belongs to another client"
        )));
      },

      Some(_) => {},
    }

    self.holds.remove(cookie);
    log::info!("hold {cookie} released");

    let mut changes = Changes {
      holds: true,
      released: vec![cookie],
      ..Changes::default()
    };

    self.settle(&mut changes)?;

    Ok(changes)
  }

  /// A bus client disappeared: drop every hold it had, re-deriving once at
  /// the end of the batch.
  pub fn client_vanished(&mut self, client: &str) -> Changes {
    let removed = self.holds.remove_client(client);

    if removed.is_empty() {
      return Changes::default();
    }

    log::info!(
      "client {client} vanished, releasing {count} holds",
      count = removed.len(),
    );

    let mut changes = Changes {
      holds: true,
      released: removed.iter().map(|hold| hold.cookie).collect(),
      ..Changes::default()
    };

    if let Err(error) = self.settle(&mut changes) {
      log::warn!("failed to re-apply profile after client loss: {error}");
    }

    changes
  }

  pub fn set_on_battery(&mut self, on_battery: bool) {
    if self.on_battery != on_battery {
      log::debug!("on battery: {on_battery}");
      self.on_battery = on_battery;
      self.run_actions();
    }
  }

  /// A watched file changed. Routes the event to the active drivers, wakes
  /// dormant ones whose prerequisites may have appeared, and lets actions
  /// configure hotplugged devices.
  pub fn handle_file_event(
    &mut self,
    path: &Path,
    kind: FileEvent,
  ) -> Changes {
    let mut changes = Changes::default();
    let degraded_before = self.degradation();

    let mut notices = Vec::new();

    for driver in self.active_mut() {
      let notice = driver.handle_change(path);

      if notice != Notice::None {
        notices.push(notice);
      }
    }

    for notice in notices {
      match notice {
        Notice::ProfileChanged(profile) => {
          match self.set_user_profile(profile) {
            Ok(inner) => changes.merge(inner),

            Err(error) => {
              log::warn!(
                "cannot follow external change to '{profile}': {error}",
              );
            },
          }
        },

        // Degradation is re-aggregated below.
        Notice::DegradationChanged | Notice::None => {},
      }
    }

    self.reprobe_dormant(&mut changes);

    if kind == FileEvent::Created {
      let profile = self.effective;
      let on_battery = self.on_battery;

      for action in &mut self.actions {
        if let Err(error) = action.handle_created(path, profile, on_battery)
        {
          log::warn!(
            "action '{id}' failed on device appearance: {error:#}",
            id = action.id(),
          );
        }
      }
    }

    if self.degradation() != degraded_before {
      changes.degraded = true;
    }

    changes
  }

  fn reprobe_dormant(&mut self, changes: &mut Changes) {
    let mut index = 0;

    while index < self.dormant.len() {
      let slot_free = match self.dormant[index].kind() {
        Kind::Cpu => self.cpu.is_none(),
        Kind::Platform => self.platform.id() == placeholder::ID,
      };

      if !slot_free {
        index += 1;
        continue;
      }

      match self.dormant[index].probe() {
        Probe::Defer => index += 1,

        Probe::Failed(reason) => {
          let driver = self.dormant.remove(index);
          log::info!(
            "driver '{id}' is not usable: {reason}",
            id = driver.id(),
          );
        },

        Probe::Loaded => {
          let driver = self.dormant.remove(index);
          log::info!("driver '{id}' became available", id = driver.id());
          self.install(driver, changes);
        },
      }
    }
  }

  /// Put a late-loaded driver into its slot and bring it in line with the
  /// (possibly restored) effective profile.
  fn install(&mut self, driver: Box<dyn Driver>, changes: &mut Changes) {
    match driver.kind() {
      Kind::Cpu => self.cpu = Some(driver),
      Kind::Platform => self.platform = driver,
    }

    changes.profiles = true;

    self.try_restore_saved();

    let target = self.holds.effective(self.user_profile);

    match self.apply_to_drivers(target) {
      Ok(()) => {
        if target != self.effective {
          changes.active_profile = true;
        }

        self.effective = target;
        self.run_actions();
      },

      Err(error) => {
        log::warn!(
          "failed to apply '{target}' to the new driver set: {error}",
        );
      },
    }
  }

  pub fn active_profile(&self) -> Profile {
    self.effective
  }

  pub fn user_profile(&self) -> Profile {
    self.user_profile
  }

  pub fn holds(&self) -> &HoldRegistry {
    &self.holds
  }

  /// Comma-joined degradation tokens in driver-registration order, empty
  /// when nothing is degraded.
  pub fn degradation(&self) -> String {
    let tokens: Vec<String> = self
      .active()
      .iter()
      .filter_map(|driver| driver.degradation())
      .collect();

    tokens.join(",")
  }

  /// Comma-joined inhibition reasons, kept for the deprecated
  /// `PerformanceInhibited` property.
  pub fn inhibition(&self) -> String {
    let reasons: Vec<String> = self
      .active()
      .iter()
      .filter_map(|driver| driver.inhibited())
      .collect();

    reasons.join(",")
  }

  pub fn supported_profiles(&self) -> Vec<Profile> {
    Profile::all()
      .into_iter()
      .filter(|profile| self.supported(*profile))
      .collect()
  }

  /// Rows of the `Profiles` bus property. The platform driver is always
  /// named; a cpu driver only when a real one is active, in which case the
  /// legacy `Driver` field reads `multiple`.
  pub fn profile_entries(&self) -> Vec<ProfileEntry> {
    let platform_driver = self.platform.id().to_owned();
    let cpu_driver = self.cpu.as_ref().map(|driver| driver.id().to_owned());

    let driver = if cpu_driver.is_some() {
      "multiple".to_owned()
    } else {
      platform_driver.clone()
    };

    self
      .supported_profiles()
      .into_iter()
      .map(|profile| ProfileEntry {
        profile,
        driver: driver.clone(),
        cpu_driver: cpu_driver.clone(),
        platform_driver: platform_driver.clone(),
      })
      .collect()
  }

  pub fn action_ids(&self) -> Vec<String> {
    self
      .actions
      .iter()
      .map(|action| action.id().to_owned())
      .collect()
  }

  /// Every directory the daemon should watch for this engine: driver
  /// monitors, dormant prerequisites and action hotplug directories.
  pub fn watch_dirs(&self) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    for driver in self.active() {
      dirs.extend(driver.monitor_dirs());
    }

    for driver in &self.dormant {
      dirs.extend(driver.monitor_dirs());
    }

    for action in &self.actions {
      dirs.extend(action.monitor_dirs());
    }

    dirs.sort();
    dirs.dedup();

    dirs
  }
}

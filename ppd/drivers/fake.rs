use crate::profile::Profile;

use super::{
  Driver,
  Kind,
  Probe,
};

/// Performance-capable no-op driver, injected via
/// `POWER_PROFILE_DAEMON_FAKE_DRIVER=1` so CI can exercise the full profile
/// list on machines without suitable hardware.
pub struct Fake;

impl Driver for Fake {
  fn id(&self) -> &'static str {
    "fake"
  }

  fn kind(&self) -> Kind {
    Kind::Cpu
  }

  fn probe(&mut self) -> Probe {
    Probe::Loaded
  }

  fn profiles(&self) -> Vec<Profile> {
    Profile::all().to_vec()
  }

  fn apply(&mut self, profile: Profile) -> anyhow::Result<()> {
    log::debug!("fake driver pretending to apply '{profile}'");

    Ok(())
  }
}

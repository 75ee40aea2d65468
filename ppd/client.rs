use std::collections::HashMap;

use zbus::{
  proxy,
  zvariant::OwnedValue,
};

/// Client-side view of the daemon, used by `powerprofilesctl`. Talks to the
/// legacy name, which every daemon generation serves.
#[proxy(
  interface = "net.hadess.PowerProfiles",
  default_service = "net.hadess.PowerProfiles",
  default_path = "/net/hadess/PowerProfiles",
  gen_blocking = false
)]
pub trait PowerProfiles {
  fn hold_profile(
    &self,
    profile: &str,
    reason: &str,
    application_id: &str,
  ) -> zbus::Result<u32>;

  fn release_profile(&self, cookie: u32) -> zbus::Result<()>;

  #[zbus(signal)]
  fn profile_released(&self, cookie: u32) -> zbus::Result<()>;

  #[zbus(property)]
  fn active_profile(&self) -> zbus::Result<String>;

  #[zbus(property)]
  fn set_active_profile(&self, profile: &str) -> zbus::Result<()>;

  #[zbus(property)]
  fn profiles(&self) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;

  #[zbus(property)]
  fn performance_degraded(&self) -> zbus::Result<String>;

  #[zbus(property)]
  fn active_profile_holds(
    &self,
  ) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;

  #[zbus(property)]
  fn actions(&self) -> zbus::Result<Vec<String>>;

  #[zbus(property)]
  fn version(&self) -> zbus::Result<String>;
}

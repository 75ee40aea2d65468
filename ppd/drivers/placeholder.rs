use crate::profile::Profile;

use super::{
  Driver,
  Kind,
  Probe,
};

pub const ID: &str = "placeholder";

/// Stands in when no platform back end is usable so that the exposed profile
/// list is never empty. Supports everything but performance and touches no
/// hardware.
pub struct Placeholder;

impl Driver for Placeholder {
  fn id(&self) -> &'static str {
    ID
  }

  fn kind(&self) -> Kind {
    Kind::Platform
  }

  fn probe(&mut self) -> Probe {
    Probe::Loaded
  }

  fn profiles(&self) -> Vec<Profile> {
    vec![Profile::PowerSaver, Profile::Balanced]
  }

  fn apply(&mut self, _profile: Profile) -> anyhow::Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn supports_everything_but_performance() {
    let placeholder = Placeholder;

    assert!(placeholder.profiles().contains(&Profile::PowerSaver));
    assert!(placeholder.profiles().contains(&Profile::Balanced));
    assert!(!placeholder.profiles().contains(&Profile::Performance));
  }
}

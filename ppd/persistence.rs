use std::{
  fs,
  io,
  path::PathBuf,
};

use serde::{
  Deserialize,
  Serialize,
};

use crate::profile::Profile;

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
struct Contents {
  #[serde(rename = "State", default)]
  state: State,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
struct State {
  #[serde(rename = "active-profile", skip_serializing_if = "Option::is_none")]
  active_profile: Option<Profile>,
}

/// The last user-chosen profile, kept across daemon restarts.
///
/// Only user-driven changes are ever written here; hold-induced profile
/// switches are not. All failures are logged and swallowed, a broken state
/// file must never take the daemon down or fail a bus request.
#[derive(Debug, Clone)]
pub struct StateFile {
  path: PathBuf,
}

impl StateFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &PathBuf {
    &self.path
  }

  pub fn load(&self) -> Option<Profile> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,

      Err(error) if error.kind() == io::ErrorKind::NotFound => return None,

      Err(error) => {
        log::warn!(
          "failed to read state file '{path}': {error}",
          path = self.path.display(),
        );
        return None;
      },
    };

    match toml::from_str::<Contents>(&content) {
      Ok(contents) => contents.state.active_profile,

      Err(error) => {
        log::warn!(
          "ignoring malformed state file '{path}': {error}",
          path = self.path.display(),
        );
        None
      },
    }
  }

  pub fn save(&self, profile: Profile) {
    let contents = Contents {
      state: State {
        active_profile: Some(profile),
      },
    };

    let rendered = match toml::to_string(&contents) {
      Ok(rendered) => rendered,

      Err(error) => {
        log::warn!("failed to render state file: {error}");
        return;
      },
    };

    if let Some(parent) = self.path.parent() {
      if let Err(error) = fs::create_dir_all(parent) {
        log::warn!(
          "failed to create state directory '{parent}': {error}",
          parent = parent.display(),
        );
        return;
      }
    }

    if let Err(error) = fs::write(&self.path, rendered) {
      log::warn!(
        "failed to write state file '{path}': {error}",
        path = self.path.display(),
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let file = StateFile::new(dir.path().join("state.ini"));

    assert_eq!(file.load(), None);

    file.save(Profile::PowerSaver);
    assert_eq!(file.load(), Some(Profile::PowerSaver));

    file.save(Profile::Balanced);
    assert_eq!(file.load(), Some(Profile::Balanced));
  }

  #[test]
  fn file_carries_a_single_state_section() {
    let dir = tempfile::tempdir().unwrap();
    let file = StateFile::new(dir.path().join("state.ini"));

    file.save(Profile::Performance);

    let content = std::fs::read_to_string(file.path()).unwrap();
    assert!(content.contains("[State]"));
    assert!(content.contains("active-profile"));
    assert!(content.contains("performance"));
  }

  #[test]
  fn missing_parent_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let file =
      StateFile::new(dir.path().join("var/lib/power-profiles/state.ini"));

    file.save(Profile::PowerSaver);
    assert_eq!(file.load(), Some(Profile::PowerSaver));
  }

  #[test]
  fn garbage_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.ini");

    std::fs::write(&path, "not an ini file [[[").unwrap();
    assert_eq!(StateFile::new(&path).load(), None);

    std::fs::write(&path, "[State]\nactive-profile = \"turbo\"\n").unwrap();
    assert_eq!(StateFile::new(&path).load(), None);
  }
}

use std::{
  fs::{
    File,
    OpenOptions,
  },
  os::unix::fs::OpenOptionsExt,
  path::Path,
};

use anyhow::{
  Context,
  bail,
};
use nix::fcntl::{
  Flock,
  FlockArg,
};

/// Exclusive run lock. Exactly one daemon may drive the kernel knobs at a
/// time; a second instance fails fast instead of fighting over sysfs.
pub struct LockFile {
  _lock: Flock<File>,
}

impl LockFile {
  pub fn acquire(path: &Path) -> anyhow::Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).with_context(|| {
        format!(
          "failed to create lock directory '{parent}'",
          parent = parent.display(),
        )
      })?;
    }

    #[allow(clippy::suspicious_open_options)]
    let file = OpenOptions::new()
      .create(true)
      .read(true)
      .write(true)
      .mode(0o600)
      .open(path)
      .with_context(|| {
        format!("failed to open lock file '{path}'", path = path.display())
      })?;

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
      Ok(lock) => Ok(Self { _lock: lock }),

      Err((_, nix::errno::Errno::EWOULDBLOCK)) => {
        bail!(
          "another instance is already running (lock held on '{path}')",
          path = path.display(),
        )
      },

      Err((_, errno)) => {
        Err(errno).context(format!(
          "failed to lock '{path}'",
          path = path.display(),
        ))
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_acquisition_fails_while_held() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daemon.lock");

    let held = LockFile::acquire(&path).unwrap();
    assert!(LockFile::acquire(&path).is_err());

    drop(held);
    assert!(LockFile::acquire(&path).is_ok());
  }
}

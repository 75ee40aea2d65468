use std::{
  collections::HashSet,
  error,
  fs,
  io,
  path::{
    Path,
    PathBuf,
  },
  str,
};

use anyhow::Context;
use notify::Watcher as _;
use tokio::sync::mpsc;

/// Typed access to sysfs and procfs below a configurable root prefix.
///
/// Paths are given relative to the root (`sys/firmware/acpi/...`); absolute
/// paths, as produced by [`Sysfs::read_dir`], pass through unchanged.
#[derive(Debug, Clone)]
pub struct Sysfs {
  root: PathBuf,
}

impl Sysfs {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn at(&self, path: impl AsRef<Path>) -> PathBuf {
    self.root.join(path)
  }

  pub fn exists(&self, path: impl AsRef<Path>) -> bool {
    self.at(path).exists()
  }

  /// Read a file, trimming surrounding whitespace and the trailing newline.
  /// `None` if the file does not exist.
  pub fn read(&self, path: impl AsRef<Path>) -> anyhow::Result<Option<String>> {
    let path = self.at(path);

    match fs::read_to_string(&path) {
      Ok(content) => Ok(Some(content.trim().to_owned())),

      Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),

      Err(error) => {
        Err(error)
          .context(format!("failed to read '{path}'", path = path.display()))
      },
    }
  }

  pub fn read_n<N: str::FromStr>(
    &self,
    path: impl AsRef<Path>,
  ) -> anyhow::Result<Option<N>>
  where
    N::Err: error::Error + Send + Sync + 'static,
  {
    let path = self.at(path);

    match self.read(&path)? {
      Some(content) => {
        Ok(Some(content.parse().with_context(|| {
          format!(
            "failed to parse contents of '{path}' as a number",
            path = path.display(),
          )
        })?))
      },

      None => Ok(None),
    }
  }

  /// Truncate-and-write. No newline is appended.
  pub fn write(
    &self,
    path: impl AsRef<Path>,
    value: &str,
  ) -> anyhow::Result<()> {
    let path = self.at(path);

    fs::write(&path, value).with_context(|| {
      format!(
        "failed to write '{value}' to '{path}'",
        path = path.display(),
      )
    })
  }

  pub fn read_dir(
    &self,
    path: impl AsRef<Path>,
  ) -> anyhow::Result<Option<fs::ReadDir>> {
    let path = self.at(path);

    match fs::read_dir(&path) {
      Ok(entries) => Ok(Some(entries)),

      Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),

      Err(error) => {
        Err(error).context(format!(
          "failed to read directory '{path}'",
          path = path.display(),
        ))
      },
    }
  }
}

/// Kind of change reported for a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
  Created,
  Modified,
  Removed,
}

/// Inotify-backed watcher forwarding kernel file events onto the daemon's
/// event loop. Delivery through the channel means a change observed while a
/// transaction holds the engine lock is handled on a later loop turn, never
/// re-entrantly.
pub struct Monitor {
  watcher: notify::RecommendedWatcher,
  wanted:  HashSet<PathBuf>,
  active:  HashSet<PathBuf>,
}

impl Monitor {
  pub fn new()
  -> anyhow::Result<(Self, mpsc::UnboundedReceiver<(PathBuf, FileEvent)>)> {
    let (tx, rx) = mpsc::unbounded_channel();

    let watcher =
      notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let Ok(event) = event else {
          return;
        };

        let kind = match event.kind {
          notify::EventKind::Create(_) => FileEvent::Created,
          notify::EventKind::Modify(_) => FileEvent::Modified,
          notify::EventKind::Remove(_) => FileEvent::Removed,
          _ => return,
        };

        for path in event.paths {
          let _ = tx.send((path, kind));
        }
      })
      .context("failed to create file watcher")?;

    let monitor = Self {
      watcher,
      wanted: HashSet::new(),
      active: HashSet::new(),
    };

    Ok((monitor, rx))
  }

  /// Ask for change events under `dir`. Directories that do not exist yet are
  /// covered through their nearest existing ancestor until they appear;
  /// [`Monitor::sync`] upgrades them afterwards.
  pub fn watch(&mut self, dir: impl Into<PathBuf>) {
    self.wanted.insert(dir.into());
    self.sync();
  }

  pub fn sync(&mut self) {
    for dir in self.wanted.clone() {
      let mut target = dir.as_path();

      while !target.is_dir() {
        let Some(parent) = target.parent() else {
          break;
        };

        target = parent;
      }

      if !self.active.insert(target.to_owned()) {
        continue;
      }

      if let Err(error) =
        self.watcher.watch(target, notify::RecursiveMode::NonRecursive)
      {
        log::debug!(
          "cannot watch '{dir}': {error}",
          dir = target.display(),
        );
      }
    }
  }
}

use std::{
  collections::{
    HashMap,
    HashSet,
  },
  path::{
    Path,
    PathBuf,
  },
  sync::{
    Arc,
    Mutex,
    OnceLock,
  },
};

use anyhow::Context;
use futures::StreamExt as _;
use tokio::sync::RwLock;
use zbus::message::Header;

use crate::{
  Cli,
  actions,
  auth::Authorizer,
  dbus,
  drivers,
  engine::{
    Changes,
    Engine,
    ProfileEntry,
  },
  error::Error,
  fs::{
    FileEvent,
    Monitor,
    Sysfs,
  },
  lock::LockFile,
  persistence::StateFile,
  profile::Profile,
  upower::UPowerProxy,
};

const DEFAULT_STATE_FILE: &str = "var/lib/power-profiles-daemon/state.ini";

const FAKE_DRIVER_VAR: &str = "POWER_PROFILE_DAEMON_FAKE_DRIVER";
const DRIVER_BLOCK_VAR: &str = "POWER_PROFILE_DAEMON_DRIVER_BLOCK";
const ACTION_BLOCK_VAR: &str = "POWER_PROFILE_DAEMON_ACTION_BLOCK";

/// Shared daemon state: the engine behind its transaction lock, plus the bus
/// plumbing the interfaces and background tasks need.
pub struct Daemon {
  engine: RwLock<Engine>,

  /// Set once the bus connection is up; emission is skipped before that.
  connection: OnceLock<zbus::Connection>,

  /// Set once polkit answered; until then every mutating call is denied.
  authorizer: OnceLock<Authorizer>,

  /// One name-owner watch per client with at least one hold.
  watches: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
}

impl Daemon {
  fn new(engine: Engine) -> Self {
    Self {
      engine: RwLock::new(engine),
      connection: OnceLock::new(),
      authorizer: OnceLock::new(),
      watches: Mutex::new(HashMap::new()),
    }
  }

  pub async fn authorize(
    &self,
    header: &Header<'_>,
    action: &str,
  ) -> Result<(), Error> {
    match self.authorizer.get() {
      Some(authorizer) => authorizer.check(header, action).await,

      None => {
        Err(Error::AccessDenied(
          "authorization is not available".to_owned(),
        ))
      },
    }
  }

  /// Announce the fallout of a transaction on both bus names. Emission
  /// failures are logged, never surfaced; the state change already happened.
  pub async fn emit(&self, changes: &Changes) {
    if changes.is_empty() {
      return;
    }

    let Some(connection) = self.connection.get() else {
      return;
    };

    dbus::emit_changes(connection, changes).await;
  }

  pub async fn set_active_profile(
    &self,
    profile: Profile,
  ) -> Result<Changes, Error> {
    self.engine.write().await.set_user_profile(profile)
  }

  pub async fn hold_profile(
    &self,
    profile: Profile,
    reason: &str,
    application_id: &str,
    client: &str,
  ) -> Result<(u32, Changes), Error> {
    self
      .engine
      .write()
      .await
      .add_hold(profile, reason, application_id, client)
  }

  pub async fn release_profile(
    &self,
    cookie: u32,
    client: &str,
  ) -> Result<Changes, Error> {
    self.engine.write().await.release_hold(cookie, client)
  }

  pub async fn client_vanished(&self, client: &str) -> Changes {
    self.engine.write().await.client_vanished(client)
  }

  pub async fn handle_file_event(
    &self,
    path: &Path,
    kind: FileEvent,
  ) -> Changes {
    self.engine.write().await.handle_file_event(path, kind)
  }

  pub async fn set_on_battery(&self, on_battery: bool) {
    self.engine.write().await.set_on_battery(on_battery);
  }

  pub async fn active_profile(&self) -> Profile {
    self.engine.read().await.active_profile()
  }

  pub async fn profile_entries(&self) -> Vec<ProfileEntry> {
    self.engine.read().await.profile_entries()
  }

  pub async fn degradation(&self) -> String {
    self.engine.read().await.degradation()
  }

  pub async fn inhibition(&self) -> String {
    self.engine.read().await.inhibition()
  }

  /// `(profile, reason, application id)` per hold, in insertion order.
  pub async fn holds_info(&self) -> Vec<(Profile, String, String)> {
    self
      .engine
      .read()
      .await
      .holds()
      .iter()
      .map(|hold| {
        (hold.profile, hold.reason.clone(), hold.application_id.clone())
      })
      .collect()
  }

  pub async fn action_ids(&self) -> Vec<String> {
    self.engine.read().await.action_ids()
  }

  pub async fn watch_dirs(&self) -> Vec<PathBuf> {
    self.engine.read().await.watch_dirs()
  }

  /// Drop name-owner watches for clients that no longer hold anything.
  pub async fn prune_client_watches(&self) {
    let active: HashSet<String> = self
      .engine
      .read()
      .await
      .holds()
      .iter()
      .map(|hold| hold.client.clone())
      .collect();

    let mut watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());

    watches.retain(|client, handle| {
      if active.contains(client) {
        true
      } else {
        handle.abort();
        false
      }
    });
  }
}

/// Start watching for the disappearance of a client that just took its
/// first hold. Idempotent per client name.
pub async fn track_client(daemon: &Arc<Daemon>, client: &str) {
  let Some(connection) = daemon.connection.get().cloned() else {
    return;
  };

  let mut watches =
    daemon.watches.lock().unwrap_or_else(|e| e.into_inner());

  if watches.contains_key(client) {
    return;
  }

  let task_daemon = Arc::clone(daemon);
  let task_client = client.to_owned();

  let handle = tokio::spawn(async move {
    watch_client(connection, task_daemon, task_client).await;
  });

  watches.insert(client.to_owned(), handle);
}

async fn watch_client(
  connection: zbus::Connection,
  daemon: Arc<Daemon>,
  client: String,
) {
  let watch = async {
    let bus = zbus::fdo::DBusProxy::new(&connection).await?;

    let mut stream = bus
      .receive_name_owner_changed_with_args(&[(0, client.as_str())])
      .await?;

    while let Some(signal) = stream.next().await {
      if signal.args()?.new_owner().is_none() {
        let changes = daemon.client_vanished(&client).await;
        daemon.emit(&changes).await;
        break;
      }
    }

    Ok::<(), zbus::Error>(())
  };

  if let Err(error) = watch.await {
    log::warn!("name watch for {client} failed: {error}");
  }

  daemon
    .watches
    .lock()
    .unwrap_or_else(|e| e.into_inner())
    .remove(&client);
}

/// Forward UPower's battery state into the engine. A machine without UPower
/// simply counts as on AC.
async fn battery_task(connection: zbus::Connection, daemon: Arc<Daemon>) {
  let proxy = match UPowerProxy::new(&connection).await {
    Ok(proxy) => proxy,

    Err(error) => {
      log::debug!("UPower proxy unavailable: {error}");
      return;
    },
  };

  match proxy.on_battery().await {
    Ok(on_battery) => daemon.set_on_battery(on_battery).await,

    Err(error) => {
      log::debug!("UPower is not answering, assuming AC: {error}");
      return;
    },
  }

  let mut stream = proxy.receive_on_battery_changed().await;

  while let Some(change) = stream.next().await {
    if let Ok(on_battery) = change.get().await {
      daemon.set_on_battery(on_battery).await;
    }
  }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
  let sysfs = Sysfs::new(&cli.root);

  let state_path = cli
    .state_file
    .clone()
    .unwrap_or_else(|| sysfs.at(DEFAULT_STATE_FILE));

  let _lock = LockFile::acquire(&state_path.with_extension("lock"))?;

  let driver_block = drivers::parse_blocklist(
    std::env::var(DRIVER_BLOCK_VAR).ok().as_deref(),
  );
  let action_block = drivers::parse_blocklist(
    std::env::var(ACTION_BLOCK_VAR).ok().as_deref(),
  );
  let with_fake =
    std::env::var(FAKE_DRIVER_VAR).is_ok_and(|value| value == "1");

  let engine = Engine::new(
    StateFile::new(state_path),
    drivers::candidates(&sysfs, &driver_block, with_fake),
    actions::candidates(&sysfs, &action_block),
  );

  let (mut monitor, mut events) = Monitor::new()?;

  for dir in engine.watch_dirs() {
    monitor.watch(dir);
  }

  let daemon = Arc::new(Daemon::new(engine));

  let connection = dbus::serve(Arc::clone(&daemon))
    .await
    .context("failed to claim the bus names")?;

  match Authorizer::new(&connection).await {
    Ok(authorizer) => {
      let _ = daemon.authorizer.set(authorizer);
    },

    Err(error) => {
      log::warn!(
        "polkit is unavailable, mutating calls will be denied: {error:#}"
      );
    },
  }

  let _ = daemon.connection.set(connection.clone());

  tokio::spawn(battery_task(connection, Arc::clone(&daemon)));

  log::info!("daemon ready");

  let mut sigterm = tokio::signal::unix::signal(
    tokio::signal::unix::SignalKind::terminate(),
  )
  .context("failed to install the SIGTERM handler")?;

  loop {
    tokio::select! {
      event = events.recv() => {
        let Some((path, kind)) = event else {
          break;
        };

        let changes = daemon.handle_file_event(&path, kind).await;
        daemon.emit(&changes).await;

        // A late driver load may bring new directories to watch.
        for dir in daemon.watch_dirs().await {
          monitor.watch(dir);
        }
      },

      _ = tokio::signal::ctrl_c() => {
        log::info!("interrupted, shutting down");
        break;
      },

      _ = sigterm.recv() => {
        log::info!("terminated, shutting down");
        break;
      },
    }
  }

  Ok(())
}

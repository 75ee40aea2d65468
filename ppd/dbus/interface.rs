use std::{
  collections::HashMap,
  sync::Arc,
};

use zbus::{
  fdo,
  interface,
  message::Header,
  object_server::SignalEmitter,
  zvariant::Value,
};

use crate::{
  auth,
  daemon::{
    Daemon,
    track_client,
  },
  error::Error,
  profile::Profile,
};

/// Interface served under the UPower name. The legacy name below delegates
/// to the same daemon; both stay bit-identical on the wire.
pub struct UPowerProfiles {
  pub(crate) daemon: Arc<Daemon>,
}

/// Interface served under the legacy `net.hadess` name.
pub struct HadessProfiles {
  pub(crate) daemon: Arc<Daemon>,
}

async fn profiles_prop(
  daemon: &Daemon,
) -> Vec<HashMap<String, Value<'static>>> {
  daemon
    .profile_entries()
    .await
    .into_iter()
    .map(|entry| {
      let mut map = HashMap::new();

      map.insert(
        "Profile".to_owned(),
        Value::from(entry.profile.as_str()),
      );
      map.insert("Driver".to_owned(), Value::from(entry.driver));
      map.insert(
        "PlatformDriver".to_owned(),
        Value::from(entry.platform_driver),
      );

      if let Some(cpu_driver) = entry.cpu_driver {
        map.insert("CpuDriver".to_owned(), Value::from(cpu_driver));
      }

      map
    })
    .collect()
}

async fn holds_prop(
  daemon: &Daemon,
) -> Vec<HashMap<String, Value<'static>>> {
  daemon
    .holds_info()
    .await
    .into_iter()
    .map(|(profile, reason, application_id)| {
      let mut map = HashMap::new();

      map.insert("Profile".to_owned(), Value::from(profile.as_str()));
      map.insert("Reason".to_owned(), Value::from(reason));
      map.insert("ApplicationId".to_owned(), Value::from(application_id));

      map
    })
    .collect()
}

async fn set_active_profile(
  daemon: &Daemon,
  header: Header<'_>,
  profile: &str,
) -> zbus::Result<()> {
  let Some(profile) = Profile::parse(profile) else {
    return Err(
      Error::InvalidArgs(format!(
        "invalid profile '{profile}', valid: power-saver, balanced, \
         performance"
      ))
      .into(),
    );
  };

  daemon.authorize(&header, auth::SWITCH_PROFILE).await?;

  let changes = daemon.set_active_profile(profile).await?;

  log::info!("profile set to '{profile}' over the bus");

  daemon.prune_client_watches().await;
  daemon.emit(&changes).await;

  Ok(())
}

async fn hold_profile(
  daemon: &Arc<Daemon>,
  header: Header<'_>,
  profile: &str,
  reason: &str,
  application_id: &str,
) -> fdo::Result<u32> {
  let Some(profile) = Profile::parse(profile) else {
    return Err(fdo::Error::InvalidArgs(format!(
      "invalid profile '{profile}'"
    )));
  };

  daemon
    .authorize(&header, auth::HOLD_PROFILE)
    .await
    .map_err(fdo::Error::from)?;

  let Some(sender) = header.sender() else {
    return Err(fdo::Error::from(Error::Internal(
      "caller has no unique name".to_owned(),
    )));
  };
  let client = sender.to_string();

  let (cookie, changes) = daemon
    .hold_profile(profile, reason, application_id, &client)
    .await
    .map_err(fdo::Error::from)?;

  track_client(daemon, &client).await;
  daemon.emit(&changes).await;

  Ok(cookie)
}

async fn release_profile(
  daemon: &Daemon,
  header: Header<'_>,
  cookie: u32,
) -> fdo::Result<()> {
  let Some(sender) = header.sender() else {
    return Err(fdo::Error::from(Error::Internal(
      "caller has no unique name".to_owned(),
    )));
  };
  let client = sender.to_string();

  let changes = daemon
    .release_profile(cookie, &client)
    .await
    .map_err(fdo::Error::from)?;

  daemon.prune_client_watches().await;
  daemon.emit(&changes).await;

  Ok(())
}

#[interface(name = "org.freedesktop.UPower.PowerProfiles")]
impl UPowerProfiles {
  #[zbus(property)]
  async fn active_profile(&self) -> String {
    self.daemon.active_profile().await.as_str().to_owned()
  }

  #[zbus(property)]
  async fn set_active_profile(
    &self,
    #[zbus(header)] header: Option<Header<'_>>,
    profile: &str,
  ) -> zbus::Result<()> {
    let Some(header) = header else {
      return Err(Error::Internal("missing message header".to_owned()).into());
    };
    set_active_profile(&self.daemon, header, profile).await
  }

  #[zbus(property)]
  async fn profiles(&self) -> Vec<HashMap<String, Value<'static>>> {
    profiles_prop(&self.daemon).await
  }

  #[zbus(property)]
  async fn actions(&self) -> Vec<String> {
    self.daemon.action_ids().await
  }

  #[zbus(property)]
  async fn performance_degraded(&self) -> String {
    self.daemon.degradation().await
  }

  #[zbus(property)]
  async fn performance_inhibited(&self) -> String {
    self.daemon.inhibition().await
  }

  #[zbus(property)]
  async fn active_profile_holds(
    &self,
  ) -> Vec<HashMap<String, Value<'static>>> {
    holds_prop(&self.daemon).await
  }

  #[zbus(property)]
  async fn version(&self) -> String {
    env!("CARGO_PKG_VERSION").to_owned()
  }

  async fn hold_profile(
    &self,
    #[zbus(header)] header: Header<'_>,
    profile: &str,
    reason: &str,
    application_id: &str,
  ) -> fdo::Result<u32> {
    hold_profile(&self.daemon, header, profile, reason, application_id).await
  }

  async fn release_profile(
    &self,
    #[zbus(header)] header: Header<'_>,
    cookie: u32,
  ) -> fdo::Result<()> {
    release_profile(&self.daemon, header, cookie).await
  }

  #[zbus(signal)]
  pub async fn profile_released(
    emitter: &SignalEmitter<'_>,
    cookie: u32,
  ) -> zbus::Result<()>;
}

#[interface(name = "net.hadess.PowerProfiles")]
impl HadessProfiles {
  #[zbus(property)]
  async fn active_profile(&self) -> String {
    self.daemon.active_profile().await.as_str().to_owned()
  }

  #[zbus(property)]
  async fn set_active_profile(
    &self,
    #[zbus(header)] header: Option<Header<'_>>,
    profile: &str,
  ) -> zbus::Result<()> {
    let Some(header) = header else {
      return Err(Error::Internal("missing message header".to_owned()).into());
    };
    set_active_profile(&self.daemon, header, profile).await
  }

  #[zbus(property)]
  async fn profiles(&self) -> Vec<HashMap<String, Value<'static>>> {
    profiles_prop(&self.daemon).await
  }

  #[zbus(property)]
  async fn actions(&self) -> Vec<String> {
    self.daemon.action_ids().await
  }

  #[zbus(property)]
  async fn performance_degraded(&self) -> String {
    self.daemon.degradation().await
  }

  #[zbus(property)]
  async fn performance_inhibited(&self) -> String {
    self.daemon.inhibition().await
  }

  #[zbus(property)]
  async fn active_profile_holds(
    &self,
  ) -> Vec<HashMap<String, Value<'static>>> {
    holds_prop(&self.daemon).await
  }

  #[zbus(property)]
  async fn version(&self) -> String {
    env!("CARGO_PKG_VERSION").to_owned()
  }

  async fn hold_profile(
    &self,
    #[zbus(header)] header: Header<'_>,
    profile: &str,
    reason: &str,
    application_id: &str,
  ) -> fdo::Result<u32> {
    hold_profile(&self.daemon, header, profile, reason, application_id).await
  }

  async fn release_profile(
    &self,
    #[zbus(header)] header: Header<'_>,
    cookie: u32,
  ) -> fdo::Result<()> {
    release_profile(&self.daemon, header, cookie).await
  }

  #[zbus(signal)]
  pub async fn profile_released(
    emitter: &SignalEmitter<'_>,
    cookie: u32,
  ) -> zbus::Result<()>;
}

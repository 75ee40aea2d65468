use std::sync::Arc;

use zbus::connection;

use crate::daemon::Daemon;

use super::{
  HADESS_NAME,
  HADESS_PATH,
  UPOWER_NAME,
  UPOWER_PATH,
  interface,
};

/// Put the daemon on the system bus under both well-known names.
pub async fn serve(daemon: Arc<Daemon>) -> zbus::Result<zbus::Connection> {
  let connection = connection::Builder::system()?
    .serve_at(
      HADESS_PATH,
      interface::HadessProfiles {
        daemon: Arc::clone(&daemon),
      },
    )?
    .serve_at(UPOWER_PATH, interface::UPowerProfiles { daemon })?
    .name(HADESS_NAME)?
    .name(UPOWER_NAME)?
    .build()
    .await?;

  log::info!("acquired '{HADESS_NAME}' and '{UPOWER_NAME}'");

  Ok(connection)
}

use crate::engine::Changes;

pub mod interface;
pub mod server;

pub use server::serve;

/// Legacy well-known name, kept for the many clients that still speak it.
pub const HADESS_NAME: &str = "net.hadess.PowerProfiles";
pub const HADESS_PATH: &str = "/net/hadess/PowerProfiles";

/// Current well-known name under the UPower umbrella.
pub const UPOWER_NAME: &str = "org.freedesktop.UPower.PowerProfiles";
pub const UPOWER_PATH: &str = "/org/freedesktop/UPower/PowerProfiles";

/// Announce one transaction's coalesced fallout on both bus names:
/// `ProfileReleased` per removed hold first, then the `ActiveProfile`,
/// `PerformanceDegraded` and `ActiveProfileHolds` property changes, in that
/// order.
pub async fn emit_changes(connection: &zbus::Connection, changes: &Changes) {
  if let Err(error) = try_emit(connection, changes).await {
    log::warn!("failed to emit change signals: {error}");
  }
}

async fn try_emit(
  connection: &zbus::Connection,
  changes: &Changes,
) -> zbus::Result<()> {
  let server = connection.object_server();

  let hadess = server
    .interface::<_, interface::HadessProfiles>(HADESS_PATH)
    .await?;
  let upower = server
    .interface::<_, interface::UPowerProfiles>(UPOWER_PATH)
    .await?;

  for &cookie in &changes.released {
    interface::HadessProfiles::profile_released(
      hadess.signal_emitter(),
      cookie,
    )
    .await?;
    interface::UPowerProfiles::profile_released(
      upower.signal_emitter(),
      cookie,
    )
    .await?;
  }

  if changes.active_profile {
    hadess
      .get()
      .await
      .active_profile_changed(hadess.signal_emitter())
      .await?;
    upower
      .get()
      .await
      .active_profile_changed(upower.signal_emitter())
      .await?;
  }

  if changes.degraded {
    hadess
      .get()
      .await
      .performance_degraded_changed(hadess.signal_emitter())
      .await?;
    upower
      .get()
      .await
      .performance_degraded_changed(upower.signal_emitter())
      .await?;
  }

  if changes.holds {
    hadess
      .get()
      .await
      .active_profile_holds_changed(hadess.signal_emitter())
      .await?;
    upower
      .get()
      .await
      .active_profile_holds_changed(upower.signal_emitter())
      .await?;
  }

  if changes.profiles {
    hadess
      .get()
      .await
      .profiles_changed(hadess.signal_emitter())
      .await?;
    upower
      .get()
      .await
      .profiles_changed(upower.signal_emitter())
      .await?;
  }

  Ok(())
}

use zbus::proxy;

/// Minimal view of the UPower daemon: all the engine wants to know is
/// whether the machine runs on battery.
#[proxy(
  interface = "org.freedesktop.UPower",
  default_service = "org.freedesktop.UPower",
  default_path = "/org/freedesktop/UPower",
  gen_blocking = false
)]
pub trait UPower {
  #[zbus(property)]
  fn on_battery(&self) -> zbus::Result<bool>;
}

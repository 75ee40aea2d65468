use zbus::fdo;

/// Errors surfaced to bus callers, one variant per D-Bus error name.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested profile is absent from the active driver set.
  #[error("{0}")]
  NotSupported(String),

  /// Malformed profile token, balanced hold, or foreign cookie.
  #[error("{0}")]
  InvalidArgs(String),

  /// The policy oracle rejected the caller.
  #[error("{0}")]
  AccessDenied(String),

  /// A kernel write failed mid-transaction.
  #[error("{0:#}")]
  Io(anyhow::Error),

  /// Invariant breach. Must not happen.
  #[error("{0}")]
  Internal(String),
}

impl From<Error> for fdo::Error {
  fn from(error: Error) -> Self {
    let message = error.to_string();

    match error {
      Error::NotSupported(_) => fdo::Error::NotSupported(message),
      Error::InvalidArgs(_) => fdo::Error::InvalidArgs(message),
      Error::AccessDenied(_) => fdo::Error::AccessDenied(message),
      Error::Io(_) => fdo::Error::IOError(message),
      Error::Internal(_) => fdo::Error::Failed(message),
    }
  }
}

impl From<Error> for zbus::Error {
  fn from(error: Error) -> Self {
    zbus::Error::from(fdo::Error::from(error))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn variants_map_to_matching_bus_errors() {
    let denied = fdo::Error::from(Error::AccessDenied("nope".to_owned()));
    assert!(matches!(denied, fdo::Error::AccessDenied(_)));

    let unsupported =
      fdo::Error::from(Error::NotSupported("no performance".to_owned()));
    assert!(matches!(unsupported, fdo::Error::NotSupported(_)));

    let invalid = fdo::Error::from(Error::InvalidArgs("balanced".to_owned()));
    assert!(matches!(invalid, fdo::Error::InvalidArgs(_)));

    let io = fdo::Error::from(Error::Io(anyhow::anyhow!("sysfs write")));
    assert!(matches!(io, fdo::Error::IOError(_)));
  }
}

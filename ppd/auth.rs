use std::collections::HashMap;

use anyhow::Context;
use zbus::message::Header;
use zbus_polkit::policykit1::{
  AuthorityProxy,
  CheckAuthorizationFlags,
  Subject,
};

use crate::error::Error;

/// Polkit action checked before a profile switch via the property setter.
pub const SWITCH_PROFILE: &str = "net.hadess.PowerProfiles.switch-profile";

/// Polkit action checked before `HoldProfile`.
pub const HOLD_PROFILE: &str = "net.hadess.PowerProfiles.hold-profile";

/// Gate for mutating bus calls. Every invocation is checked individually
/// against the polkit authority; reads are never gated.
pub struct Authorizer {
  authority: AuthorityProxy<'static>,
}

impl Authorizer {
  pub async fn new(connection: &zbus::Connection) -> anyhow::Result<Self> {
    let authority = AuthorityProxy::new(connection)
      .await
      .context("failed to connect to the polkit authority")?;

    Ok(Self { authority })
  }

  /// Check that the sender of `header` may perform `action`. Any failure to
  /// identify or authorize the caller is a denial; no state may change after
  /// an `Err` from here.
  pub async fn check(
    &self,
    header: &Header<'_>,
    action: &str,
  ) -> Result<(), Error> {
    let subject = Subject::new_for_message_header(header).map_err(|error| {
      Error::AccessDenied(format!("cannot identify caller: {error:?}"))
    })?;

    let result = self
      .authority
      .check_authorization(
        &subject,
        action,
        &HashMap::new(),
        CheckAuthorizationFlags::AllowUserInteraction.into(),
        "",
      )
      .await
      .map_err(|error| {
        Error::AccessDenied(format!("authorization lookup failed: {error}"))
      })?;

    if result.is_authorized {
      Ok(())
    } else {
      Err(Error::AccessDenied(format!("'{action}' is not authorized")))
    }
  }
}

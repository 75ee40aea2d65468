use std::fmt;

use serde::{
  Deserialize,
  Serialize,
};

/// One of the three abstract power profiles exposed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
  PowerSaver,
  Balanced,
  Performance,
}

impl Profile {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::PowerSaver => "power-saver",
      Self::Balanced => "balanced",
      Self::Performance => "performance",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "power-saver" => Some(Self::PowerSaver),
      "balanced" => Some(Self::Balanced),
      "performance" => Some(Self::Performance),
      _ => None,
    }
  }

  /// All profiles, in the order they are listed on the bus.
  pub fn all() -> [Self; 3] {
    [Self::PowerSaver, Self::Balanced, Self::Performance]
  }

  /// Arbitration rank. A held power-saver beats a held performance, which
  /// beats the implicit balanced baseline.
  fn rank(self) -> u8 {
    match self {
      Self::PowerSaver => 2,
      Self::Performance => 1,
      Self::Balanced => 0,
    }
  }

  pub fn outranks(self, other: Self) -> bool {
    self.rank() > other.rank()
  }
}

impl fmt::Display for Profile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A client request pinning the effective profile until released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
  pub cookie:         u32,
  pub profile:        Profile,
  pub reason:         String,
  pub application_id: String,

  /// Unique bus name of the client that took the hold.
  pub client: String,
}

/// Holds in insertion order, addressed by cookie.
///
/// Cookies start at 1 and are never reused within a daemon run.
#[derive(Debug)]
pub struct HoldRegistry {
  holds:       Vec<Hold>,
  next_cookie: u32,
}

impl HoldRegistry {
  pub fn new() -> Self {
    Self {
      holds:       Vec::new(),
      next_cookie: 1,
    }
  }

  pub fn insert(
    &mut self,
    profile: Profile,
    reason: String,
    application_id: String,
    client: String,
  ) -> u32 {
    let cookie = self.next_cookie;
    self.next_cookie = self.next_cookie.wrapping_add(1);

    self.holds.push(Hold {
      cookie,
      profile,
      reason,
      application_id,
      client,
    });

    cookie
  }

  pub fn get(&self, cookie: u32) -> Option<&Hold> {
    self.holds.iter().find(|hold| hold.cookie == cookie)
  }

  pub fn remove(&mut self, cookie: u32) -> Option<Hold> {
    let index = self.holds.iter().position(|hold| hold.cookie == cookie)?;

    Some(self.holds.remove(index))
  }

  /// Remove every hold taken by `client`, in insertion order.
  pub fn remove_client(&mut self, client: &str) -> Vec<Hold> {
    let mut removed = Vec::new();

    self.holds.retain(|hold| {
      if hold.client == client {
        removed.push(hold.clone());
        false
      } else {
        true
      }
    });

    removed
  }

  /// Remove every hold, in insertion order.
  pub fn drain_all(&mut self) -> Vec<Hold> {
    self.holds.drain(..).collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Hold> {
    self.holds.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.holds.is_empty()
  }

  pub fn len(&self) -> usize {
    self.holds.len()
  }

  /// The profile the holds collectively ask for, if any. On rank ties the
  /// earliest hold wins.
  pub fn winner(&self) -> Option<Profile> {
    let mut winner: Option<Profile> = None;

    for hold in &self.holds {
      match winner {
        Some(current) if !hold.profile.outranks(current) => {},
        _ => winner = Some(hold.profile),
      }
    }

    winner
  }

  /// The profile to realize given the user's standing choice.
  pub fn effective(&self, user_selected: Profile) -> Profile {
    self.winner().unwrap_or(user_selected)
  }
}

impl Default for HoldRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn hold(registry: &mut HoldRegistry, profile: Profile) -> u32 {
    registry.insert(
      profile,
      String::new(),
      String::new(),
      ":1.42".to_owned(),
    )
  }

  #[test]
  fn tokens_round_trip() {
    for profile in Profile::all() {
      assert_eq!(Profile::parse(profile.as_str()), Some(profile));
    }

    assert_eq!(Profile::parse("power_saver"), None);
    assert_eq!(Profile::parse(""), None);
  }

  #[test]
  fn power_saver_outranks_performance_outranks_balanced() {
    assert!(Profile::PowerSaver.outranks(Profile::Performance));
    assert!(Profile::Performance.outranks(Profile::Balanced));
    assert!(Profile::PowerSaver.outranks(Profile::Balanced));
    assert!(!Profile::Balanced.outranks(Profile::Performance));
    assert!(!Profile::Performance.outranks(Profile::Performance));
  }

  #[test]
  fn cookies_start_at_one_and_are_unique() {
    let mut registry = HoldRegistry::new();

    let first = hold(&mut registry, Profile::Performance);
    let second = hold(&mut registry, Profile::PowerSaver);

    assert_eq!(first, 1);
    assert_eq!(second, 2);

    registry.remove(first);

    // Released cookies are not handed out again.
    assert_eq!(hold(&mut registry, Profile::Performance), 3);
  }

  #[test]
  fn winner_prefers_power_saver_and_breaks_ties_by_insertion() {
    let mut registry = HoldRegistry::new();
    assert_eq!(registry.winner(), None);

    let performance = hold(&mut registry, Profile::Performance);
    assert_eq!(registry.winner(), Some(Profile::Performance));

    let power_saver = hold(&mut registry, Profile::PowerSaver);
    assert_eq!(registry.winner(), Some(Profile::PowerSaver));

    registry.remove(performance);
    assert_eq!(registry.winner(), Some(Profile::PowerSaver));

    registry.remove(power_saver);
    assert_eq!(registry.winner(), None);
    assert_eq!(registry.effective(Profile::Balanced), Profile::Balanced);
  }

  #[test]
  fn remove_client_keeps_other_clients_holds() {
    let mut registry = HoldRegistry::new();

    let kept = registry.insert(
      Profile::Performance,
      String::new(),
      String::new(),
      ":1.1".to_owned(),
    );
    registry.insert(
      Profile::PowerSaver,
      String::new(),
      String::new(),
      ":1.2".to_owned(),
    );
    registry.insert(
      Profile::Performance,
      String::new(),
      String::new(),
      ":1.2".to_owned(),
    );

    let removed = registry.remove_client(":1.2");

    assert_eq!(removed.len(), 2);
    assert_eq!(removed[0].cookie, 2);
    assert_eq!(removed[1].cookie, 3);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(kept).map(|hold| hold.cookie), Some(kept));
  }

  fn profile_strategy() -> impl Strategy<Value = Profile> {
    prop_oneof![
      Just(Profile::PowerSaver),
      Just(Profile::Performance),
      Just(Profile::Balanced),
    ]
  }

  proptest! {
    #[test]
    fn effective_is_the_highest_ranked_hold(
      profiles in prop::collection::vec(profile_strategy(), 0..8),
      user in profile_strategy(),
    ) {
      let mut registry = HoldRegistry::new();

      for profile in &profiles {
        hold(&mut registry, *profile);
      }

      let expected = profiles
        .iter()
        .copied()
        .fold(None::<Profile>, |best, profile| match best {
          Some(current) if !profile.outranks(current) => Some(current),
          _ => Some(profile),
        })
        .unwrap_or(user);

      prop_assert_eq!(registry.effective(user), expected);
    }

    #[test]
    fn cookies_stay_unique_under_churn(
      profiles in prop::collection::vec(profile_strategy(), 1..16),
      removals in prop::collection::vec(any::<u32>(), 0..16),
    ) {
      let mut registry = HoldRegistry::new();
      let mut issued = Vec::new();

      for profile in &profiles {
        issued.push(hold(&mut registry, *profile));
      }

      for removal in &removals {
        registry.remove(*removal);
      }

      let mut seen = issued.clone();
      seen.sort_unstable();
      seen.dedup();
      prop_assert_eq!(seen.len(), issued.len());
    }
  }
}

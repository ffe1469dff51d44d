use std::collections::HashMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Snapshot cadence for a retention profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
}

fn default_max_on_live() -> u32 {
    1
}

/// A retention class: how many units of `frequency` to keep, and how
/// many live-side copies to retain before the anchor snapshot
/// (spec.md §3, "Profile table").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub count: u32,
    pub frequency: Frequency,
    #[serde(default = "default_max_on_live")]
    pub max_on_live: u32,
}

impl Profile {
    /// The retention span derived from `count` and `frequency`:
    /// `count` hours for `hourly`, `count` days for `daily`.
    pub fn retention(&self) -> Duration {
        match self.frequency {
            Frequency::Hourly => Duration::hours(self.count as i64),
            Frequency::Daily => Duration::days(self.count as i64),
        }
    }
}

/// `profile_name -> Profile` mapping, as configured in `profiles{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileTable(HashMap<String, Profile>);

impl ProfileTable {
    pub fn new(table: HashMap<String, Profile>) -> Self {
        Self(table)
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Profile)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_converts_count_and_frequency() {
        let hourly = Profile {
            count: 24,
            frequency: Frequency::Hourly,
            max_on_live: 1,
        };
        assert_eq!(hourly.retention(), Duration::hours(24));

        let daily = Profile {
            count: 7,
            frequency: Frequency::Daily,
            max_on_live: 2,
        };
        assert_eq!(daily.retention(), Duration::days(7));
    }

    #[test]
    fn max_on_live_defaults_to_one() {
        let json = r#"{"count": 7, "frequency": "daily"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.max_on_live, 1);
    }
}

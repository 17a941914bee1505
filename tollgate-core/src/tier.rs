//! Subscription tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subscription level, ordered `Free < Pro < Enterprise`.
///
/// The derived ordering follows declaration order, so tier gates are plain
/// comparisons.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Enterprise];

    /// Numeric level (free = 0).
    pub fn level(self) -> u8 {
        match self {
            Tier::Free => 0,
            Tier::Pro => 1,
            Tier::Enterprise => 2,
        }
    }

    /// Whether this tier grants access to something gated at `minimum`.
    pub fn satisfies(self, minimum: Tier) -> bool {
        self >= minimum
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_pairs_are_ordered() {
        assert!(Tier::Free < Tier::Pro);
        assert!(Tier::Pro < Tier::Enterprise);
        assert!(Tier::Free.level() < Tier::Pro.level());
        assert!(Tier::Pro.level() < Tier::Enterprise.level());
    }

    #[test]
    fn test_satisfies_every_pair() {
        for (i, have) in Tier::ALL.iter().enumerate() {
            for (j, need) in Tier::ALL.iter().enumerate() {
                assert_eq!(have.satisfies(*need), i >= j, "{} vs {}", have, need);
            }
        }
    }

    #[test]
    fn test_parse_and_display() {
        for tier in Tier::ALL {
            assert_eq!(tier.to_string().parse::<Tier>(), Ok(tier));
        }
        assert_eq!(" PRO ".parse::<Tier>(), Ok(Tier::Pro));
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn test_serde_lowercase() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&Tier::Enterprise)?, "\"enterprise\"");
        let tier: Tier = serde_json::from_str("\"pro\"")?;
        assert_eq!(tier, Tier::Pro);
        assert!(serde_json::from_str::<Tier>("\"gold\"").is_err());
        Ok(())
    }
}

//! Common types used across the workspace

use serde::{Deserialize, Serialize};

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Upstream venue a record was harvested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    /// Kalshi REST API
    Kalshi,
    /// Polymarket gamma REST API and Polygon event logs
    Polymarket,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Kalshi => "kalshi",
            Venue::Polymarket => "polymarket",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Venue {
    type Err = crate::PmdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kalshi" => Ok(Venue::Kalshi),
            "polymarket" => Ok(Venue::Polymarket),
            _ => Err(crate::PmdError::Parse(format!("Unknown venue: {}", s))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_roundtrip_str() {
        assert_eq!("Kalshi".parse::<Venue>().unwrap(), Venue::Kalshi);
        assert_eq!(Venue::Polymarket.to_string(), "polymarket");
        assert!("betfair".parse::<Venue>().is_err());
    }

    #[test]
    fn test_checksum_algorithm_serde() {
        let json = serde_json::to_string(&ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(json, "\"sha256\"");
    }
}

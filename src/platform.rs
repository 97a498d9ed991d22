//! Supported social platforms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A social platform supported by the connector framework.
///
/// Each variant has exactly one `Connector` implementation. The lowercase
/// string form is used in URLs, environment variable prefixes, and the
/// credential store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Youtube,
    Instagram,
}

impl Platform {
    /// All supported platforms, in display order.
    pub const ALL: [Platform; 3] = [Platform::Twitter, Platform::Youtube, Platform::Instagram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Youtube => "youtube",
            Platform::Instagram => "instagram",
        }
    }

    /// Uppercase prefix for environment variables (e.g. `TWITTER_CLIENT_ID`).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Platform::Twitter => "TWITTER",
            Platform::Youtube => "YOUTUBE",
            Platform::Instagram => "INSTAGRAM",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twitter" => Ok(Platform::Twitter),
            "youtube" => Ok(Platform::Youtube),
            "instagram" => Ok(Platform::Instagram),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized platform name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform '{}'", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

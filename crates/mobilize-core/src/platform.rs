//! Native target platforms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{Error, Result};

/// A native platform a build can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Ios, Platform::Android];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(Error::InvalidInput(format!("unknown platform: {}", other))),
        }
    }
}

/// Ordered set of requested platforms.
pub type PlatformSet = BTreeSet<Platform>;

/// Parse the client platform selector: `ios`, `android`, `both`/`all`,
/// or a comma separated list.
pub fn parse_platforms(selector: &str) -> Result<PlatformSet> {
    let selector = selector.trim();
    if selector.eq_ignore_ascii_case("both") || selector.eq_ignore_ascii_case("all") {
        return Ok(Platform::ALL.into_iter().collect());
    }

    let platforms = selector
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect::<Result<PlatformSet>>()?;

    if platforms.is_empty() {
        return Err(Error::InvalidInput("no platform requested".to_string()));
    }
    Ok(platforms)
}

/// The single label the dashboard shows for a platform set.
pub fn platform_label(platforms: &PlatformSet) -> String {
    if platforms.len() == Platform::ALL.len() {
        return "both".to_string();
    }
    platforms
        .iter()
        .map(Platform::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

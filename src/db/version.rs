//! Server version detection
//!
//! Versions are compared numerically on (major, minor, patch). The text
//! form must never be compared directly: "10.1" sorts before "9.3".

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Server version as reported by the server
#[derive(Debug, Clone, Serialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Text the version was parsed from
    pub raw: String,
}

impl ServerVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            raw: format!("{}.{}.{}", major, minor, patch),
        }
    }

    /// Parse a version string such as `9.6.24`, `10.1`, `14beta1`
    /// or `16.2 (Debian 16.2-1.pgdg120+2)`.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let mut parts = token.split('.').map(leading_number);
        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self {
            major,
            minor,
            patch,
            raw: token.to_string(),
        })
    }

    /// Parse the output of `SELECT version()`: the second
    /// whitespace-delimited token is the version.
    pub fn from_version_banner(banner: &str) -> Option<Self> {
        Self::parse(banner.split_whitespace().nth(1)?)
    }

    /// True when this version is at least `major.minor`
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// Materialized views arrived in 9.3
    pub fn supports_materialized_views(&self) -> bool {
        self.at_least(9, 3)
    }

    /// `pg_proc.prokind` replaced `proisagg` in 11
    pub fn has_prokind(&self) -> bool {
        self.at_least(11, 0)
    }

    fn key(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

impl PartialEq for ServerVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ServerVersion {}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// How a session finds out which server it talks to
///
/// Chosen once, when the session is built, from what the connector says
/// its links can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionProbe {
    /// Ask the link for the version it learned during startup,
    /// falling back to SQL when it has none
    Native,
    /// Run `SELECT version()`
    Sql,
}

impl VersionProbe {
    pub const VERSION_QUERY: &'static str = "SELECT version()";

    pub fn for_native_support(native: bool) -> Self {
        if native {
            VersionProbe::Native
        } else {
            VersionProbe::Sql
        }
    }
}

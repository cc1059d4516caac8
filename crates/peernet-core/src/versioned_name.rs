//! Protocol identifiers of the form `/name/major.minor.patch`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Semantic version of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u32, CoreError> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| CoreError::InvalidName(format!("invalid version '{}'", s)))
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(CoreError::InvalidName(format!("invalid version '{}'", s)));
        }
        Ok(version)
    }
}

/// A protocol name paired with its version.
///
/// Ordering is by name first, then by version, so sorting a list groups
/// protocols by name with the newest version last.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionedName {
    pub name: String,
    pub version: Version,
}

impl VersionedName {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse `/name/x.y.z`, returning an error for anything else.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        s.parse()
    }
}

impl fmt::Display for VersionedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.name, self.version)
    }
}

impl FromStr for VersionedName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .strip_prefix('/')
            .ok_or_else(|| CoreError::InvalidName(s.to_string()))?;
        let (name, version) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| CoreError::InvalidName(s.to_string()))?;
        if name.is_empty() {
            return Err(CoreError::InvalidName(s.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.parse()?,
        })
    }
}

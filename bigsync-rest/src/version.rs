//! BigIP version parsing and the supported-version gate

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::{RestError, Result};

/// `major.minor.patch`; any further components (BigIP builds use four) are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = RestError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || RestError::Protocol {
            status: 200,
            message: format!("invalid version string: {}", raw),
        };
        let mut parts = raw.trim().split('.');
        let mut next = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(part) => {
                    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                    digits.parse().map_err(|_| invalid())
                }
                None if required => Err(invalid()),
                None => Ok(0),
            }
        };
        Ok(Self {
            major: next(true)?,
            minor: next(false)?,
            patch: next(false)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Inclusive range of supported device versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGate {
    pub minimum: Version,
    pub maximum: Version,
}

impl VersionGate {
    pub const fn new(minimum: Version, maximum: Version) -> Self {
        Self { minimum, maximum }
    }

    pub fn accepts(&self, version: &Version) -> bool {
        *version >= self.minimum && *version <= self.maximum
    }

    pub fn check(&self, raw: &str) -> Result<Version> {
        let version: Version = raw.parse()?;
        if self.accepts(&version) {
            Ok(version)
        } else {
            Err(RestError::VersionUnsupported {
                version: raw.trim().to_string(),
                minimum: self.minimum.to_string(),
                maximum: self.maximum.to_string(),
            })
        }
    }
}

/// Extract the version string from a `sys/version` document. The value sits under
/// `entries.*.nestedStats.entries.Version.description`; the search does not depend on
/// the self-link key.
pub fn version_from_document(document: &Value) -> Option<String> {
    match document {
        Value::Object(map) => {
            if let Some(description) = map
                .get("Version")
                .and_then(|v| v.get("description"))
                .and_then(Value::as_str)
            {
                return Some(description.to_string());
            }
            map.values().find_map(version_from_document)
        }
        Value::Array(items) => items.iter().find_map(version_from_document),
        _ => None,
    }
}

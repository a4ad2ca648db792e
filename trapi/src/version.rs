use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Schema version sent when neither the registry nor the caller names one
pub const DEFAULT_TRAPI_VERSION: &str = "1.4.0";

/// Oldest Biolink Model release the engine will ask for
pub const MINIMUM_BIOLINK_VERSION: &str = "2.2.11";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid semantic version: {0}")]
pub struct VersionError(pub String);

/// `major.minor.patch` with an optional pre-release tag.
///
/// A leading `v` and missing minor/patch components are tolerated
/// (`v1.4` parses as `1.4.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(?:-([0-9A-Za-z.\-]+))?(?:\+[0-9A-Za-z.\-]+)?$")
                .ok()
        })
        .as_ref()
}

impl SemVer {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    /// Same major and minor release
    pub fn same_minor(&self, other: &SemVer) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for SemVer {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = version_pattern()
            .and_then(|re| re.captures(s.trim()))
            .ok_or_else(|| VersionError(s.to_string()))?;

        let part = |i: usize| -> Result<u64, VersionError> {
            caps.get(i)
                .map(|m| m.as_str().parse::<u64>())
                .transpose()
                .map(|v| v.unwrap_or(0))
                .map_err(|_| VersionError(s.to_string()))
        };

        Ok(Self {
            major: part(1)?,
            minor: part(2)?,
            patch: part(3)?,
            prerelease: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// Raise a Biolink version below [`MINIMUM_BIOLINK_VERSION`] to the minimum.
///
/// Unparseable versions are returned unchanged.
pub fn clamp_biolink_version(version: &str) -> String {
    match (version.parse::<SemVer>(), MINIMUM_BIOLINK_VERSION.parse::<SemVer>()) {
        (Ok(v), Ok(min)) if v < min => MINIMUM_BIOLINK_VERSION.to_string(),
        _ => version.to_string(),
    }
}

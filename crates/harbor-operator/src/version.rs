//! Harbor version ladder
//!
//! Supported Harbor releases are registered as `~MAJOR.MINOR.x` buckets,
//! oldest first. An upgrade may stay in the current bucket or move to the
//! next one; moving backwards is refused.

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-([0-9A-Za-z.-]+))?$").unwrap()
});

/// One supported minor line and the newest patch the operator knows for it
#[derive(Debug, Clone, Copy)]
pub struct VersionBucket {
    pub major: u64,
    pub minor: u64,
    pub latest_patch: u64,
}

impl VersionBucket {
    pub fn contains(&self, version: &Version) -> bool {
        self.major == version.major && self.minor == version.minor
    }

    /// Newest known release of this bucket
    pub fn latest(&self) -> Version {
        Version::new(self.major, self.minor, self.latest_patch)
    }
}

impl fmt::Display for VersionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}.{}.x", self.major, self.minor)
    }
}

/// Supported versions, oldest first
pub const VERSION_LADDER: &[VersionBucket] = &[
    VersionBucket {
        major: 2,
        minor: 2,
        latest_patch: 3,
    },
    VersionBucket {
        major: 2,
        minor: 3,
        latest_patch: 5,
    },
    VersionBucket {
        major: 2,
        minor: 4,
        latest_patch: 3,
    },
    VersionBucket {
        major: 2,
        minor: 5,
        latest_patch: 0,
    },
];

/// A parsed release version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // a pre-release sorts before its release
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// Version parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{0}'")]
pub struct ParseVersionError(pub String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = VERSION_REGEX
            .captures(s.trim())
            .ok_or_else(|| ParseVersionError(s.to_string()))?;
        let number = |i: usize| -> Result<u64, ParseVersionError> {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(|| ParseVersionError(s.to_string()))
        };
        Ok(Version {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            pre: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }
}

/// Why a version was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("invalid version '{0}'")]
    Invalid(String),
    #[error("unknown version '{0}', supported: {1}")]
    Unknown(String, String),
    #[error("downgrade not allowed from {from} to {to}")]
    Downgrade { from: String, to: String },
    #[error("upgrade from {from} to {to} skips a minor version, upgrade to {next} first")]
    SkippedVersion {
        from: String,
        to: String,
        next: String,
    },
}

fn supported() -> String {
    VERSION_LADDER
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn bucket_index(version: &Version) -> Option<usize> {
    VERSION_LADDER.iter().position(|b| b.contains(version))
}

/// Version used when none is declared
pub fn default_version() -> String {
    VERSION_LADDER
        .last()
        .map(|b| b.latest().to_string())
        .unwrap_or_default()
}

/// Check a version requested at creation time
pub fn validate(raw: &str) -> Result<Version, VersionError> {
    let version: Version = raw
        .parse()
        .map_err(|_| VersionError::Invalid(raw.to_string()))?;
    if bucket_index(&version).is_none() {
        return Err(VersionError::Unknown(raw.to_string(), supported()));
    }
    Ok(version)
}

/// Check a version change on update
pub fn validate_upgrade(current: &str, target: &str) -> Result<Version, VersionError> {
    let target_version: Version = target
        .parse()
        .map_err(|_| VersionError::Invalid(target.to_string()))?;

    let current_version = current.parse::<Version>().ok();
    if let Some(current_version) = &current_version {
        if target_version < *current_version {
            return Err(VersionError::Downgrade {
                from: current.to_string(),
                to: target.to_string(),
            });
        }
    }

    let target_version = validate(target)?;

    let Some(from) = current_version.as_ref().and_then(bucket_index) else {
        return Ok(target_version);
    };
    let to = bucket_index(&target_version).unwrap_or(from);
    if to > from + 1 {
        let next = VERSION_LADDER[from + 1].latest().to_string();
        return Err(VersionError::SkippedVersion {
            from: current.to_string(),
            to: target.to_string(),
            next,
        });
    }

    Ok(target_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v: Version = "v2.4.3".parse().unwrap();
        assert_eq!(v, Version::new(2, 4, 3));
        let rc: Version = "2.5.0-rc1".parse().unwrap();
        assert_eq!(rc.pre.as_deref(), Some("rc1"));
        assert!(rc < Version::new(2, 5, 0));
        assert!("2.4".parse::<Version>().is_err());
        assert!("latest".parse::<Version>().is_err());
    }

    #[test]
    fn test_default_version_is_newest() {
        assert_eq!(default_version(), "2.5.0");
        assert!(validate(&default_version()).is_ok());
    }

    #[test]
    fn test_unknown_version() {
        let err = validate("2.1.0").unwrap_err();
        assert!(matches!(err, VersionError::Unknown(..)));
        assert!(err.to_string().contains("unknown version"));
        assert!(matches!(validate("two").unwrap_err(), VersionError::Invalid(_)));
    }

    #[test]
    fn test_upgrade_within_bucket() {
        assert!(validate_upgrade("2.2.0", "2.2.1").is_ok());
        assert!(validate_upgrade("2.2.1", "2.2.1").is_ok());
    }

    #[test]
    fn test_upgrade_to_next_bucket() {
        assert!(validate_upgrade("2.2.1", "2.3.0").is_ok());
        let err = validate_upgrade("2.2.1", "2.4.0").unwrap_err();
        assert!(matches!(err, VersionError::SkippedVersion { ref next, .. } if next == "2.3.5"));
    }

    #[test]
    fn test_downgrade() {
        let err = validate_upgrade("2.2.1", "2.2.0").unwrap_err();
        assert!(err.to_string().contains("downgrade not allowed"));
        // an unknown older version reports the downgrade first
        let err = validate_upgrade("2.2.1", "2.1.1").unwrap_err();
        assert!(matches!(err, VersionError::Downgrade { .. }));
        // unknown newer versions are still refused
        let err = validate_upgrade("2.5.0", "2.9.0").unwrap_err();
        assert!(matches!(err, VersionError::Unknown(..)));
    }
}

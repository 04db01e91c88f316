//! Generator version identifiers.
//!
//! A version looks like `7.1.0-blitz-0.43`: the upstream randomizer release,
//! the branch name, and the branch's own major/minor number.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::VersionError;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)-([a-z][a-z0-9]*)-(0|[1-9]\d*)\.(0|[1-9]\d*)$",
    )
    .expect("version pattern is valid")
});

/// Structured generator version. Ordering follows field order and is only
/// used to keep indexes deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub branch: String,
    pub branch_major: u32,
    pub branch_minor: u32,
}

impl Version {
    /// Returns true if `s` is a canonical version string.
    pub fn is_valid(s: &str) -> bool {
        VERSION_RE.is_match(s)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError(s.to_string());
        let caps = VERSION_RE.captures(s).ok_or_else(invalid)?;
        // The pattern bounds each group to digits; only overflow can fail here.
        let number = |i: usize| caps[i].parse::<u32>().map_err(|_| invalid());

        Ok(Version {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            branch: caps[4].to_string(),
            branch_major: number(5)?,
            branch_minor: number(6)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-{}-{}.{}",
            self.major, self.minor, self.patch, self.branch, self.branch_major, self.branch_minor
        )
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(major: u32, minor: u32, patch: u32, branch: &str, bmaj: u32, bmin: u32) -> Version {
        Version {
            major,
            minor,
            patch,
            branch: branch.to_string(),
            branch_major: bmaj,
            branch_minor: bmin,
        }
    }

    #[test]
    fn test_parse_valid() {
        let version: Version = "4.2.0-blitz-6.9".parse().unwrap();
        assert_eq!(version, v(4, 2, 0, "blitz", 6, 9));
    }

    #[test]
    fn test_parse_invalid() {
        let err = "4.2-invalid-01".parse::<Version>().unwrap_err();
        assert_eq!(err, VersionError("4.2-invalid-01".to_string()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for s in [
            "",
            "1.0.0",
            "1.0.0-blitz",
            "1.0.0-blitz-1",
            "01.0.0-blitz-1.0",
            "1.0.0-blitz-1.01",
            "1.0.0-Blitz-1.0",
            "1.0.0-9blitz-1.0",
            "1.0.0-bl_itz-1.0",
            "v1.0.0-blitz-1.0",
            " 1.0.0-blitz-1.0",
            "1.0.0-blitz-1.0 ",
            "1.0.0-blitz-1.0.0",
        ] {
            assert!(!Version::is_valid(s));
            assert!(s.parse::<Version>().is_err(), "{s:?} should not parse");
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!("99999999999.0.0-blitz-1.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_round_trip() {
        for s in [
            "0.0.0-a-0.0",
            "7.1.0-blitz-0.43",
            "8.2.10-blitz2-12.0",
            "10.0.0-dev-1.59",
        ] {
            let version: Version = s.parse().unwrap();
            assert_eq!(version.to_string(), s);
        }
    }

    #[test]
    fn test_equality_is_structural() {
        let a = v(7, 1, 0, "blitz", 0, 42);
        let b = v(7, 1, 0, "blitz", 0, 43);
        assert_ne!(a, b);
        assert_eq!(a, "7.1.0-blitz-0.42".parse().unwrap());
    }

    #[test]
    fn test_serde_as_string() {
        let version = v(7, 1, 0, "blitz", 0, 43);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, r#""7.1.0-blitz-0.43""#);
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
        assert!(serde_json::from_str::<Version>(r#""nope""#).is_err());
    }
}

//! Module versioning
//!
//! Versions are discovered from the file names inside a module directory
//! (`1.2.0.json`, `2.0.0-beta.1.json`, ...). Discovery and ordering are pure
//! functions over names so they can be tested without touching disk.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{RegistryError, Result};
use crate::schema::TagMap;

/// Tag consulted when picking the version to publish
pub const LATEST_TAG: &str = "latest";

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-([A-Za-z0-9_.]+))?$").expect("version pattern is valid")
    })
}

/// A `major.minor.patch[-prerelease]` module version
///
/// Ordering compares the numeric triple first. A release sorts above every
/// prerelease of the same triple and prerelease suffixes compare as plain
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
}

impl ModuleVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self> {
        let caps = version_pattern()
            .captures(s)
            .ok_or_else(|| RegistryError::InvalidVersion(s.to_string()))?;

        let number = |i: usize| -> Result<u64> {
            caps[i]
                .parse::<u64>()
                .map_err(|_| RegistryError::InvalidVersion(s.to_string()))
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            prerelease: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }

    /// File name of the version record inside a module directory
    pub fn file_name(&self) -> String {
        format!("{}.json", self)
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for ModuleVersion {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModuleVersion {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ModuleVersion> for String {
    fn from(v: ModuleVersion) -> Self {
        v.to_string()
    }
}

impl PartialOrd for ModuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModuleVersion {
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

/// Discover versions from the file names of a module directory
///
/// Names may carry a `.json` extension. Anything that is not a version
/// (`metadata.json`, `tags.json`, stray files) is ignored. The result is
/// sorted strictly descending without duplicates.
pub fn discover_versions<I, S>(file_names: I) -> Vec<ModuleVersion>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut versions: Vec<ModuleVersion> = file_names
        .into_iter()
        .filter_map(|name| {
            let name = name.as_ref();
            let stem = name.strip_suffix(".json").unwrap_or(name);
            ModuleVersion::parse(stem).ok()
        })
        .collect();

    versions.sort_by(|a, b| b.cmp(a));
    versions.dedup();
    versions
}

/// Pick the version to publish
///
/// A `latest` tag wins outright, even over a numerically higher version.
/// Without one the highest discovered version is used.
pub fn resolve_latest(
    key: &str,
    versions: &[ModuleVersion],
    tags: Option<&TagMap>,
) -> Result<ModuleVersion> {
    let highest = versions
        .first()
        .ok_or_else(|| RegistryError::NoVersions(key.to_string()))?;

    match tags.and_then(|t| t.get(LATEST_TAG)) {
        Some(tagged) => ModuleVersion::parse(tagged),
        None => Ok(highest.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ModuleVersion {
        ModuleVersion::parse(s).unwrap()
    }

    #[test]
    fn test_version_parsing() {
        let version = v("1.9.0-beta.2");
        assert_eq!((version.major, version.minor, version.patch), (1, 9, 0));
        assert_eq!(version.prerelease.as_deref(), Some("beta.2"));
        assert_eq!(version.to_string(), "1.9.0-beta.2");
        assert_eq!(version.file_name(), "1.9.0-beta.2.json");
    }

    #[test]
    fn test_invalid_versions_rejected() {
        let bad_versions = [
            "1.0", "v1.0.0", "1.0.0-", "1.0.0+build", "a.b.c", "", "1.0.0-βeta", "1.0.0-rc-1",
        ];
        for bad in bad_versions {
            assert!(ModuleVersion::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_version_ordering() {
        assert!(v("2.0.0") > v("1.9.9"));
        assert!(v("1.9.9") > v("1.9.0-beta"));
        assert!(v("1.9.0-beta") > v("1.0.0"));
        assert!(v("1.10.0") > v("1.9.0"));
    }

    #[test]
    fn test_release_above_prerelease_of_same_triple() {
        assert!(v("1.0.0") > v("1.0.0-rc.1"));
        assert!(v("1.0.0-rc") > v("1.0.0-beta"));
    }

    #[test]
    fn test_discover_versions_sorted_descending() {
        let names = [
            "metadata.json",
            "1.0.0.json",
            "tags.json",
            "1.9.0-beta.json",
            "2.0.0.json",
            "README.md",
            "1.9.9.json",
        ];
        let found: Vec<String> = discover_versions(names).iter().map(|v| v.to_string()).collect();
        assert_eq!(found, vec!["2.0.0", "1.9.9", "1.9.0-beta", "1.0.0"]);
    }

    #[test]
    fn test_discover_versions_drops_duplicates() {
        let found = discover_versions(["1.0.0.json", "1.0.0", "0.9.0.json"]);
        assert_eq!(found, vec![v("1.0.0"), v("0.9.0")]);
    }

    #[test]
    fn test_discover_versions_ascii_suffix_only() {
        let found = discover_versions(["1.0.0-βeta.json", "1.0.0-beta_2.json"]);
        assert_eq!(found, vec![v("1.0.0-beta_2")]);
    }

    #[test]
    fn test_latest_tag_overrides_highest() {
        let versions = discover_versions(["1.0.0.json", "1.2.0.json"]);
        let mut tags = TagMap::new();
        tags.insert("latest".to_string(), "1.0.0".to_string());

        let latest = resolve_latest("@alice/utils", &versions, Some(&tags)).unwrap();
        assert_eq!(latest, v("1.0.0"));
    }

    #[test]
    fn test_latest_defaults_to_highest() {
        let versions = discover_versions(["1.0.0.json", "1.2.0.json", "1.2.0-alpha.json"]);
        let latest = resolve_latest("@alice/utils", &versions, None).unwrap();
        assert_eq!(latest, v("1.2.0"));
    }

    #[test]
    fn test_no_versions_found() {
        let err = resolve_latest("@alice/utils", &[], None).unwrap_err();
        assert!(matches!(err, RegistryError::NoVersions(ref key) if key == "@alice/utils"));
    }
}

//! Kubernetes minor-version arithmetic
//!
//! Managed control planes accept versions as `major.minor` and only move
//! forward one minor at a time. Release versions look like
//! `1.16.8-20240101` and map back to their `major.minor`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use converge_common::{Error, Result};

/// A `major.minor` Kubernetes version
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinorVersion {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
}

impl MinorVersion {
    /// The next minor version; fails when the minor is already `u32::MAX`
    pub fn next(self) -> Result<Self> {
        let minor = self
            .minor
            .checked_add(1)
            .ok_or_else(|| Error::version(self.to_string(), "minor version has no successor"))?;
        Ok(Self {
            major: self.major,
            minor,
        })
    }

    /// Minor version a release version (`1.16.8-20240101`) belongs to
    pub fn from_release_version(raw: &str) -> Result<Self> {
        let (semver, date) = match raw.split('-').collect::<Vec<_>>().as_slice() {
            [semver, date] => (*semver, *date),
            _ => {
                return Err(Error::version(
                    raw,
                    "release version must look like major.minor.patch-date",
                ))
            }
        };
        if date.is_empty() {
            return Err(Error::version(raw, "release version is missing its date"));
        }
        match semver.split('.').collect::<Vec<_>>().as_slice() {
            [major, minor, patch] => {
                parse_component(raw, patch)?;
                Ok(Self {
                    major: parse_component(raw, major)?,
                    minor: parse_component(raw, minor)?,
                })
            }
            _ => Err(Error::version(
                raw,
                "release version must have major, minor and patch components",
            )),
        }
    }
}

impl FromStr for MinorVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [major, minor] => Ok(Self {
                major: parse_component(s, major)?,
                minor: parse_component(s, minor)?,
            }),
            _ => Err(Error::version(s, "expected major.minor")),
        }
    }
}

impl fmt::Display for MinorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn parse_component(raw: &str, component: &str) -> Result<u32> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::version(
            raw,
            format!("'{component}' is not a non-negative integer"),
        ));
    }
    component
        .parse()
        .map_err(|e| Error::version(raw, format!("'{component}': {e}")))
}

/// `"1.16"` becomes `"1.17"`
pub fn increment_minor(version: &str) -> Result<String> {
    Ok(version.parse::<MinorVersion>()?.next()?.to_string())
}

/// `"1.16.8-20240101"` becomes `"1.16"`
pub fn version_from_release_version(release_version: &str) -> Result<String> {
    Ok(MinorVersion::from_release_version(release_version)?.to_string())
}

/// Compare two `major.minor` versions
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering> {
    Ok(a.parse::<MinorVersion>()?.cmp(&b.parse::<MinorVersion>()?))
}

/// Where one remediation pass should take a version
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionStep {
    /// Observed already matches desired
    Reached,
    /// The next minor is the desired version
    Final(MinorVersion),
    /// One hop toward the desired version; later passes continue
    Intermediate(MinorVersion),
    /// Desired is older than observed; versions never go backwards
    Downgrade,
}

/// Single forward step from `observed` toward `desired`
pub fn next_step(observed: &str, desired: &str) -> Result<VersionStep> {
    step_between(observed.parse()?, desired.parse()?)
}

/// Same as [`next_step`] for already-parsed versions
///
/// Minor stepping never reaches a new major, so an upgrade across a major
/// boundary is an error rather than an endless walk.
pub fn step_between(observed: MinorVersion, desired: MinorVersion) -> Result<VersionStep> {
    match desired.cmp(&observed) {
        Ordering::Equal => Ok(VersionStep::Reached),
        Ordering::Less => Ok(VersionStep::Downgrade),
        Ordering::Greater if desired.major != observed.major => Err(Error::version(
            desired.to_string(),
            format!("cannot step from major version {} to {}", observed.major, desired.major),
        )),
        Ordering::Greater => {
            let next = observed.next()?;
            Ok(if next == desired {
                VersionStep::Final(desired)
            } else {
                VersionStep::Intermediate(next)
            })
        }
    }
}

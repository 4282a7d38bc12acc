use std::cmp::Ordering;
use std::str::FromStr;

use crate::messages::engine_error::VelaError;

/// Four part dotted version, compared component wise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Version { major, minor, patch, build }
    }

    fn components(&self) -> [u32; 4] {
        [self.major, self.minor, self.patch, self.build]
    }
}

impl FromStr for Version {
    type Err = VelaError;

    fn from_str(version_string: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = version_string.split('.').collect();
        if parts.len() != 4 {
            return Err(VelaError::Configuration(format!(
                "Invalid version string: {}",
                version_string
            )));
        }
        let mut numbers = [0u32; 4];
        for (index, part) in parts.iter().enumerate() {
            numbers[index] = part.parse::<u32>().map_err(|_| {
                VelaError::Configuration(format!("Invalid version component: {}", part))
            })?;
        }
        Ok(Version::new(numbers[0], numbers[1], numbers[2], numbers[3]))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

/// Compares two versions component wise. When `ignore_version_checks` is set
/// every comparison is forced equal, which disables version gating across the
/// engine without touching the call sites.
pub fn compare(a: &Version, b: &Version, ignore_version_checks: bool) -> Ordering {
    if ignore_version_checks {
        return Ordering::Equal;
    }
    a.components().cmp(&b.components())
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A software package that may be installed on a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
}

/// Severity rating reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Negligible,
    Low,
    Medium,
    High,
    Urgent,
    Critical,
}

/// One vulnerability affecting packages on a platform.
///
/// The job registry never looks inside these; it only collects and returns
/// them in the order the source produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub name: String, // CVE-2018-XXXX
    #[serde(rename = "affectedPackages")]
    pub affected_packages: Vec<Package>,
    #[serde(rename = "detectionLink")]
    pub detection_link: String,
    pub severity: Severity,
}

/// Operating system platforms vulnerabilities can be looked up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Debian8,
    Debian9,
    Ubuntu1604,
    Ubuntu1804,
    Alpine38,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Debian8,
        Platform::Debian9,
        Platform::Ubuntu1604,
        Platform::Ubuntu1804,
        Platform::Alpine38,
    ];

    /// Human-facing name accepted by the HTTP API, e.g. `"debian 8"`.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Debian8 => "debian 8",
            Platform::Debian9 => "debian 9",
            Platform::Ubuntu1604 => "ubuntu 16.04",
            Platform::Ubuntu1804 => "ubuntu 18.04",
            Platform::Alpine38 => "alpine 3.8",
        }
    }

    /// Namespace the scanner files this platform's vulnerabilities under.
    pub fn namespace(&self) -> &'static str {
        match self {
            Platform::Debian8 => "debian:8",
            Platform::Debian9 => "debian:9",
            Platform::Ubuntu1604 => "ubuntu:16.04",
            Platform::Ubuntu1804 => "ubuntu:18.04",
            Platform::Alpine38 => "alpine:v3.8",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no such platform '{0}'")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

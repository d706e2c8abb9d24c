// sprout-common/src/model/platform.rs
//! Explicit description of the host a package is installed on.
//!
//! Bottle matching and platform-conditional dependencies are evaluated
//! against a [`Platform`] value handed in by the caller; manifest records
//! never inspect the environment themselves.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::{Result, SproutError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    Macos,
    Linux,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Macos => f.write_str("macos"),
            OsFamily::Linux => f.write_str("linux"),
        }
    }
}

impl FromStr for OsFamily {
    type Err = SproutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "macos" | "mac" | "darwin" | "osx" => Ok(OsFamily::Macos),
            "linux" => Ok(OsFamily::Linux),
            other => Err(SproutError::ParseError(
                "platform",
                format!("unknown OS family '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Arm64,
    X86_64,
}

impl Arch {
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else {
            Arch::X86_64
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Arm64 => f.write_str("arm64"),
            Arch::X86_64 => f.write_str("x86_64"),
        }
    }
}

impl FromStr for Arch {
    type Err = SproutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "x86_64" | "amd64" | "intel" => Ok(Arch::X86_64),
            other => Err(SproutError::ParseError(
                "platform",
                format!("unknown architecture '{other}'"),
            )),
        }
    }
}

/// `major.minor` operating system version. Ordering is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
}

/// macOS release codenames, as used in bottle tags.
const MACOS_CODENAMES: &[(&str, OsVersion)] = &[
    ("snow_leopard", OsVersion::new(10, 6)),
    ("lion", OsVersion::new(10, 7)),
    ("mountain_lion", OsVersion::new(10, 8)),
    ("mavericks", OsVersion::new(10, 9)),
    ("yosemite", OsVersion::new(10, 10)),
    ("el_capitan", OsVersion::new(10, 11)),
    ("sierra", OsVersion::new(10, 12)),
    ("high_sierra", OsVersion::new(10, 13)),
    ("mojave", OsVersion::new(10, 14)),
    ("catalina", OsVersion::new(10, 15)),
    ("big_sur", OsVersion::new(11, 0)),
    ("monterey", OsVersion::new(12, 0)),
    ("ventura", OsVersion::new(13, 0)),
    ("sonoma", OsVersion::new(14, 0)),
    ("sequoia", OsVersion::new(15, 0)),
    ("tahoe", OsVersion::new(26, 0)),
];

impl OsVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Looks up a macOS codename such as `snow_leopard`.
    pub fn from_macos_codename(name: &str) -> Option<Self> {
        MACOS_CODENAMES
            .iter()
            .find(|(codename, _)| *codename == name)
            .map(|(_, version)| *version)
    }

    /// The codename of the macOS release this version belongs to. From Big
    /// Sur on only the major component names a release.
    pub fn macos_codename(&self) -> Option<&'static str> {
        MACOS_CODENAMES
            .iter()
            .find(|(_, v)| {
                if v.major >= 11 {
                    v.major == self.major
                } else {
                    v == self
                }
            })
            .map(|(codename, _)| *codename)
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for OsVersion {
    type Err = SproutError;

    /// Accepts `10.6`, `14`, `14.2.1` (patch ignored) or a macOS codename.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(v) = OsVersion::from_macos_codename(s) {
            return Ok(v);
        }
        let mut parts = s.trim().split('.');
        let parse = |p: Option<&str>| -> Result<u32> {
            match p {
                None | Some("") => Ok(0),
                Some(n) => n.parse::<u32>().map_err(|_| {
                    SproutError::ParseError("platform", format!("invalid OS version '{s}'"))
                }),
            }
        };
        let major = match parts.next() {
            Some(p) if !p.is_empty() => parse(Some(p))?,
            _ => {
                return Err(SproutError::ParseError(
                    "platform",
                    format!("invalid OS version '{s}'"),
                ))
            }
        };
        let minor = parse(parts.next())?;
        Ok(OsVersion::new(major, minor))
    }
}

impl Serialize for OsVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OsVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The running (or simulated) host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: OsFamily,
    pub version: OsVersion,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: OsFamily, version: OsVersion, arch: Arch) -> Self {
        Self { os, version, arch }
    }

    /// Bottle tag for this platform, e.g. `arm64_sonoma`, `mojave` or
    /// `x86_64_linux`.
    pub fn platform_id(&self) -> String {
        match self.os {
            OsFamily::Macos => {
                let codename = self
                    .version
                    .macos_codename()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("macos_{}", self.version.major));
                match self.arch {
                    Arch::Arm64 => format!("arm64_{codename}"),
                    Arch::X86_64 => codename,
                }
            }
            OsFamily::Linux => format!("{}_linux", self.arch),
        }
    }

    /// Describes the host this binary runs on.
    pub fn detect() -> Result<Self> {
        let arch = Arch::host();
        if cfg!(target_os = "macos") {
            let output = std::process::Command::new("sw_vers")
                .arg("-productVersion")
                .output()?;
            if !output.status.success() {
                return Err(SproutError::Generic(
                    "sw_vers -productVersion failed".to_string(),
                ));
            }
            let raw = String::from_utf8_lossy(&output.stdout);
            let version: OsVersion = raw.trim().parse()?;
            debug!("Detected macOS {} ({})", version, arch);
            Ok(Platform::new(OsFamily::Macos, version, arch))
        } else {
            debug!("Detected Linux ({})", arch);
            Ok(Platform::new(OsFamily::Linux, OsVersion::new(0, 0), arch))
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.os, self.version, self.arch)
    }
}

impl FromStr for Platform {
    type Err = SproutError;

    /// Parses either `os:version:arch` (`macos:10.6:x86_64`) or a bottle tag
    /// (`arm64_sonoma`, `snow_leopard`, `x86_64_linux`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains(':') {
            let parts: Vec<&str> = s.split(':').collect();
            if parts.len() != 3 {
                return Err(SproutError::ParseError(
                    "platform",
                    format!("expected os:version:arch, got '{s}'"),
                ));
            }
            return Ok(Platform::new(
                parts[0].parse()?,
                parts[1].parse()?,
                parts[2].parse()?,
            ));
        }

        if let Some(arch) = s.strip_suffix("_linux") {
            return Ok(Platform::new(
                OsFamily::Linux,
                OsVersion::new(0, 0),
                arch.parse()?,
            ));
        }

        let (arch, codename) = match s.strip_prefix("arm64_") {
            Some(rest) => (Arch::Arm64, rest),
            None => (Arch::X86_64, s),
        };
        let version = OsVersion::from_macos_codename(codename).ok_or_else(|| {
            SproutError::ParseError("platform", format!("unknown platform tag '{s}'"))
        })?;
        Ok(Platform::new(OsFamily::Macos, version, arch))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl VersionOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            VersionOp::Lt => ordering == Ordering::Less,
            VersionOp::Le => ordering != Ordering::Greater,
            VersionOp::Eq => ordering == Ordering::Equal,
            VersionOp::Ge => ordering != Ordering::Less,
            VersionOp::Gt => ordering == Ordering::Greater,
        }
    }
}

/// Pure predicate over a [`Platform`]: "os is `os` and its version compares
/// `op` against `version`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPredicate {
    pub os: OsFamily,
    pub op: VersionOp,
    pub version: OsVersion,
}

impl PlatformPredicate {
    pub fn holds(&self, platform: &Platform) -> bool {
        platform.os == self.os && self.op.accepts(platform.version.cmp(&self.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_ids() {
        let mojave = Platform::new(OsFamily::Macos, OsVersion::new(10, 14), Arch::X86_64);
        assert_eq!(mojave.platform_id(), "mojave");

        let sonoma = Platform::new(OsFamily::Macos, OsVersion::new(14, 4), Arch::Arm64);
        assert_eq!(sonoma.platform_id(), "arm64_sonoma");

        let linux = Platform::new(OsFamily::Linux, OsVersion::new(0, 0), Arch::X86_64);
        assert_eq!(linux.platform_id(), "x86_64_linux");
    }

    #[test]
    fn parses_tags_and_triples() {
        let p: Platform = "arm64_ventura".parse().unwrap();
        assert_eq!(p, Platform::new(OsFamily::Macos, OsVersion::new(13, 0), Arch::Arm64));

        let p: Platform = "macos:10.6.8:x86_64".parse().unwrap();
        assert_eq!(p.version, OsVersion::new(10, 6));
        assert_eq!(p.platform_id(), "snow_leopard");

        let p: Platform = "aarch64_linux".parse().unwrap();
        assert_eq!(p.os, OsFamily::Linux);
        assert_eq!(p.arch, Arch::Arm64);

        assert!("plan9".parse::<Platform>().is_err());
        assert!("macos:ten:x86_64".parse::<Platform>().is_err());
    }

    #[test]
    fn version_ordering_is_numeric() {
        let v10_6: OsVersion = "10.6".parse().unwrap();
        let v10_10: OsVersion = "10.10".parse().unwrap();
        assert!(v10_6 < v10_10);
        assert_eq!("snow_leopard".parse::<OsVersion>().unwrap(), v10_6);
    }

    #[test]
    fn predicate_snow_leopard_or_older() {
        let pred = PlatformPredicate {
            os: OsFamily::Macos,
            op: VersionOp::Le,
            version: OsVersion::new(10, 6),
        };
        let leopard = Platform::new(OsFamily::Macos, OsVersion::new(10, 5), Arch::X86_64);
        let snow = Platform::new(OsFamily::Macos, OsVersion::new(10, 6), Arch::X86_64);
        let lion = Platform::new(OsFamily::Macos, OsVersion::new(10, 7), Arch::X86_64);
        let linux = Platform::new(OsFamily::Linux, OsVersion::new(0, 0), Arch::X86_64);

        assert!(pred.holds(&leopard));
        assert!(pred.holds(&snow));
        assert!(!pred.holds(&lion));
        assert!(!pred.holds(&linux));
    }

    #[test]
    fn predicate_deserializes_from_codename() {
        let pred: PlatformPredicate =
            serde_json::from_str(r#"{"os":"macos","op":"<=","version":"snow_leopard"}"#).unwrap();
        assert_eq!(pred.version, OsVersion::new(10, 6));
        assert_eq!(pred.op, VersionOp::Le);
    }
}

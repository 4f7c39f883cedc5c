use super::{ByteReader, Deserialize, Serialize};
use crate::jvm::{Error, UnsupportedReason, UnsupportedVersion};
use byteorder::WriteBytesExt;
use std::cmp::Ordering;
use std::fmt;
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// Oldest class file version (JDK 1.0.2)
    pub const JAVA1: Version = Version::new(45, 0);

    /// First version with generics, annotations, enums
    pub const JAVA5: Version = Version::new(49, 0);

    /// First version where the type-checking verifier is used
    pub const JAVA6: Version = Version::new(50, 0);

    /// First version with `invokedynamic`
    pub const JAVA7: Version = Version::new(51, 0);

    /// JVM class file version corresponding to Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version::new(52, 0);

    /// First version with modules
    pub const JAVA9: Version = Version::new(53, 0);

    /// First version with `CONSTANT_Dynamic`
    pub const JAVA11: Version = Version::new(55, 0);

    /// First version where the minor version is restricted to 0 or the preview marker
    pub const JAVA12: Version = Version::new(56, 0);

    /// Version from which `ACC_STRICT` is unassigned
    pub const JAVA17: Version = Version::new(61, 0);

    pub const JAVA21: Version = Version::new(65, 0);

    /// Minor version marking a class that depends on preview features
    pub const PREVIEW_MINOR_VERSION: u16 = 0xFFFF;

    pub const fn new(major_version: u16, minor_version: u16) -> Version {
        Version {
            minor_version,
            major_version,
        }
    }

    pub fn is_preview(&self) -> bool {
        self.major_version >= Version::JAVA12.major_version
            && self.minor_version == Version::PREVIEW_MINOR_VERSION
    }

    /// Check that this version is within the supported window
    ///
    /// Supported versions are `45.0` up to (and including) `latest_major`. Starting with Java 12,
    /// the only valid minor versions are 0 and the preview marker, and preview class files are
    /// only accepted for the latest major version when `enable_preview` is set.
    pub fn check_supported(
        &self,
        latest_major: u16,
        enable_preview: bool,
    ) -> std::result::Result<(), UnsupportedVersion> {
        let unsupported = |reason| UnsupportedVersion {
            version: *self,
            latest: Version::new(latest_major, 0),
            reason,
        };

        if self.major_version < Version::JAVA1.major_version {
            return Err(unsupported(UnsupportedReason::TooOld));
        }
        if self.major_version > latest_major {
            return Err(unsupported(UnsupportedReason::TooNew));
        }
        if self.major_version >= Version::JAVA12.major_version && self.minor_version != 0 {
            if !self.is_preview() {
                return Err(unsupported(UnsupportedReason::BadMinorVersion));
            }
            if self.major_version != latest_major {
                return Err(unsupported(UnsupportedReason::PreviewNotLatest));
            }
            if !enable_preview {
                return Err(unsupported(UnsupportedReason::PreviewNotEnabled));
            }
            log::warn!("Accepting preview class file version {}", self);
        }
        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Major version takes precedence over minor version
impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major_version, self.minor_version).cmp(&(other.major_version, other.minor_version))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Version {
    fn deserialize(reader: &mut ByteReader<'_>) -> std::result::Result<Self, Error> {
        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        Ok(Version {
            minor_version,
            major_version,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const LATEST: u16 = 65;

    fn reason(version: Version, enable_preview: bool) -> Option<UnsupportedReason> {
        version
            .check_supported(LATEST, enable_preview)
            .err()
            .map(|err| err.reason)
    }

    #[test]
    fn ordering_is_major_first() {
        assert!(Version::new(52, 0) > Version::new(51, 3));
        assert!(Version::new(45, 3) > Version::new(45, 0));
        assert_eq!(Version::new(52, 0).to_string(), "52.0");
    }

    #[test]
    fn supported_window() {
        assert_eq!(reason(Version::new(45, 3), false), None);
        assert_eq!(reason(Version::new(51, 7), false), None);
        assert_eq!(reason(Version::JAVA21, false), None);
        assert_eq!(
            reason(Version::new(44, 0), false),
            Some(UnsupportedReason::TooOld)
        );
        assert_eq!(
            reason(Version::new(66, 0), false),
            Some(UnsupportedReason::TooNew)
        );
    }

    #[test]
    fn preview_versions() {
        assert_eq!(
            reason(Version::new(60, 3), false),
            Some(UnsupportedReason::BadMinorVersion)
        );
        assert_eq!(
            reason(Version::new(65, 0xFFFF), false),
            Some(UnsupportedReason::PreviewNotEnabled)
        );
        assert_eq!(reason(Version::new(65, 0xFFFF), true), None);
        assert_eq!(
            reason(Version::new(61, 0xFFFF), true),
            Some(UnsupportedReason::PreviewNotLatest)
        );
    }
}

//! TDS protocol version definitions.

use core::fmt;

/// TDS protocol version as carried in LOGIN7 and LOGINACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.1 (SQL Server 2000)
    pub const V7_1: Self = Self(0x71000000);

    /// TDS 7.2 (SQL Server 2005)
    pub const V7_2: Self = Self(0x72090002);

    /// TDS 7.3A (SQL Server 2008)
    pub const V7_3A: Self = Self(0x730A0003);

    /// TDS 7.3B (SQL Server 2008 R2)
    pub const V7_3B: Self = Self(0x730B0003);

    /// TDS 7.4 (SQL Server 2012+)
    pub const V7_4: Self = Self(0x74000004);

    /// Create a version from its raw wire value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether ALL_HEADERS must prefix SQL batch and RPC payloads.
    ///
    /// Required from TDS 7.2 onwards.
    #[must_use]
    pub const fn requires_all_headers(self) -> bool {
        self.0 >= Self::V7_2.0
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V7_1 => f.write_str("TDS 7.1"),
            Self::V7_2 => f.write_str("TDS 7.2"),
            Self::V7_3A => f.write_str("TDS 7.3A"),
            Self::V7_3B => f.write_str("TDS 7.3B"),
            Self::V7_4 => f.write_str("TDS 7.4"),
            Self(raw) => write!(f, "TDS 0x{raw:08X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(TdsVersion::V7_4 > TdsVersion::V7_3B);
        assert!(TdsVersion::V7_3B > TdsVersion::V7_3A);
        assert!(TdsVersion::V7_3A > TdsVersion::V7_2);
    }

    #[test]
    fn test_all_headers_requirement() {
        assert!(TdsVersion::V7_4.requires_all_headers());
        assert!(TdsVersion::V7_2.requires_all_headers());
        assert!(!TdsVersion::V7_1.requires_all_headers());
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V7_3A.to_string(), "TDS 7.3A");
        assert_eq!(TdsVersion::V7_4.to_string(), "TDS 7.4");
        assert_eq!(TdsVersion::new(0x7500_0000).to_string(), "TDS 0x75000000");
    }
}

//! Connection-related data models.
//!
//! This module defines the dialect enumeration and the helpers used to derive
//! it from a connection URL.

use serde::{Deserialize, Serialize};

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Embedded engines get a single connection and no pool sizing.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::SQLite)
    }

    /// Largest number of bind parameters one statement may carry.
    pub fn max_bind_params(&self) -> usize {
        match self {
            Self::PostgreSQL | Self::MySQL => 65_535,
            Self::SQLite => 32_766,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Server version, reduced to what capability checks compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse the leading `major.minor` of a dotted version string such as
    /// `3.45.1` or `8.0.36-0ubuntu0.22.04.1`.
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.trim().split(|c: char| !c.is_ascii_digit());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self::new(major, minor))
    }

    /// Decode PostgreSQL's `server_version_num` (e.g., `150004`, `90605`).
    pub fn from_postgres_num(num: i64) -> Option<Self> {
        if num <= 0 {
            return None;
        }
        let num = u32::try_from(num).ok()?;
        if num >= 100_000 {
            Some(Self::new(num / 10_000, num % 10_000))
        } else {
            Some(Self::new(num / 10_000, (num / 100) % 100))
        }
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Get a display-safe version of a connection string (password masked).
pub fn mask_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@') {
        let scheme_end = connection_string.find("://").map(|p| p + 3).unwrap_or(0);
        if let Some(colon_pos) = connection_string[scheme_end..at_pos].rfind(':') {
            let colon_pos = scheme_end + colon_pos;
            let prefix = &connection_string[..colon_pos + 1];
            let suffix = &connection_string[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    connection_string.to_string()
}

//! Service identifiers.
//!
//! A [`ServiceIdentifier`] names the remote endpoint, usually in reverse-DNS
//! form (`com.example.agent`). It is validated once, at client construction,
//! and never changes afterwards.

use std::fmt;
use std::str::FromStr;

use crate::error::{IpcError, Result};

/// Maximum identifier length in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 255;

/// Validated name of a remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentifier(String);

impl ServiceIdentifier {
    /// Parse and validate an identifier.
    ///
    /// Rules: non-empty, at most [`MAX_IDENTIFIER_LEN`] bytes, only ASCII
    /// letters, digits, `.`, `-` and `_`, no leading/trailing `.` and no
    /// empty label (`..`).
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(IpcError::InvalidIdentifier(
                "identifier must not be empty".to_string(),
            ));
        }

        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(IpcError::InvalidIdentifier(format!(
                "identifier is {} bytes, maximum {}",
                name.len(),
                MAX_IDENTIFIER_LEN
            )));
        }

        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(IpcError::InvalidIdentifier(format!(
                "invalid character {:?} in {:?}",
                c, name
            )));
        }

        if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return Err(IpcError::InvalidIdentifier(format!(
                "empty label in {:?}",
                name
            )));
        }

        Ok(Self(name.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ServiceIdentifier {
    type Err = IpcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

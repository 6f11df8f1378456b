//! Identity types for Spora
//!
//! Participants are addressed by handle (`user@pod`), relayable objects by
//! an author-assigned guid. Both are globally unique strings on the wire.

use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// Longest guid accepted from a remote pod
pub const MAX_GUID_LEN: usize = 255;

/// Shortest guid accepted from a remote pod
pub const MIN_GUID_LEN: usize = 16;

/// Participant handle - `user@pod.domain`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    /// Parse and normalize a handle (lowercased)
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim().to_ascii_lowercase();
        let mut parts = raw.split('@');
        let user = parts.next().unwrap_or_default();
        let pod = parts.next().unwrap_or_default();

        if user.is_empty() || pod.is_empty() || parts.next().is_some() {
            return Err(ValidationError::InvalidHandle(raw));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidHandle(raw));
        }

        Ok(Handle(raw))
    }

    /// Local part of the handle
    pub fn user(&self) -> &str {
        self.0.split('@').next().unwrap_or_default()
    }

    /// Home pod of this participant
    pub fn pod(&self) -> &str {
        self.0.rsplit('@').next().unwrap_or_default()
    }

    /// Is this participant hosted on the given pod?
    #[inline]
    pub fn is_hosted_on(&self, pod: &str) -> bool {
        self.pod().eq_ignore_ascii_case(pod)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Handle {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Handle::parse(s)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique, author-assigned object identity
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(String);

impl Guid {
    /// Generate a fresh guid (32 lowercase hex chars)
    pub fn generate() -> Self {
        Guid(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Parse a guid chosen by some other pod
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let valid_len = (MIN_GUID_LEN..=MAX_GUID_LEN).contains(&raw.len());
        let valid_chars = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid_len && valid_chars {
            Ok(Guid(raw.to_string()))
        } else {
            Err(ValidationError::InvalidGuid(raw.to_string()))
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Guid {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guid::parse(s)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

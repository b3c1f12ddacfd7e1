//! Core proof types for validated content.
//!
//! These types enforce invariants at construction time. Once you hold a value,
//! you know it satisfies all required constraints.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Text that is never empty (or whitespace-only) after trimming.
///
/// Statements and proofs extracted from reasoning-service output are wrapped
/// in this type, so an accepted lemma can never carry a blank claim.
///
/// # Serde
///
/// Serializes as a plain JSON string. Deserialization validates non-emptiness
/// and fails if the string is empty or whitespace-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyString(String);

#[derive(Debug, Error)]
#[error("text must not be empty")]
pub struct EmptyStringError;

impl NonEmptyString {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyStringError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyStringError)
        } else {
            Ok(Self(value))
        }
    }

    /// Build from text with surrounding whitespace removed.
    pub fn trimmed(value: &str) -> Result<Self, EmptyStringError> {
        Self::new(value.trim())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NonEmptyString {
    type Error = EmptyStringError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl std::ops::Deref for NonEmptyString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for NonEmptyString {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_whitespace_only() {
        assert!(NonEmptyString::new("   \n\t").is_err());
        assert!(NonEmptyString::new("").is_err());
    }

    #[test]
    fn trimmed_strips_surrounding_whitespace() {
        let s = NonEmptyString::trimmed("\n  x > 0  \n").unwrap();
        assert_eq!(s.as_str(), "x > 0");
    }

    #[test]
    fn deserialization_validates() {
        let ok: Result<NonEmptyString, _> = serde_json::from_str("\"a\"");
        assert!(ok.is_ok());
        let err: Result<NonEmptyString, _> = serde_json::from_str("\"  \"");
        assert!(err.is_err());
    }
}

//! Session identifiers.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use thiserror::Error;

const MAX_SESSION_ID_LEN: usize = 128;

/// Longest single file name common filesystems accept.
pub(crate) const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("Session id cannot be empty")]
    Empty,

    #[error("Session id is too long ({0} bytes)")]
    TooLong(usize),

    #[error("Invalid session id: {0}")]
    Invalid(String),
}

/// Opaque, client-supplied session identifier.
///
/// The id doubles as a directory name under the jobs root, so construction
/// only succeeds for a single normal path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, SessionIdError> {
        let raw = raw.into();
        validate_path_component(&raw, MAX_SESSION_ID_LEN)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SessionId::parse(raw).map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionId::parse(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reject empty or overlong names, separators and anything that is not a
/// single `Component::Normal`.
pub(crate) fn validate_path_component(
    component: &str,
    max_len: usize,
) -> Result<(), SessionIdError> {
    if component.is_empty() {
        return Err(SessionIdError::Empty);
    }
    if component.len() > max_len {
        return Err(SessionIdError::TooLong(component.len()));
    }
    if component.contains(['/', '\\', '\0']) {
        return Err(SessionIdError::Invalid(component.to_string()));
    }

    let mut components = Path::new(component).components();
    match components.next() {
        Some(Component::Normal(_)) if components.next().is_none() => Ok(()),
        _ => Err(SessionIdError::Invalid(component.to_string())),
    }
}

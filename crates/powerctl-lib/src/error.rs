//! Unified error type for the powerctl-lib crate.
//!
//! [`PowerctlError`] wraps control failures (`ApplyError`) and I/O errors, and
//! adds the engine's own kinds (`Config`, `Store`, `InvalidValue`,
//! `UnknownSetting`). `From` impls let `?` cross module boundaries.

use std::fmt;

use crate::control::ApplyError;

#[derive(Debug)]
pub enum PowerctlError {
    /// A control failed to apply a value.
    Apply(ApplyError),
    /// Standard I/O error (profile files, config persistence).
    Io(std::io::Error),
    /// Configuration validation error.
    Config(String),
    /// Profile store error (unreadable or unparsable profile).
    Store(String),
    /// A value outside the setting's legal value set.
    InvalidValue { setting: String, value: String },
    /// No setting with this name.
    UnknownSetting(String),
}

impl fmt::Display for PowerctlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerctlError::Apply(e) => write!(f, "{e}"),
            PowerctlError::Io(e) => write!(f, "I/O error: {e}"),
            PowerctlError::Config(e) => write!(f, "Config error: {e}"),
            PowerctlError::Store(e) => write!(f, "Profile store error: {e}"),
            PowerctlError::InvalidValue { setting, value } => {
                write!(f, "Invalid value for {setting}: {value}")
            }
            PowerctlError::UnknownSetting(name) => write!(f, "Unknown setting: {name}"),
        }
    }
}

impl std::error::Error for PowerctlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PowerctlError::Apply(e) => Some(e),
            PowerctlError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ApplyError> for PowerctlError {
    fn from(e: ApplyError) -> Self {
        PowerctlError::Apply(e)
    }
}

impl From<std::io::Error> for PowerctlError {
    fn from(e: std::io::Error) -> Self {
        PowerctlError::Io(e)
    }
}

/// Crate-level Result alias using [`PowerctlError`].
pub type Result<T> = std::result::Result<T, PowerctlError>;

//! Bootstrap error types.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Step of the identity transition that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeStep {
    SetGroups,
    SetGid,
    SetUid,
    ChangeDir,
    /// Read-back of real and effective ids after the transition.
    Verify,
}

impl fmt::Display for PrivilegeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SetGroups => "setgroups",
            Self::SetGid => "setgid",
            Self::SetUid => "setuid",
            Self::ChangeDir => "chdir",
            Self::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Errors that abort the bootstrap.
///
/// Every variant is fatal. Process-table query failures never show up here:
/// the session probe reports them as data and the orchestrator folds them
/// into "no session".
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid username {0:?}")]
    InvalidUsername(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The identity database could not be read or returned a malformed record.
    #[error("identity lookup failed: {0}")]
    IdentityLookup(String),

    #[error("failed to transfer ownership of {} to {uid}:{gid}", path.display())]
    OwnershipTransfer {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: io::Error,
    },

    /// Irreversible: earlier steps of the transition may already have applied
    /// and cannot be undone without the privileges they gave up.
    #[error("privilege drop failed at {step}")]
    PrivilegeDrop {
        step: PrivilegeStep,
        #[source]
        source: io::Error,
    },

    #[error("scratch directory {} unusable", path.display())]
    ScratchDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to launch {program}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for BootstrapError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

//! Contains the reasons an authentication or resolution attempt can fail.

use crate::BoxError;
use derive_more::Display;
use thiserror::Error;

/// Why an attempt was rejected.
///
/// These are internal reasons. Callers of the PAM entry point only ever see the coarse
/// [`PamStatus`](crate::PamStatus) derived from them.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Hash)]
pub enum RejectReason {
    /// The username failed validation.
    #[display("invalid username")]
    InvalidUsername,
    /// A constructed path exceeds the path buffer.
    #[display("path too long")]
    PathTooLong,
    /// A path could not be canonicalized.
    #[display("path resolution failed")]
    PathResolutionFailed,
    /// The resolved home is not a readable directory.
    #[display("not a directory")]
    NotADirectory,
    /// The alternative login mode matched but has password login disabled.
    #[display("alternative login mode disabled")]
    AltModeDisabled,
    /// The alternative login mode matched but the secret is wrong.
    #[display("alternative login secret mismatch")]
    AltModeMismatch,
    /// The secret violates the password policy.
    #[display("password policy violation")]
    PolicyViolation,
    /// No usable password digest file exists.
    #[display("digest file missing")]
    DigestFileMissing,
    /// The password digest file could not be parsed.
    #[display("digest file malformed")]
    DigestFileMalformed,
    /// The secret does not match the stored digest.
    #[display("digest mismatch")]
    DigestMismatch,
    /// A required external collaborator did not answer.
    #[display("external collaborator unavailable")]
    ExternalCollaboratorUnavailable,
    /// The caller supplied buffer cannot hold the result. Retry with a larger one.
    #[display("buffer too small")]
    TransientBufferExhaustion,
    /// The rate limiter refused the attempt.
    #[display("rate limit exceeded")]
    RateLimited,
    /// The account is currently not allowed to log in.
    #[display("account inaccessible")]
    AccountInaccessible,
    /// The username is valid but does not resolve to an account.
    #[display("unknown user")]
    UnknownUser,
    /// The audit collaborator refused an otherwise successful attempt.
    #[display("not authorized")]
    NotAuthorized,
    /// No secret could be obtained from the caller.
    #[display("conversation failed")]
    ConversationFailed,
    /// The local configuration is broken.
    #[display("bad configuration")]
    BadConfiguration,
}

impl std::error::Error for RejectReason {}

impl RejectReason {
    /// True for failures that may succeed when retried by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, RejectReason::TransientBufferExhaustion)
    }
}

/// Error returned when local configuration, such as the base account file, cannot be used.
#[derive(Error, Debug)]
#[error("configuration error: {msg}")]
pub struct ConfigError {
    msg: String,
    #[source]
    source: Option<BoxError>,
}

impl ConfigError {
    pub(crate) fn new(msg: impl Into<String>) -> Self {
        ConfigError {
            msg: msg.into(),
            source: None,
        }
    }

    pub(crate) fn with_source<E>(msg: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        ConfigError {
            msg: msg.into(),
            source: Some(source.into()),
        }
    }
}

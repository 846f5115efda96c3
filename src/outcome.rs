//! The result of an authentication or resolution attempt and its mapping to PAM status codes.

use crate::error::RejectReason;
use migauth_core::audit::LoginMode;
use std::path::PathBuf;

/// What the engine decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Access granted.
    Success {
        /// The resolved home directory.
        home: PathBuf,
        /// Uid to run as.
        uid: u32,
        /// Gid to run as.
        gid: u32,
        /// How the user was matched.
        mode: LoginMode,
    },
    /// Access denied.
    Reject {
        /// Why. Never shown to the remote party.
        reason: RejectReason,
    },
    /// No decision. The caller may retry.
    TransientError {
        /// Why.
        reason: RejectReason,
    },
}

impl AuthOutcome {
    /// A rejection, or a transient error if `reason` is retryable.
    pub fn rejected(reason: RejectReason) -> Self {
        if reason.is_transient() {
            AuthOutcome::TransientError { reason }
        } else {
            AuthOutcome::Reject { reason }
        }
    }

    /// True if access was granted.
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success { .. })
    }

    /// The reason of a non-successful outcome.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            AuthOutcome::Success { .. } => None,
            AuthOutcome::Reject { reason } | AuthOutcome::TransientError { reason } => Some(*reason),
        }
    }
}

/// The status code returned from the PAM entry point.
///
/// Deliberately coarse: the remote party learns whether it got in but not why it did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PamStatus {
    /// `PAM_SUCCESS`
    Success,
    /// `PAM_AUTH_ERR`
    AuthError,
    /// `PAM_CONV_ERR`
    ConversationError,
    /// `PAM_TRY_AGAIN`
    Retry,
}

impl From<&AuthOutcome> for PamStatus {
    fn from(outcome: &AuthOutcome) -> Self {
        match outcome {
            AuthOutcome::Success { .. } => PamStatus::Success,
            AuthOutcome::Reject {
                reason: RejectReason::ConversationFailed,
            } => PamStatus::ConversationError,
            AuthOutcome::Reject { .. } => PamStatus::AuthError,
            AuthOutcome::TransientError { .. } => PamStatus::Retry,
        }
    }
}

/// The status code returned from the NSS entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NssStatus {
    /// `NSS_STATUS_SUCCESS`
    Success,
    /// `NSS_STATUS_NOTFOUND`
    NotFound,
    /// `NSS_STATUS_TRYAGAIN`, retry with a larger buffer.
    TryAgain,
}

impl<T> From<&Result<T, RejectReason>> for NssStatus {
    fn from(result: &Result<T, RejectReason>) -> Self {
        match result {
            Ok(_) => NssStatus::Success,
            Err(reason) if reason.is_transient() => NssStatus::TryAgain,
            Err(_) => NssStatus::NotFound,
        }
    }
}

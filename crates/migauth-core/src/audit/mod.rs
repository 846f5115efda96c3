//! The service provider interface for the external audit and rate-limit collaborator.
//!
//! Every login attempt that reaches a decision is reported through [`AuditCollaborator`]. The
//! collaborator also answers the rate-limit and account-accessibility questions asked before any
//! secret is looked at.

mod error;

pub use error::{CollaboratorError, ErrorKind};

use crate::secret::Secret;
use bitflags::bitflags;
use derive_more::Display;
use std::fmt::Debug;
use std::net::IpAddr;

bitflags! {
    /// The facts recorded about a single login attempt.
    ///
    /// The bit values are shared with the audit service and must not change.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttemptFlags: u32 {
        /// The presented username failed validation.
        const INVALID_USERNAME = 0x0001;
        /// The username is valid but no such account resolves.
        const INVALID_USER = 0x0002;
        /// The two-factor check does not apply to this attempt.
        const SKIP_TWOFA_CHECK = 0x0004;
        /// A valid two-factor session exists.
        const VALID_TWOFA = 0x0008;
        /// Password login is disabled for the account or login mode.
        const AUTHTYPE_DISABLED = 0x0010;
        /// Password login is enabled for the account or login mode.
        const AUTHTYPE_ENABLED = 0x0020;
        /// The presented secret was rejected.
        const INVALID_AUTH = 0x0040;
        /// The presented secret was accepted.
        const VALID_AUTH = 0x0080;
        /// The attempt hit the rate limit.
        const EXCEEDED_RATE_LIMIT = 0x0100;
        /// The account has too many open sessions.
        const EXCEEDED_MAX_SESSIONS = 0x0200;
        /// Abuse detected for this user.
        const USER_ABUSE_HITS = 0x0400;
        /// Abuse detected for this protocol.
        const PROTO_ABUSE_HITS = 0x0800;
        /// The same secret was tried too often.
        const MAX_SECRET_HITS = 0x1000;
        /// Do not notify the account owner about this attempt.
        const SKIP_NOTIFY = 0x2000;
        /// The attempt used password authentication.
        const AUTHTYPE_PASSWORD = 0x4000;
        /// The account exists but is currently not accessible.
        const ACCOUNT_INACCESSIBLE = 0x8000;
    }
}

/// The way a login attempt was matched.
///
/// The ordering is the matching precedence: alternative modes are tried from the smallest to the
/// largest and [`Standard`](LoginMode::Standard) is the fallback.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoginMode {
    /// A share-link identifier used as username.
    #[display("sharelink")]
    ShareLink,
    /// A job session mount identifier used as username.
    #[display("jobsidmount")]
    JobSessionMount,
    /// A notebook session mount identifier used as username.
    #[display("jupytersidmount")]
    NotebookSessionMount,
    /// A regular account with a password digest.
    #[display("standard")]
    Standard,
}

/// What gets reported to the collaborator after a login decision.
///
/// Never carries the raw secret, only its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    /// The validated username, or a fixed placeholder if validation failed.
    pub username: String,
    /// The remote address, if known.
    pub address: Option<IpAddr>,
    /// Hex md5 over the base64 secret. `None` if no secret was obtained yet.
    pub secret_digest: Option<String>,
    /// The login mode the attempt was matched against. `None` before matching.
    pub mode: Option<LoginMode>,
    /// What was decided.
    pub flags: AttemptFlags,
    /// Why the attempt was rejected. `None` on success.
    pub reason: Option<String>,
}

impl AttemptReport {
    /// True unless the username was invalid or no such user exists.
    pub fn valid_username(&self) -> bool {
        !self.flags.intersects(AttemptFlags::INVALID_USERNAME | AttemptFlags::INVALID_USER)
    }

    /// True if the presented secret was accepted.
    pub fn valid_auth(&self) -> bool {
        self.flags.contains(AttemptFlags::VALID_AUTH)
    }
}

/// The external collaborator consulted during PAM authentication.
///
/// Implementations are called synchronously from the authentication thread and must bound the
/// time they take. An `Err` means "no answer", not "no".
pub trait AuditCollaborator: Send + Sync + Debug {
    /// Records the attempt. On a success path a returned `false` turns the success into a
    /// rejection.
    fn report_attempt(&self, report: &AttemptReport) -> Result<bool, CollaboratorError>;

    /// Registers the attempt with the rate limiter and tells whether it exceeded the limit.
    fn hit_rate_limit(&self, username: &str, address: Option<IpAddr>) -> Result<bool, CollaboratorError>;

    /// Tells whether the account may log in at all right now.
    fn check_account_accessible(&self, username: &str) -> Result<bool, CollaboratorError>;

    /// Drops expired rate-limit entries and returns how many were removed.
    fn expire_rate_limit(&self) -> Result<usize, CollaboratorError> {
        Ok(0)
    }

    /// An extra, site specific username check on top of the local pattern.
    fn validate_username(&self, _username: &str) -> Result<bool, CollaboratorError> {
        Ok(true)
    }

    /// A site specific password policy. Returning [`ErrorKind::Unavailable`] makes the caller
    /// fall back to the static policy.
    fn validate_password(&self, _secret: &Secret) -> Result<bool, CollaboratorError> {
        Err(ErrorKind::Unavailable.into())
    }

    /// Tells whether a valid two-factor session exists for the user and address.
    fn check_twofactor_session(&self, _username: &str, _address: Option<IpAddr>) -> Result<bool, CollaboratorError> {
        Ok(false)
    }

    /// The name of the collaborator, used in log lines.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn flag_values_are_stable() {
        assert_eq!(0x0001, AttemptFlags::INVALID_USERNAME.bits());
        assert_eq!(0x0080, AttemptFlags::VALID_AUTH.bits());
        assert_eq!(0x2000, AttemptFlags::SKIP_NOTIFY.bits());
        assert_eq!(0x8000, AttemptFlags::ACCOUNT_INACCESSIBLE.bits());
        assert_eq!(0xffff, AttemptFlags::all().bits());
    }

    #[test]
    fn login_modes_order_by_precedence() {
        let mut modes = vec![
            LoginMode::Standard,
            LoginMode::NotebookSessionMount,
            LoginMode::ShareLink,
            LoginMode::JobSessionMount,
        ];
        modes.sort();
        assert_eq!(
            vec![
                LoginMode::ShareLink,
                LoginMode::JobSessionMount,
                LoginMode::NotebookSessionMount,
                LoginMode::Standard
            ],
            modes
        );
    }

    #[test]
    fn report_derives_username_and_auth_validity() {
        let mut report = AttemptReport {
            username: String::from("_UNSAFE_"),
            address: None,
            secret_digest: None,
            mode: None,
            flags: AttemptFlags::INVALID_USERNAME | AttemptFlags::AUTHTYPE_PASSWORD,
            reason: Some(String::from("invalid username")),
        };
        assert!(!report.valid_username());
        assert!(!report.valid_auth());

        report.flags = AttemptFlags::AUTHTYPE_ENABLED | AttemptFlags::VALID_AUTH;
        assert!(report.valid_username());
        assert!(report.valid_auth());
    }

    #[test]
    fn error_kind_is_kept() {
        let err = CollaboratorError::from(ErrorKind::TimedOut);
        assert_eq!(ErrorKind::TimedOut, err.kind());
        assert_eq!("collaborator error: collaborator timed out", err.to_string());
    }
}

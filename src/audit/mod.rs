//! Audit and rate-limit collaborators.
//!
//! The trait itself lives in `migauth-core` so that adapters such as `migauth-audit-rest` can be
//! built without this crate. Two local implementations are provided here: [`NopCollaborator`],
//! the default, and [`FailedLoginsCollaborator`], an in-process rate limiter.

mod failed_logins;
mod nop;

pub use failed_logins::{FailedLoginsBlock, FailedLoginsCollaborator, FailedLoginsPolicy, LockState};
pub use migauth_core::audit::{AttemptFlags, AttemptReport, AuditCollaborator, CollaboratorError, ErrorKind, LoginMode};
pub use nop::NopCollaborator;

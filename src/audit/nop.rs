use migauth_core::audit::{AttemptReport, AuditCollaborator, CollaboratorError};
use std::net::IpAddr;

/// A collaborator that allows everything and records nothing. Used as the default Null Object in
/// [`PamAuthenticator`](crate::PamAuthenticator).
#[derive(Debug, Default, Clone, Copy)]
pub struct NopCollaborator;

impl AuditCollaborator for NopCollaborator {
    fn report_attempt(&self, _: &AttemptReport) -> Result<bool, CollaboratorError> {
        Ok(true)
    }

    fn hit_rate_limit(&self, _: &str, _: Option<IpAddr>) -> Result<bool, CollaboratorError> {
        Ok(false)
    }

    fn check_account_accessible(&self, _: &str) -> Result<bool, CollaboratorError> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "nop"
    }
}

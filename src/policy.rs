//! Password policy for standard logins.

use crate::options::PasswordPolicy;
use migauth_core::audit::{AuditCollaborator, ErrorKind};
use migauth_core::secret::Secret;
use thiserror::Error;

/// Why a secret was refused by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    /// Longer than the maximum.
    #[error("password too long")]
    TooLong,
    /// Contains a quote character.
    #[error("password contains a quote character")]
    ForbiddenQuote,
    /// Shorter than the minimum.
    #[error("password too short")]
    TooShort,
    /// Not enough distinct character classes.
    #[error("password has {found} character classes, {required} required")]
    TooFewClasses {
        /// Classes present.
        found: usize,
        /// Classes required.
        required: usize,
    },
    /// The collaborator policy said no.
    #[error("password rejected by site policy")]
    RejectedByCollaborator,
}

/// Counts lowercase, uppercase, digit and other characters present in `bytes`.
pub fn character_classes(bytes: &[u8]) -> usize {
    let (mut lower, mut upper, mut digit, mut other) = (false, false, false, false);
    for b in bytes {
        match b {
            b'a'..=b'z' => lower = true,
            b'A'..=b'Z' => upper = true,
            b'0'..=b'9' => digit = true,
            _ => other = true,
        }
    }
    [lower, upper, digit, other].into_iter().filter(|present| *present).count()
}

/// The checks that apply regardless of any collaborator.
pub fn check_static(secret: &Secret, policy: &PasswordPolicy) -> Result<(), PolicyViolation> {
    if secret.len() < policy.min_length {
        return Err(PolicyViolation::TooShort);
    }
    let found = character_classes(secret.as_bytes());
    if found < policy.min_classes {
        return Err(PolicyViolation::TooFewClasses {
            found,
            required: policy.min_classes,
        });
    }
    Ok(())
}

/// Checks `secret` for a standard login.
///
/// The length cap and the quote ban always apply first. After that the collaborator's policy is
/// consulted. Only when it is unavailable does the static policy decide.
pub fn check(
    secret: &Secret,
    policy: &PasswordPolicy,
    collaborator: &dyn AuditCollaborator,
    logger: &slog::Logger,
) -> Result<(), PolicyViolation> {
    if secret.len() > policy.max_length {
        return Err(PolicyViolation::TooLong);
    }
    if secret.as_bytes().iter().any(|b| matches!(b, b'\'' | b'"')) {
        return Err(PolicyViolation::ForbiddenQuote);
    }
    match collaborator.validate_password(secret) {
        Ok(true) => Ok(()),
        Ok(false) => Err(PolicyViolation::RejectedByCollaborator),
        Err(err) => {
            if err.kind() != ErrorKind::Unavailable {
                slog::warn!(logger, "Password policy collaborator failed, using static policy"; "collaborator" => collaborator.name(), "error" => %err);
            }
            check_static(secret, policy)
        }
    }
}

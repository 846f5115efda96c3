//! Username validation.

use crate::error::RejectReason;
use crate::options::UsernamePolicy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Substrings that are never allowed in a username, whatever the configured pattern says.
const TRAVERSAL_SEQUENCES: [&str; 4] = ["..", "/", ":", "\0"];

/// A username that passed [`validate`]. Safe to use as a path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidIdentity {
    name: String,
}

impl ValidIdentity {
    /// The validated name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ValidIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<str> for ValidIdentity {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// Why a username was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentityRejection {
    /// Shorter than the configured minimum.
    #[error("username too short")]
    TooShort,
    /// Longer than the configured maximum.
    #[error("username too long")]
    TooLong,
    /// The configured pattern is not anchored with `^` and `$`.
    #[error("username pattern is not anchored")]
    BadPatternConfig,
    /// The configured pattern does not compile.
    #[error("username pattern does not compile")]
    BadPatternSyntax,
    /// The name does not match the pattern.
    #[error("username does not match pattern")]
    PatternMismatch,
    /// The name contains a path traversal sequence.
    #[error("username contains a path traversal sequence")]
    TraversalSequence,
}

impl IdentityRejection {
    /// True when the local configuration, not the presented name, is at fault.
    pub fn is_config_error(&self) -> bool {
        matches!(self, IdentityRejection::BadPatternConfig | IdentityRejection::BadPatternSyntax)
    }
}

impl From<IdentityRejection> for RejectReason {
    fn from(rejection: IdentityRejection) -> Self {
        if rejection.is_config_error() {
            RejectReason::BadConfiguration
        } else {
            RejectReason::InvalidUsername
        }
    }
}

/// Checks a presented username against the policy.
///
/// The length bounds are checked before the pattern is even looked at.
pub fn validate(name: &str, policy: &UsernamePolicy) -> Result<ValidIdentity, IdentityRejection> {
    if name.len() < policy.min_length {
        return Err(IdentityRejection::TooShort);
    }
    if name.len() > policy.max_length {
        return Err(IdentityRejection::TooLong);
    }
    let pattern = policy.pattern.as_str();
    if pattern.len() < 2 || !pattern.starts_with('^') || !pattern.ends_with('$') {
        return Err(IdentityRejection::BadPatternConfig);
    }
    // Alternation may leave one branch unanchored, so the whole name has to match.
    let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|_| IdentityRejection::BadPatternSyntax)?;
    if !regex.is_match(name) {
        return Err(IdentityRejection::PatternMismatch);
    }
    if TRAVERSAL_SEQUENCES.iter().any(|seq| name.contains(seq)) {
        return Err(IdentityRejection::TraversalSequence);
    }
    Ok(ValidIdentity { name: name.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy(pattern: &str) -> UsernamePolicy {
        UsernamePolicy {
            pattern: pattern.to_string(),
            ..UsernamePolicy::default()
        }
    }

    #[test]
    fn alternation_cannot_leave_a_branch_unanchored() {
        let policy = policy("^[a-z]+|[0-9]+$");
        assert_eq!(Err(IdentityRejection::PatternMismatch), validate("abc;rm -rf x", &policy));
        assert_eq!(Err(IdentityRejection::PatternMismatch), validate("x;123", &policy));
        assert!(validate("abc", &policy).is_ok());
        assert!(validate("123", &policy).is_ok());
    }

    #[test]
    fn accepts_default_names() {
        let identity = validate("alice", &UsernamePolicy::default()).unwrap();
        assert_eq!("alice", identity.name());
        assert!(validate("ab", &UsernamePolicy::default()).is_ok());
        assert!(validate("0-user_x", &UsernamePolicy::default()).is_ok());
    }

    #[test]
    fn length_bounds_apply_before_pattern() {
        let loose = policy("^.*$");
        assert_eq!(Err(IdentityRejection::TooShort), validate("a", &loose));
        assert_eq!(Err(IdentityRejection::TooLong), validate(&"a".repeat(129), &loose));
        // A broken pattern is not even consulted for out of bounds names.
        assert_eq!(Err(IdentityRejection::TooShort), validate("a", &policy("[")));
    }

    #[test]
    fn single_character_is_too_short() {
        let policy = UsernamePolicy {
            pattern: "^[a-z0-9][a-z0-9_-]{1,127}$".to_string(),
            min_length: 2,
            max_length: 128,
        };
        assert_eq!(Err(IdentityRejection::TooShort), validate("x", &policy));
        assert_eq!(RejectReason::InvalidUsername, RejectReason::from(IdentityRejection::TooShort));
        assert_eq!("ab", validate("ab", &policy).unwrap().to_string());
    }

    #[test]
    fn unanchored_pattern_is_a_config_error() {
        for pattern in ["[a-z]+", "^[a-z]+", "[a-z]+$", "^", "$"] {
            let rejection = validate("alice", &policy(pattern)).unwrap_err();
            assert_eq!(IdentityRejection::BadPatternConfig, rejection, "pattern {}", pattern);
            assert!(rejection.is_config_error());
        }
    }

    #[test]
    fn broken_pattern_is_a_config_error() {
        assert_eq!(Err(IdentityRejection::BadPatternSyntax), validate("alice", &policy("^[a-z$")));
        assert_eq!(RejectReason::BadConfiguration, RejectReason::from(IdentityRejection::BadPatternSyntax));
    }

    #[test]
    fn mismatches_are_rejected() {
        let default = UsernamePolicy::default();
        assert_eq!(Err(IdentityRejection::PatternMismatch), validate("Alice", &default));
        assert_eq!(Err(IdentityRejection::PatternMismatch), validate("_alice", &default));
        assert_eq!(Err(IdentityRejection::PatternMismatch), validate("alice\n", &default));
        assert_eq!(Err(IdentityRejection::PatternMismatch), validate("../etc", &default));
    }

    #[test]
    fn traversal_is_rejected_even_with_a_loose_pattern() {
        let loose = policy("^.*$");
        assert_eq!(Err(IdentityRejection::TraversalSequence), validate("a/b", &loose));
        assert_eq!(Err(IdentityRejection::TraversalSequence), validate("a..b", &loose));
        assert_eq!(Err(IdentityRejection::TraversalSequence), validate("a:b", &loose));
        assert_eq!(Err(IdentityRejection::TraversalSequence), validate("..", &loose));
        assert_eq!(RejectReason::InvalidUsername, RejectReason::from(IdentityRejection::TraversalSequence));
    }
}

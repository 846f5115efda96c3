use dashmap::DashMap;
use migauth_core::audit::{AttemptReport, AuditCollaborator, CollaboratorError};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// What failed logins are counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedLoginsBlock {
    /// The combination of username and address. Other users on the same address can still log in.
    #[default]
    UserAndIP,
    /// The address. Any user from that address gets blocked.
    IP,
    /// The username. The user gets blocked from any address.
    User,
}

/// When to start refusing attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLoginsPolicy {
    /// Failures after which further attempts are refused.
    pub max_attempts: u32,
    /// How long a failure is remembered after the last attempt.
    pub expires_after: Duration,
    /// What failures are counted against.
    pub block_by: FailedLoginsBlock,
}

impl Default for FailedLoginsPolicy {
    fn default() -> Self {
        FailedLoginsPolicy {
            max_attempts: 3,
            expires_after: Duration::from_secs(5 * 60),
            block_by: FailedLoginsBlock::default(),
        }
    }
}

#[derive(Hash, Eq, PartialEq, Debug, Clone)]
struct FailedLoginsKey {
    ip: Option<IpAddr>,
    username: Option<String>,
}

#[derive(Debug, Clone)]
struct FailedLoginsEntry {
    attempts: u32,
    last_attempt_at: Instant,
}

impl FailedLoginsEntry {
    fn time_elapsed(&self) -> Duration {
        self.last_attempt_at.elapsed()
    }

    fn touch(&mut self) {
        self.last_attempt_at = Instant::now();
    }
}

/// The lock state after a recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// With this failed attempt the lockout threshold has been reached.
    MaxFailuresReached,
    /// Already locked out from previous failed attempts.
    AlreadyLocked,
}

/// An in-process rate limiter for hosts without an external audit service.
///
/// Remembers failed attempts per [`FailedLoginsBlock`] key and refuses further attempts once
/// `max_attempts` is reached, until `expires_after` has passed since the last one.
#[derive(Debug, Default)]
pub struct FailedLoginsCollaborator {
    policy: FailedLoginsPolicy,
    failed_logins: DashMap<FailedLoginsKey, FailedLoginsEntry>,
}

impl FailedLoginsCollaborator {
    /// Creates a limiter with the given policy.
    pub fn new(policy: FailedLoginsPolicy) -> Self {
        FailedLoginsCollaborator {
            policy,
            failed_logins: DashMap::new(),
        }
    }

    fn is_expired(&self, time_elapsed: Duration) -> bool {
        time_elapsed > self.policy.expires_after
    }

    fn reached_max(&self, attempts: u32) -> bool {
        attempts >= self.policy.max_attempts
    }

    fn getkey(&self, ip: Option<IpAddr>, user: &str) -> FailedLoginsKey {
        match self.policy.block_by {
            FailedLoginsBlock::UserAndIP => FailedLoginsKey {
                ip,
                username: Some(user.to_string()),
            },
            FailedLoginsBlock::IP => FailedLoginsKey { ip, username: None },
            FailedLoginsBlock::User => FailedLoginsKey {
                ip: None,
                username: Some(user.to_string()),
            },
        }
    }

    /// Upon failed login: increments the failure counter and returns the lock state if locked.
    pub fn failed(&self, ip: Option<IpAddr>, user: &str) -> Option<LockState> {
        let key = self.getkey(ip, user);
        let attempts = {
            let mut entry = self.failed_logins.entry(key).or_insert(FailedLoginsEntry {
                attempts: 0,
                last_attempt_at: Instant::now(),
            });
            // An expired entry starts over at the first failure.
            if entry.attempts > 0 && self.is_expired(entry.time_elapsed()) {
                entry.attempts = 1;
            } else {
                entry.attempts += 1;
            }
            entry.touch();
            entry.attempts
        };

        match attempts {
            a if a == self.policy.max_attempts => Some(LockState::MaxFailuresReached),
            a if a > self.policy.max_attempts => Some(LockState::AlreadyLocked),
            _ => None,
        }
    }

    /// Upon successful login: returns `AlreadyLocked` if still locked out, otherwise forgets the
    /// failures.
    pub fn success(&self, ip: Option<IpAddr>, user: &str) -> Option<LockState> {
        let key = self.getkey(ip, user);
        let (is_expired, is_locked) = match self.failed_logins.get(&key) {
            Some(entry) => (self.is_expired(entry.time_elapsed()), self.reached_max(entry.attempts)),
            None => return None,
        };

        match (is_expired, is_locked) {
            (false, true) => Some(LockState::AlreadyLocked),
            (_, _) => {
                self.failed_logins.remove(&key);
                None
            }
        }
    }

    /// True if the key is currently locked out.
    pub fn is_locked(&self, ip: Option<IpAddr>, user: &str) -> bool {
        let key = self.getkey(ip, user);
        self.failed_logins
            .get(&key)
            .is_some_and(|entry| !self.is_expired(entry.time_elapsed()) && self.reached_max(entry.attempts))
    }

    /// Drops expired entries and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.failed_logins.len();
        self.failed_logins.retain(|_, entry| !self.is_expired(entry.time_elapsed()));
        before.saturating_sub(self.failed_logins.len())
    }
}

impl AuditCollaborator for FailedLoginsCollaborator {
    fn report_attempt(&self, report: &AttemptReport) -> Result<bool, CollaboratorError> {
        if report.valid_auth() {
            return Ok(self.success(report.address, &report.username).is_none());
        }
        self.failed(report.address, &report.username);
        Ok(false)
    }

    fn hit_rate_limit(&self, username: &str, address: Option<IpAddr>) -> Result<bool, CollaboratorError> {
        Ok(self.is_locked(address, username))
    }

    fn check_account_accessible(&self, _username: &str) -> Result<bool, CollaboratorError> {
        Ok(true)
    }

    fn expire_rate_limit(&self) -> Result<usize, CollaboratorError> {
        Ok(self.sweep())
    }

    fn name(&self) -> &str {
        "failed-logins"
    }
}

//! The PAM authentication flow.
//!
//! [`PamAuthenticator::authenticate`] runs the checks in a fixed order and stops at the first
//! failure:
//!
//! 1. username presence and validity (an invalid name is reported as `_UNSAFE_`),
//! 2. rate limiting,
//! 3. site username check and account accessibility,
//! 4. account lookup,
//! 5. obtaining the secret,
//! 6. alternative login modes (share links, session mounts),
//! 7. password policy and the per-service digest file.
//!
//! Every decision from step 2 on is reported to the [`AuditCollaborator`].

use crate::account::{AccountDatabase, SystemAccount};
use crate::altlogin::{self, AltDecision, AltMatch};
use crate::audit::NopCollaborator;
use crate::digest::{self, DigestRecord, PASSWORD_FILENAME};
use crate::error::RejectReason;
use crate::identity::{self, ValidIdentity};
use crate::options::Config;
use crate::outcome::AuthOutcome;
use crate::path;
use crate::policy;
use migauth_core::audit::{AttemptFlags, AttemptReport, AuditCollaborator, LoginMode};
use migauth_core::secret::Secret;
use slog::Drain;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing_attributes::instrument;

/// Reported in place of a username that failed validation.
pub const UNSAFE_USERNAME: &str = "_UNSAFE_";
/// The prompt used when the secret has to be asked for.
pub const PASSWORD_PROMPT: &str = "Password: ";

/// Maps PAM service names to the directory in the home that holds their digest file.
///
/// Unknown services use their own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMap {
    dirs: HashMap<String, String>,
}

impl Default for ServiceMap {
    fn default() -> Self {
        let dirs = [("sshd", "ssh"), ("ftpd", "ftps"), ("webdavs", "davs")]
            .into_iter()
            .map(|(service, dir)| (service.to_string(), dir.to_string()))
            .collect();
        ServiceMap { dirs }
    }
}

impl ServiceMap {
    /// Adds or replaces a mapping.
    pub fn with(mut self, service: &str, dir: &str) -> Self {
        self.dirs.insert(service.to_string(), dir.to_string());
        self
    }

    /// The digest directory name for `service`, without the leading dot.
    pub fn dir_for<'a>(&'a self, service: &'a str) -> &'a str {
        self.dirs.get(service).map(String::as_str).unwrap_or(service)
    }
}

/// The error a [`Conversation`] returns when it cannot talk to the user.
#[derive(Debug, Error)]
#[error("conversation failed: {msg}")]
pub struct ConversationError {
    msg: String,
}

impl ConversationError {
    /// Creates a new conversation error.
    pub fn new(msg: impl Into<String>) -> Self {
        ConversationError { msg: msg.into() }
    }
}

/// Asks the remote party for its secret when none came with the request.
pub trait Conversation {
    /// Prompts without echo. `Ok(None)` means the user entered nothing.
    fn prompt_secret(&mut self, prompt: &str) -> Result<Option<Secret>, ConversationError>;
}

/// One authentication request.
#[derive(Clone)]
pub struct PamRequest<'a> {
    username: &'a str,
    service: &'a str,
    secret: Option<Secret>,
    address: Option<IpAddr>,
    disallow_null_secret: bool,
}

impl<'a> PamRequest<'a> {
    /// A request for `username` through `service`.
    pub fn new(username: &'a str, service: &'a str) -> Self {
        PamRequest {
            username,
            service,
            secret: None,
            address: None,
            disallow_null_secret: false,
        }
    }

    /// The secret, if the caller already has it.
    pub fn secret(mut self, secret: Secret) -> Self {
        self.secret = Some(secret);
        self
    }

    /// The remote address.
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Refuses an empty answer from the conversation, like `PAM_DISALLOW_NULL_AUTHTOK`.
    pub fn disallow_null_secret(mut self, disallow: bool) -> Self {
        self.disallow_null_secret = disallow;
        self
    }
}

impl fmt::Debug for PamRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PamRequest")
            .field("username", &self.username)
            .field("service", &self.service)
            .field("secret", &self.secret.as_ref().map(|_| "*******"))
            .field("address", &self.address)
            .finish()
    }
}

/// Makes the PAM authentication decision.
///
/// Create one with [`PamAuthenticator::new`] and configure it with the builder style methods.
/// The collaborator defaults to [`NopCollaborator`].
#[derive(Debug)]
pub struct PamAuthenticator {
    config: Config,
    accounts: Arc<dyn AccountDatabase>,
    collaborator: Arc<dyn AuditCollaborator>,
    services: ServiceMap,
    logger: slog::Logger,
}

impl PamAuthenticator {
    /// Creates an authenticator looking up accounts in `accounts`.
    pub fn new(config: Config, accounts: Arc<dyn AccountDatabase>) -> Self {
        PamAuthenticator {
            config,
            accounts,
            collaborator: Arc::new(NopCollaborator),
            services: ServiceMap::default(),
            logger: slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!()),
        }
    }

    /// Sets the audit and rate-limit collaborator.
    pub fn collaborator(mut self, collaborator: Arc<dyn AuditCollaborator>) -> Self {
        self.collaborator = collaborator;
        self
    }

    /// Sets the service to directory mapping.
    pub fn services(mut self, services: ServiceMap) -> Self {
        self.services = services;
        self
    }

    /// Sets the logger.
    pub fn logger(mut self, logger: slog::Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Authenticates the request. `conversation` is only used if the request carries no secret.
    #[instrument(skip(self, request, conversation), fields(username = request.username, service = request.service))]
    pub fn authenticate(&self, request: PamRequest<'_>, conversation: Option<&mut dyn Conversation>) -> AuthOutcome {
        let mut attempt = Attempt {
            authenticator: self,
            username: UNSAFE_USERNAME.to_string(),
            address: request.address,
            secret_digest: None,
            mode: None,
        };

        if request.username.is_empty() {
            slog::info!(self.logger, "No username given");
            return attempt.reject(AttemptFlags::INVALID_USERNAME, RejectReason::InvalidUsername);
        }
        let validated = identity::validate(request.username, &self.config.username);
        match &validated {
            Ok(identity) => attempt.username = identity.name().to_string(),
            Err(rejection) if rejection.is_config_error() => {
                slog::error!(self.logger, "Username pattern is misconfigured"; "error" => %rejection)
            }
            Err(rejection) => slog::info!(self.logger, "Invalid username"; "error" => %rejection),
        }

        if let Err(err) = self.collaborator.expire_rate_limit() {
            slog::debug!(self.logger, "Could not expire rate limit entries"; "error" => %err);
        }
        match self.collaborator.hit_rate_limit(&attempt.username, attempt.address) {
            Ok(false) => {}
            Ok(true) => {
                slog::warn!(self.logger, "Rate limit exceeded"; "user" => &attempt.username, "address" => ?attempt.address);
                return attempt.reject(AttemptFlags::EXCEEDED_RATE_LIMIT, RejectReason::RateLimited);
            }
            Err(err) => {
                slog::error!(self.logger, "Rate limiter unavailable"; "collaborator" => self.collaborator.name(), "error" => %err);
                return attempt.abort(RejectReason::ExternalCollaboratorUnavailable);
            }
        }

        let identity = match validated {
            Ok(identity) => identity,
            Err(rejection) => return attempt.reject(AttemptFlags::INVALID_USERNAME, rejection.into()),
        };
        match self.collaborator.validate_username(identity.name()) {
            Ok(true) => {}
            Ok(false) => {
                slog::info!(self.logger, "Username refused by site policy"; "user" => identity.name());
                return attempt.reject(AttemptFlags::INVALID_USERNAME, RejectReason::InvalidUsername);
            }
            Err(err) => {
                slog::error!(self.logger, "Username validation unavailable"; "error" => %err);
                return attempt.abort(RejectReason::ExternalCollaboratorUnavailable);
            }
        }
        match self.collaborator.check_account_accessible(identity.name()) {
            Ok(true) => {}
            Ok(false) => {
                slog::info!(self.logger, "Account inaccessible"; "user" => identity.name());
                return attempt.reject(AttemptFlags::ACCOUNT_INACCESSIBLE, RejectReason::AccountInaccessible);
            }
            Err(err) => {
                slog::error!(self.logger, "Account accessibility check unavailable"; "error" => %err);
                return attempt.abort(RejectReason::ExternalCollaboratorUnavailable);
            }
        }

        let account = match self.accounts.lookup(identity.name()) {
            Some(account) => account,
            None => {
                slog::info!(self.logger, "Unknown user"; "user" => identity.name());
                return attempt.reject(AttemptFlags::INVALID_USER, RejectReason::UnknownUser);
            }
        };

        let secret = match self.obtain_secret(request.secret, request.disallow_null_secret, conversation) {
            Ok(secret) => secret,
            Err(reason) => return attempt.abort(reason),
        };
        attempt.secret_digest = Some(secret.report_digest());

        // Links must point into the same root the account database resolves homes below.
        match self.accounts.home_root() {
            Some(home_root) => match altlogin::match_structural(&identity, home_root, self.config.alt_modes(), &self.logger) {
                Ok(Some(found)) => return self.alt_login(attempt, &identity, &found, &secret, &account),
                Ok(None) => {}
                Err(reason) => return attempt.abort(reason),
            },
            None => slog::debug!(self.logger, "No canonical home root, skipping alternative login modes"),
        }

        self.standard_login(attempt, &identity, request.service, &secret, &account)
    }

    fn obtain_secret(
        &self,
        provided: Option<Secret>,
        disallow_null: bool,
        conversation: Option<&mut dyn Conversation>,
    ) -> Result<Secret, RejectReason> {
        if let Some(secret) = provided {
            return Ok(secret);
        }
        let Some(conversation) = conversation else {
            slog::warn!(self.logger, "No secret and no conversation available");
            return Err(RejectReason::ConversationFailed);
        };
        match conversation.prompt_secret(PASSWORD_PROMPT) {
            Ok(Some(secret)) if !secret.is_empty() => Ok(secret),
            Ok(_) if disallow_null => {
                slog::info!(self.logger, "Empty secret refused");
                Err(RejectReason::PolicyViolation)
            }
            Ok(_) => Ok(Secret::from("")),
            Err(err) => {
                slog::warn!(self.logger, "Could not obtain secret"; "error" => %err);
                Err(RejectReason::ConversationFailed)
            }
        }
    }

    fn alt_login(
        &self,
        mut attempt: Attempt<'_>,
        identity: &ValidIdentity,
        found: &AltMatch<'_>,
        secret: &Secret,
        account: &SystemAccount,
    ) -> AuthOutcome {
        let mode = found.mode();
        attempt.mode = Some(mode);
        match altlogin::decide_secret(found.config(), identity, secret) {
            AltDecision::Disabled => {
                slog::info!(self.logger, "Password login not enabled for mode, use a key"; "mode" => %mode, "user" => identity.name());
                attempt.reject(
                    AttemptFlags::SKIP_TWOFA_CHECK | AttemptFlags::AUTHTYPE_DISABLED,
                    RejectReason::AltModeDisabled,
                )
            }
            AltDecision::Mismatch => {
                slog::warn!(self.logger, "Wrong secret for alternative login"; "mode" => %mode, "user" => identity.name(), "secret" => secret.masked());
                attempt.reject(
                    AttemptFlags::SKIP_TWOFA_CHECK
                        | AttemptFlags::SKIP_NOTIFY
                        | AttemptFlags::AUTHTYPE_ENABLED
                        | AttemptFlags::INVALID_AUTH,
                    RejectReason::AltModeMismatch,
                )
            }
            AltDecision::Accepted => {
                let mut flags = AttemptFlags::SKIP_TWOFA_CHECK | AttemptFlags::AUTHTYPE_ENABLED | AttemptFlags::VALID_AUTH;
                // Notebook mounts belong to a live session whose owner gets notified.
                if mode != LoginMode::NotebookSessionMount {
                    flags |= AttemptFlags::SKIP_NOTIFY;
                }
                slog::info!(self.logger, "Accepted alternative login"; "mode" => %mode, "user" => identity.name());
                attempt.accept(flags, account)
            }
        }
    }

    fn standard_login(
        &self,
        mut attempt: Attempt<'_>,
        identity: &ValidIdentity,
        service: &str,
        secret: &Secret,
        account: &SystemAccount,
    ) -> AuthOutcome {
        attempt.mode = Some(LoginMode::Standard);
        let invalid = AttemptFlags::SKIP_TWOFA_CHECK | AttemptFlags::AUTHTYPE_ENABLED | AttemptFlags::INVALID_AUTH;

        if let Err(violation) = policy::check(secret, &self.config.password, self.collaborator.as_ref(), &self.logger) {
            slog::info!(self.logger, "Password policy violation"; "user" => identity.name(), "violation" => %violation);
            return attempt.reject(invalid, RejectReason::PolicyViolation);
        }

        let service_dir = format!(".{}", self.services.dir_for(service));
        let digest_path = match path::join_checked(&account.home, &[service_dir.as_str(), PASSWORD_FILENAME]) {
            Ok(path) => path,
            Err(reason) => return attempt.abort(reason),
        };
        let content = match digest::load(&digest_path, self.config.max_digest_size) {
            Ok(content) => content,
            Err(err) if err.means_disabled() => {
                slog::info!(self.logger, "Password login not enabled"; "user" => identity.name(), "path" => %digest_path.display());
                return attempt.reject(
                    AttemptFlags::SKIP_TWOFA_CHECK | AttemptFlags::AUTHTYPE_DISABLED,
                    RejectReason::from(&err),
                );
            }
            Err(err) => {
                slog::warn!(self.logger, "Cannot use digest file"; "path" => %digest_path.display(), "error" => %err);
                return attempt.abort(RejectReason::from(&err));
            }
        };
        let record = match DigestRecord::parse(&content) {
            Ok(record) => record,
            Err(err) => {
                slog::warn!(self.logger, "Malformed digest file"; "path" => %digest_path.display(), "error" => %err);
                return attempt.abort(err.into());
            }
        };
        if !record.verify(secret, self.config.salt_encoding) {
            slog::info!(self.logger, "Wrong password"; "user" => identity.name(), "secret" => secret.masked());
            return attempt.reject(invalid, RejectReason::DigestMismatch);
        }

        let mut flags = AttemptFlags::AUTHTYPE_ENABLED | AttemptFlags::VALID_AUTH;
        match self.collaborator.check_twofactor_session(identity.name(), attempt.address) {
            Ok(true) => flags |= AttemptFlags::VALID_TWOFA,
            Ok(false) => {}
            Err(err) => slog::warn!(self.logger, "Two-factor check unavailable"; "error" => %err),
        }
        slog::info!(self.logger, "Accepted password"; "user" => identity.name());
        attempt.accept(flags, account)
    }
}

// The attempt being decided, carrying what gets reported.
struct Attempt<'a> {
    authenticator: &'a PamAuthenticator,
    username: String,
    address: Option<IpAddr>,
    secret_digest: Option<String>,
    mode: Option<LoginMode>,
}

impl Attempt<'_> {
    fn report(&self, flags: AttemptFlags, reason: Option<RejectReason>) -> Result<bool, ()> {
        let auth = self.authenticator;
        let report = AttemptReport {
            username: self.username.clone(),
            address: self.address,
            secret_digest: self.secret_digest.clone(),
            mode: self.mode,
            flags: flags | AttemptFlags::AUTHTYPE_PASSWORD,
            reason: reason.map(|r| r.to_string()),
        };
        auth.collaborator.report_attempt(&report).map_err(|err| {
            slog::warn!(auth.logger, "Could not report attempt"; "collaborator" => auth.collaborator.name(), "error" => %err);
        })
    }

    // Rejects and reports.
    fn reject(self, flags: AttemptFlags, reason: RejectReason) -> AuthOutcome {
        if let Ok(true) = self.report(flags, Some(reason)) {
            slog::warn!(self.authenticator.logger, "Collaborator registered successful auth despite failure"; "user" => &self.username, "reason" => %reason);
        }
        AuthOutcome::rejected(reason)
    }

    // Rejects without reporting.
    fn abort(self, reason: RejectReason) -> AuthOutcome {
        AuthOutcome::rejected(reason)
    }

    fn accept(self, flags: AttemptFlags, account: &SystemAccount) -> AuthOutcome {
        match self.report(flags, None) {
            Ok(false) => {
                slog::warn!(self.authenticator.logger, "Collaborator refused authorization"; "user" => &self.username);
                AuthOutcome::rejected(RejectReason::NotAuthorized)
            }
            Ok(true) | Err(()) => AuthOutcome::Success {
                home: account.home.clone(),
                uid: account.uid,
                gid: account.gid,
                mode: self.mode.unwrap_or(LoginMode::Standard),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_services_map_to_their_directory() {
        let services = ServiceMap::default();
        assert_eq!("ssh", services.dir_for("sshd"));
        assert_eq!("ftps", services.dir_for("ftpd"));
        assert_eq!("davs", services.dir_for("webdavs"));
        assert_eq!("sftp", services.dir_for("sftp"));
        assert_eq!("sftp", services.with("sftp-subsys", "sftp").dir_for("sftp-subsys"));
    }

    #[test]
    fn request_debug_hides_secret() {
        let request = PamRequest::new("alice", "sshd").secret(Secret::from("hunter22"));
        let debug = format!("{:?}", request);
        assert!(!debug.contains("hunter22"));
        assert!(debug.contains("*******"));
    }
}

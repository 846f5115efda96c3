//! User resolution for the NSS module.
//!
//! Every valid username resolves to the base account's uid and gid with its own home: either the
//! target of a matching alternative-mode symlink or `<home root>/<name>`.

use crate::account::{AccountDatabase, BaseAccount, PASSWORD_MARKER, ShadowRecord, SystemAccount, UserRecord};
use crate::altlogin;
use crate::error::RejectReason;
use crate::identity::{self, ValidIdentity};
use crate::options::Config;
use crate::outcome::AuthOutcome;
use crate::path;
use migauth_core::audit::LoginMode;
use slog::Drain;
use std::path::Path;
use tracing_attributes::instrument;

/// Resolves presented usernames to user and shadow records.
#[derive(Debug, Clone)]
pub struct NssResolver {
    config: Config,
    base: BaseAccount,
    logger: slog::Logger,
}

impl NssResolver {
    /// Creates a resolver. The base account's home is the canonical home root.
    pub fn new(config: Config, base: BaseAccount) -> Self {
        let logger = slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!());
        NssResolver {
            base: base.normalized(&logger),
            config,
            logger,
        }
    }

    /// Sets the logger.
    pub fn logger(mut self, logger: slog::Logger) -> Self {
        self.logger = logger;
        self
    }

    /// The base account every user maps to.
    pub fn base_account(&self) -> &BaseAccount {
        &self.base
    }

    /// Resolves `name` to a user record.
    #[instrument(skip(self))]
    pub fn getpwnam(&self, name: &str) -> Result<UserRecord, RejectReason> {
        self.resolve(name).map(|(record, _)| record)
    }

    /// Resolves `name`, failing transiently if the record would not fit `buflen` bytes.
    pub fn getpwnam_r(&self, name: &str, buflen: usize) -> Result<UserRecord, RejectReason> {
        let record = self.getpwnam(name)?;
        let required = record.required_buffer();
        if required > buflen {
            slog::debug!(self.logger, "Buffer too small for user record"; "required" => required, "buflen" => buflen);
            return Err(RejectReason::TransientBufferExhaustion);
        }
        Ok(record)
    }

    /// The fixed shadow entry for `name`, provided `name` is a valid username.
    pub fn getspnam(&self, name: &str) -> Result<ShadowRecord, RejectReason> {
        let identity = self.validate(name)?;
        Ok(ShadowRecord::fixed(identity.name()))
    }

    /// Like [`getspnam`](Self::getspnam), failing transiently if the record would not fit.
    pub fn getspnam_r(&self, name: &str, buflen: usize) -> Result<ShadowRecord, RejectReason> {
        let record = self.getspnam(name)?;
        if record.required_buffer() > buflen {
            return Err(RejectReason::TransientBufferExhaustion);
        }
        Ok(record)
    }

    /// Resolves `name` into an [`AuthOutcome`].
    pub fn outcome(&self, name: &str, buflen: usize) -> AuthOutcome {
        match self.resolve(name) {
            Ok((record, _)) if record.required_buffer() > buflen => {
                AuthOutcome::rejected(RejectReason::TransientBufferExhaustion)
            }
            Ok((record, mode)) => AuthOutcome::Success {
                home: record.dir,
                uid: record.uid,
                gid: record.gid,
                mode,
            },
            Err(reason) => AuthOutcome::rejected(reason),
        }
    }

    fn validate(&self, name: &str) -> Result<ValidIdentity, RejectReason> {
        identity::validate(name, &self.config.username).map_err(|rejection| {
            if rejection.is_config_error() {
                slog::error!(self.logger, "Username pattern is misconfigured"; "error" => %rejection);
            } else {
                slog::debug!(self.logger, "Invalid username"; "error" => %rejection);
            }
            RejectReason::from(rejection)
        })
    }

    fn resolve(&self, name: &str) -> Result<(UserRecord, LoginMode), RejectReason> {
        let identity = self.validate(name)?;
        let home_root = &self.base.dir;
        let (candidate, mode) = match altlogin::match_structural(&identity, home_root, self.config.alt_modes(), &self.logger)? {
            Some(found) => (found.candidate().to_path_buf(), found.mode()),
            None => (path::join_checked(home_root, &[identity.name()])?, LoginMode::Standard),
        };
        let home = path::resolve(&candidate).map_err(|reason| {
            slog::debug!(self.logger, "Home did not resolve"; "user" => identity.name(), "mode" => %mode, "reason" => %reason);
            reason
        })?;
        slog::debug!(self.logger, "Resolved user"; "user" => identity.name(), "mode" => %mode, "home" => %home);
        Ok((
            UserRecord {
                name: identity.name().to_string(),
                passwd: PASSWORD_MARKER.to_string(),
                uid: self.base.uid,
                gid: self.base.gid,
                gecos: self.base.gecos.clone(),
                dir: home.into_path_buf(),
                shell: self.base.shell.clone(),
            },
            mode,
        ))
    }
}

impl AccountDatabase for NssResolver {
    fn lookup(&self, name: &str) -> Option<SystemAccount> {
        self.getpwnam(name).ok().map(SystemAccount::from)
    }

    fn home_root(&self) -> Option<&Path> {
        Some(&self.base.dir)
    }
}

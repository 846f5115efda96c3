//! Account records handed to the system and the databases they come from.

use crate::error::ConfigError;
use crate::options::Config;
use slog::Drain;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where the base account lives by default.
pub const DEFAULT_BASE_ACCOUNT_FILE: &str = "/etc/libnss_mig.conf";
/// Name of the fallback base account.
pub const DEFAULT_BASE_ACCOUNT_NAME: &str = "mig";
/// Uid of the fallback base account.
pub const DEFAULT_MIG_UID: u32 = 501;
/// Gid of the fallback base account.
pub const DEFAULT_MIG_GID: u32 = 501;
/// Shell of the fallback base account.
pub const DEFAULT_SHELL: &str = "/bin/bash";
/// Lowest uid ever handed out.
pub const MIN_UID_NUMBER: u32 = 500;
/// Lowest gid ever handed out.
pub const MIN_GID_NUMBER: u32 = 500;
/// Password field of resolved users. Authentication never goes through it.
pub const PASSWORD_MARKER: &str = "x";
/// Password field of shadow entries.
pub const SHADOW_MARKER: &str = "*";

/// The single system account all virtual users map to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseAccount {
    /// Login name of the base account.
    pub name: String,
    /// Uid handed out to every resolved user.
    pub uid: u32,
    /// Gid handed out to every resolved user.
    pub gid: u32,
    /// GECOS field.
    pub gecos: String,
    /// The canonical home root.
    pub dir: PathBuf,
    /// Login shell.
    pub shell: String,
}

impl BaseAccount {
    /// The built-in base account rooted at the configured user home.
    pub fn from_config(config: &Config) -> Self {
        BaseAccount {
            name: DEFAULT_BASE_ACCOUNT_NAME.to_string(),
            uid: DEFAULT_MIG_UID,
            gid: DEFAULT_MIG_GID,
            gecos: String::new(),
            dir: config.user_home.clone(),
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    /// Reads the first passwd style entry of `path`. Blank lines and `#` comments are skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|err| ConfigError::with_source(format!("cannot read {}", path.display()), err))?;
        content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .ok_or_else(|| ConfigError::new(format!("no account entry in {}", path.display())))?
            .parse()
    }

    /// Raises uid and gid to the floor, logging when that happens.
    pub fn normalized(mut self, logger: &slog::Logger) -> Self {
        if self.uid < MIN_UID_NUMBER {
            slog::warn!(logger, "Base account uid below minimum, raising it"; "uid" => self.uid, "min" => MIN_UID_NUMBER);
            self.uid = MIN_UID_NUMBER;
        }
        if self.gid < MIN_GID_NUMBER {
            slog::warn!(logger, "Base account gid below minimum, raising it"; "gid" => self.gid, "min" => MIN_GID_NUMBER);
            self.gid = MIN_GID_NUMBER;
        }
        self
    }
}

impl FromStr for BaseAccount {
    type Err = ConfigError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim_end().split(':').collect();
        let &[name, _passwd, uid, gid, gecos, dir, shell] = fields.as_slice() else {
            return Err(ConfigError::new(format!("expected 7 passwd fields, found {}", fields.len())));
        };
        if name.is_empty() || dir.is_empty() {
            return Err(ConfigError::new("name and home must not be empty"));
        }
        let number = |field: &str, what: &str| {
            field
                .parse::<u32>()
                .map_err(|err| ConfigError::with_source(format!("bad {} '{}'", what, field), err))
        };
        Ok(BaseAccount {
            name: name.to_string(),
            uid: number(uid, "uid")?,
            gid: number(gid, "gid")?,
            gecos: gecos.to_string(),
            dir: PathBuf::from(dir),
            shell: shell.to_string(),
        })
    }
}

/// A resolved user as NSS reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// The presented, validated name.
    pub name: String,
    /// Always [`PASSWORD_MARKER`].
    pub passwd: String,
    /// The base account uid.
    pub uid: u32,
    /// The base account gid.
    pub gid: u32,
    /// The base account GECOS field.
    pub gecos: String,
    /// The resolved home directory.
    pub dir: PathBuf,
    /// The base account shell.
    pub shell: String,
}

impl UserRecord {
    /// Bytes a caller buffer needs to hold the per-user strings, terminating NULs included.
    ///
    /// GECOS and shell are shared with the base account and not copied.
    pub fn required_buffer(&self) -> usize {
        self.name.len() + 1 + self.passwd.len() + 1 + self.dir.as_os_str().len() + 1
    }
}

/// A shadow entry for a resolved user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRecord {
    /// The presented, validated name.
    pub name: String,
    /// Always [`SHADOW_MARKER`].
    pub passwd: String,
    /// Day of the last password change, counted from the epoch.
    pub last_change: i64,
    /// Minimum days between changes.
    pub min: i64,
    /// Maximum days between changes.
    pub max: i64,
    /// Days of warning before expiry.
    pub warn: i64,
    /// Days of inactivity allowed after expiry. `None` if unset.
    pub inactive: Option<i64>,
    /// Day the account expires. `None` if unset.
    pub expire: Option<i64>,
}

impl ShadowRecord {
    /// The fixed, non-expiring shadow entry for `name`.
    pub fn fixed(name: &str) -> Self {
        ShadowRecord {
            name: name.to_string(),
            passwd: SHADOW_MARKER.to_string(),
            last_change: 13571,
            min: 0,
            max: 99999,
            warn: 7,
            inactive: None,
            expire: None,
        }
    }

    /// Bytes a caller buffer needs, terminating NULs included.
    pub fn required_buffer(&self) -> usize {
        self.name.len() + 1 + self.passwd.len() + 1
    }
}

/// A system account as the PAM flow needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAccount {
    /// Login name.
    pub name: String,
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id.
    pub gid: u32,
    /// Home directory.
    pub home: PathBuf,
}

impl From<UserRecord> for SystemAccount {
    fn from(record: UserRecord) -> Self {
        SystemAccount {
            name: record.name,
            uid: record.uid,
            gid: record.gid,
            home: record.dir,
        }
    }
}

/// Looks up accounts by name.
pub trait AccountDatabase: Send + Sync + Debug {
    /// The account called `name`, if there is one.
    fn lookup(&self, name: &str) -> Option<SystemAccount>;

    /// The canonical home root alternative-mode links must point into.
    ///
    /// `None` if the database has no such root, in which case no alternative mode is matched.
    fn home_root(&self) -> Option<&Path> {
        None
    }
}

/// The system user database, going through whatever NSS modules the host has configured.
#[derive(Debug, Clone)]
pub struct SystemAccounts {
    logger: slog::Logger,
}

impl SystemAccounts {
    /// Creates a lookup that logs through `logger`.
    pub fn new(logger: slog::Logger) -> Self {
        SystemAccounts { logger }
    }
}

impl Default for SystemAccounts {
    fn default() -> Self {
        SystemAccounts::new(slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!()))
    }
}

impl AccountDatabase for SystemAccounts {
    fn lookup(&self, name: &str) -> Option<SystemAccount> {
        match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Some(SystemAccount {
                name: user.name,
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
                home: user.dir,
            }),
            Ok(None) => None,
            Err(err) => {
                slog::debug!(self.logger, "User lookup failed"; "user" => name, "error" => %err);
                None
            }
        }
    }
}

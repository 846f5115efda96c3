//! Contains the configuration of the decision engine and its defaults.
//!
//! Everything is configured through environment variables, read once per process by
//! [`Config::from_env`]. Missing variables take the defaults below. Malformed values are logged
//! and replaced by the default as well.

use migauth_core::audit::LoginMode;
use std::path::PathBuf;

/// Anchored pattern a username must match.
pub const DEFAULT_USERNAME_REGEX: &str = "^[a-z0-9][a-z0-9_-]{1,127}$";
/// Shortest accepted username in bytes.
pub const DEFAULT_USERNAME_MIN_LENGTH: usize = 2;
/// Longest accepted username in bytes.
pub const DEFAULT_USERNAME_MAX_LENGTH: usize = 128;
/// Shortest accepted password in bytes.
pub const DEFAULT_PASSWORD_MIN_LENGTH: usize = 6;
/// Longest accepted password in bytes.
pub const DEFAULT_PASSWORD_MAX_LENGTH: usize = 128;
/// Minimum number of character classes in a password.
pub const DEFAULT_PASSWORD_MIN_CLASSES: usize = 2;
/// The canonical home root of regular accounts.
pub const DEFAULT_USER_HOME: &str = "/home";
/// Where share-link identifiers live.
pub const DEFAULT_SHARELINK_HOME: &str = "/tmp";
/// Length of a share-link identifier.
pub const DEFAULT_SHARELINK_LENGTH: usize = 42;
/// Subdirectory below the share-link home holding writable links.
pub const DEFAULT_SHARELINK_SUBDIR: &str = "read-write";
/// Where job session mount identifiers live.
pub const DEFAULT_JOBSIDMOUNT_HOME: &str = "/tmp";
/// Length of a job session mount identifier.
pub const DEFAULT_JOBSIDMOUNT_LENGTH: usize = 42;
/// Where notebook session mount identifiers live.
pub const DEFAULT_JUPYTERSIDMOUNT_HOME: &str = "/tmp";
/// Length of a notebook session mount identifier.
pub const DEFAULT_JUPYTERSIDMOUNT_LENGTH: usize = 42;
/// Largest password digest file that will be read.
pub const DEFAULT_MAX_DIGEST_SIZE: usize = 2048;

/// How a username is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernamePolicy {
    /// Pattern that must be anchored with `^` and `$`.
    pub pattern: String,
    /// Shortest accepted name in bytes.
    pub min_length: usize,
    /// Longest accepted name in bytes.
    pub max_length: usize,
}

impl Default for UsernamePolicy {
    fn default() -> Self {
        UsernamePolicy {
            pattern: DEFAULT_USERNAME_REGEX.to_string(),
            min_length: DEFAULT_USERNAME_MIN_LENGTH,
            max_length: DEFAULT_USERNAME_MAX_LENGTH,
        }
    }
}

/// The static password policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    /// Shortest accepted password in bytes.
    pub min_length: usize,
    /// Longest accepted password in bytes.
    pub max_length: usize,
    /// Minimum number of distinct character classes.
    pub min_classes: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        PasswordPolicy {
            min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            max_length: DEFAULT_PASSWORD_MAX_LENGTH,
            min_classes: DEFAULT_PASSWORD_MIN_CLASSES,
        }
    }
}

/// The salt bytes fed into PBKDF2 when verifying a stored digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaltEncoding {
    /// Use the base64 decoded salt.
    #[default]
    Decoded,
    /// Use the salt text exactly as it appears in the digest file. Digest files generated by
    /// older tooling were derived this way.
    AsStored,
}

/// One alternative login mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltModeConfig {
    mode: LoginMode,
    home_root: PathBuf,
    length: usize,
    subdir: Option<String>,
    password_login: bool,
    allow_username_as_secret: bool,
}

impl AltModeConfig {
    /// Share links: `<home>/<subdir>/<name>`, the identifier itself is the secret.
    pub fn share_link() -> Self {
        AltModeConfig {
            mode: LoginMode::ShareLink,
            home_root: PathBuf::from(DEFAULT_SHARELINK_HOME),
            length: DEFAULT_SHARELINK_LENGTH,
            subdir: Some(DEFAULT_SHARELINK_SUBDIR.to_string()),
            password_login: true,
            allow_username_as_secret: true,
        }
    }

    /// Job session mounts: `<home>/<name>`, password login disabled unless enabled explicitly.
    pub fn job_session_mount() -> Self {
        AltModeConfig {
            mode: LoginMode::JobSessionMount,
            home_root: PathBuf::from(DEFAULT_JOBSIDMOUNT_HOME),
            length: DEFAULT_JOBSIDMOUNT_LENGTH,
            subdir: None,
            password_login: false,
            allow_username_as_secret: true,
        }
    }

    /// Notebook session mounts: `<home>/<name>`, password login disabled unless enabled explicitly.
    pub fn notebook_session_mount() -> Self {
        AltModeConfig {
            mode: LoginMode::NotebookSessionMount,
            home_root: PathBuf::from(DEFAULT_JUPYTERSIDMOUNT_HOME),
            length: DEFAULT_JUPYTERSIDMOUNT_LENGTH,
            subdir: None,
            password_login: false,
            allow_username_as_secret: true,
        }
    }

    /// Sets the directory holding the mode's symlinks.
    pub fn home_root<P: Into<PathBuf>>(mut self, home_root: P) -> Self {
        self.home_root = home_root.into();
        self
    }

    /// Sets the exact identifier length of the mode.
    pub fn length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    /// Sets or clears the subdirectory between the home root and the identifier.
    pub fn subdir(mut self, subdir: Option<String>) -> Self {
        self.subdir = subdir;
        self
    }

    /// Enables or disables password login for the mode. Disabled modes still match and then
    /// reject, so that key based logins keep working.
    pub fn password_login(mut self, enabled: bool) -> Self {
        self.password_login = enabled;
        self
    }

    /// Allows the secret to equal the identifier. Only meaningful with password login enabled.
    pub fn allow_username_as_secret(mut self, allow: bool) -> Self {
        self.allow_username_as_secret = allow;
        self
    }

    /// The login mode this configures.
    pub fn mode(&self) -> LoginMode {
        self.mode
    }

    /// The directory holding the mode's symlinks.
    pub fn home(&self) -> &std::path::Path {
        &self.home_root
    }

    /// The exact identifier length.
    pub fn identifier_length(&self) -> usize {
        self.length
    }

    /// The optional subdirectory below the home.
    pub fn subdirectory(&self) -> Option<&str> {
        self.subdir.as_deref()
    }

    /// True if password login is enabled.
    pub fn password_login_enabled(&self) -> bool {
        self.password_login
    }

    /// True if the secret may equal the identifier.
    pub fn username_as_secret_allowed(&self) -> bool {
        self.allow_username_as_secret
    }
}

/// The full engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How usernames are validated.
    pub username: UsernamePolicy,
    /// The static password policy.
    pub password: PasswordPolicy,
    /// Home directory of the base account when no base account file exists.
    ///
    /// Alternative-mode links are matched against the base account's directory, never against
    /// this value directly.
    pub user_home: PathBuf,
    /// Largest digest file that will be read.
    pub max_digest_size: usize,
    /// Which salt bytes PBKDF2 verification uses.
    pub salt_encoding: SaltEncoding,
    alt_modes: Vec<AltModeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            username: UsernamePolicy::default(),
            password: PasswordPolicy::default(),
            user_home: PathBuf::from(DEFAULT_USER_HOME),
            max_digest_size: DEFAULT_MAX_DIGEST_SIZE,
            salt_encoding: SaltEncoding::default(),
            alt_modes: vec![
                AltModeConfig::share_link(),
                AltModeConfig::job_session_mount(),
                AltModeConfig::notebook_session_mount(),
            ],
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment, logging malformed values to `logger`.
    pub fn from_env(logger: &slog::Logger) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), logger)
    }

    /// Reads the configuration through the given variable lookup.
    pub fn from_lookup<F>(lookup: F, logger: &slog::Logger) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup, logger };
        let mut share_link = AltModeConfig::share_link()
            .home_root(env.path("SHARELINK_HOME", DEFAULT_SHARELINK_HOME))
            .length(env.number("SHARELINK_LENGTH", DEFAULT_SHARELINK_LENGTH))
            .subdir(Some(env.text("SHARELINK_SUBDIR", DEFAULT_SHARELINK_SUBDIR)).filter(|s| !s.is_empty()));
        let mut job_session_mount = AltModeConfig::job_session_mount()
            .home_root(env.path("JOBSIDMOUNT_HOME", DEFAULT_JOBSIDMOUNT_HOME))
            .length(env.number("JOBSIDMOUNT_LENGTH", DEFAULT_JOBSIDMOUNT_LENGTH));
        let mut notebook_session_mount = AltModeConfig::notebook_session_mount()
            .home_root(env.path("JUPYTERSIDMOUNT_HOME", DEFAULT_JUPYTERSIDMOUNT_HOME))
            .length(env.number("JUPYTERSIDMOUNT_LENGTH", DEFAULT_JUPYTERSIDMOUNT_LENGTH));
        if env.flag("ENABLE_JOBSIDMOUNT_WITH_PASSWORD") {
            job_session_mount = job_session_mount.password_login(true);
        }
        if env.flag("ENABLE_JUPYTERSIDMOUNT_WITH_PASSWORD") {
            notebook_session_mount = notebook_session_mount.password_login(true);
        }
        if env.flag("DISABLE_SHARELINK_WITH_PASSWORD") {
            share_link = share_link.password_login(false);
        }

        let mut alt_modes = Vec::with_capacity(3);
        for (disable, mode) in [
            ("DISABLE_SHARELINK", share_link),
            ("DISABLE_JOBSIDMOUNT", job_session_mount),
            ("DISABLE_JUPYTERSIDMOUNT", notebook_session_mount),
        ] {
            if !env.flag(disable) {
                alt_modes.push(mode);
            }
        }

        let salt_encoding = match env.raw("DIGEST_SALT_ENCODING").as_deref() {
            None | Some("decoded") => SaltEncoding::Decoded,
            Some("stored") => SaltEncoding::AsStored,
            Some(other) => {
                slog::warn!(logger, "Unknown DIGEST_SALT_ENCODING, using decoded salt"; "value" => other);
                SaltEncoding::Decoded
            }
        };

        Config {
            username: UsernamePolicy {
                pattern: env.text("USERNAME_REGEX", DEFAULT_USERNAME_REGEX),
                min_length: env.number("USERNAME_MIN_LENGTH", DEFAULT_USERNAME_MIN_LENGTH),
                max_length: env.number("USERNAME_MAX_LENGTH", DEFAULT_USERNAME_MAX_LENGTH),
            },
            password: PasswordPolicy {
                min_length: env.number("PASSWORD_MIN_LENGTH", DEFAULT_PASSWORD_MIN_LENGTH),
                max_length: env.number("PASSWORD_MAX_LENGTH", DEFAULT_PASSWORD_MAX_LENGTH),
                min_classes: env.number("PASSWORD_MIN_CLASSES", DEFAULT_PASSWORD_MIN_CLASSES),
            },
            user_home: env.path("USER_HOME", DEFAULT_USER_HOME),
            max_digest_size: env.number("MAX_DIGEST_SIZE", DEFAULT_MAX_DIGEST_SIZE),
            salt_encoding,
            alt_modes: sorted(alt_modes),
        }
    }

    /// Replaces the alternative login modes. They are kept in precedence order.
    pub fn with_alt_modes(mut self, modes: Vec<AltModeConfig>) -> Self {
        self.alt_modes = sorted(modes);
        self
    }

    /// Sets the canonical home root of regular accounts.
    pub fn with_user_home<P: Into<PathBuf>>(mut self, user_home: P) -> Self {
        self.user_home = user_home.into();
        self
    }

    /// The enabled alternative login modes in precedence order.
    pub fn alt_modes(&self) -> &[AltModeConfig] {
        &self.alt_modes
    }
}

fn sorted(mut modes: Vec<AltModeConfig>) -> Vec<AltModeConfig> {
    modes.retain(|m| m.mode != LoginMode::Standard);
    modes.sort_by_key(|m| m.mode);
    modes.dedup_by_key(|m| m.mode);
    modes
}

struct Env<'a, F> {
    lookup: F,
    logger: &'a slog::Logger,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn text(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.text(key, default))
    }

    fn number(&self, key: &str, default: usize) -> usize {
        match self.raw(key) {
            None => default,
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    slog::warn!(self.logger, "Ignoring non-numeric configuration value"; "key" => key, "value" => &value, "default" => default);
                    default
                }
            },
        }
    }

    fn flag(&self, key: &str) -> bool {
        match self.raw(key) {
            None => false,
            Some(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        }
    }
}

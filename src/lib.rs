#![cfg_attr(docsrs, feature(doc_cfg))]

//! libmigauth makes the authentication decisions behind the MiG PAM login module and the NSS
//! user-resolution module.
//!
//! Virtual users never exist in `/etc/passwd`. Every valid username resolves to one base system
//! account with a per-user home below a canonical home root. Besides regular accounts, share
//! links and session mounts are recognised: symlinks named after a random identifier that point
//! back into a user's home.
//!
//! # Quick start
//!
//! ```no_run
//! use libmigauth::{BaseAccount, Config, NssResolver, PamAuthenticator, PamRequest};
//! use slog::Drain;
//! use std::sync::Arc;
//!
//! let logger = slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!());
//! let config = Config::from_env(&logger);
//! let base = BaseAccount::from_file(libmigauth::account::DEFAULT_BASE_ACCOUNT_FILE)
//!     .unwrap_or_else(|_| BaseAccount::from_config(&config));
//! let resolver = Arc::new(NssResolver::new(config.clone(), base));
//!
//! let pam = PamAuthenticator::new(config, resolver);
//! let request = PamRequest::new("alice", "sshd").secret("Correct horse 1".into());
//! let outcome = pam.authenticate(request, None);
//! println!("{:?}", libmigauth::PamStatus::from(&outcome));
//! ```

pub mod account;
pub mod altlogin;
pub mod audit;
pub mod digest;
pub(crate) mod error;
pub mod identity;
pub mod nss;
pub mod options;
pub(crate) mod outcome;
pub mod pam;
pub mod path;
pub mod policy;

pub use crate::account::{AccountDatabase, BaseAccount, ShadowRecord, SystemAccount, SystemAccounts, UserRecord};
pub use crate::error::{ConfigError, RejectReason};
pub use crate::nss::NssResolver;
pub use crate::options::Config;
pub use crate::outcome::{AuthOutcome, NssStatus, PamStatus};
pub use crate::pam::{Conversation, ConversationError, PamAuthenticator, PamRequest};
pub use migauth_core::secret::Secret;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#![allow(dead_code)]

use libmigauth::audit::{AttemptReport, AuditCollaborator, CollaboratorError, ErrorKind};
use libmigauth::digest::{DigestRecord, PASSWORD_FILENAME};
use libmigauth::options::AltModeConfig;
use libmigauth::{BaseAccount, Config, NssResolver, PamAuthenticator, Secret};
use std::fs;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A share link or session mount identifier of the default length.
pub const LINK_ID: &str = "abcdefghijklmnopqrstuvwxyz0123456789abcdef";

pub fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

/// A throwaway MiG state tree: user homes, share links and session mounts.
pub struct Site {
    _tmp: TempDir,
    pub user_home: PathBuf,
    pub sharelink_home: PathBuf,
    pub jobsidmount_home: PathBuf,
    pub jupytersidmount_home: PathBuf,
    pub config: Config,
}

impl Site {
    pub fn new() -> Site {
        let tmp = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let user_home = root.join("user_home");
        let sharelink_home = root.join("sharelink_home");
        let jobsidmount_home = root.join("jobsidmount_home");
        let jupytersidmount_home = root.join("jupytersidmount_home");
        fs::create_dir_all(&user_home).unwrap();
        fs::create_dir_all(sharelink_home.join("read-write")).unwrap();
        fs::create_dir_all(&jobsidmount_home).unwrap();
        fs::create_dir_all(&jupytersidmount_home).unwrap();
        let config = Config::default().with_user_home(&user_home).with_alt_modes(vec![
            AltModeConfig::share_link().home_root(&sharelink_home),
            AltModeConfig::job_session_mount().home_root(&jobsidmount_home),
            AltModeConfig::notebook_session_mount().home_root(&jupytersidmount_home),
        ]);
        Site {
            _tmp: tmp,
            user_home,
            sharelink_home,
            jobsidmount_home,
            jupytersidmount_home,
            config,
        }
    }

    pub fn with_alt_modes(mut self, modes: Vec<AltModeConfig>) -> Site {
        self.config = self.config.with_alt_modes(modes);
        self
    }

    pub fn add_user(&self, name: &str) -> PathBuf {
        let home = self.user_home.join(name);
        fs::create_dir_all(&home).unwrap();
        home
    }

    pub fn set_password(&self, name: &str, service_dir: &str, password: &str) -> PathBuf {
        let record = DigestRecord::derive(
            &Secret::from(password),
            b"0123456789ab",
            NonZeroU32::new(1000).unwrap(),
            32,
        )
        .unwrap();
        self.write_digest(name, service_dir, &format!("{}\n", record))
    }

    pub fn write_digest(&self, name: &str, service_dir: &str, content: &str) -> PathBuf {
        let dir = self.user_home.join(name).join(format!(".{}", service_dir));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(PASSWORD_FILENAME);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn share_link(&self, id: &str, target: &Path) {
        symlink(target, self.sharelink_home.join("read-write").join(id)).unwrap();
    }

    pub fn job_mount(&self, id: &str, target: &Path) {
        symlink(target, self.jobsidmount_home.join(id)).unwrap();
    }

    pub fn notebook_mount(&self, id: &str, target: &Path) {
        symlink(target, self.jupytersidmount_home.join(id)).unwrap();
    }

    pub fn base_account(&self) -> BaseAccount {
        BaseAccount::from_config(&self.config)
    }

    pub fn resolver(&self) -> NssResolver {
        NssResolver::new(self.config.clone(), self.base_account()).logger(logger())
    }

    pub fn authenticator(&self, collaborator: Arc<Recorder>) -> PamAuthenticator {
        PamAuthenticator::new(self.config.clone(), Arc::new(self.resolver()))
            .collaborator(collaborator)
            .logger(logger())
    }
}

/// A collaborator that records every report and answers as configured.
#[derive(Debug)]
pub struct Recorder {
    pub reports: Mutex<Vec<AttemptReport>>,
    pub rate_limited: bool,
    pub unavailable: bool,
    pub authorize: bool,
    pub accessible: bool,
    pub twofactor: bool,
    pub report_fails: bool,
}

impl Default for Recorder {
    fn default() -> Self {
        Recorder {
            reports: Mutex::new(vec![]),
            rate_limited: false,
            unavailable: false,
            authorize: true,
            accessible: true,
            twofactor: false,
            report_fails: false,
        }
    }
}

impl Recorder {
    pub fn reports(&self) -> Vec<AttemptReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn single_report(&self) -> AttemptReport {
        let reports = self.reports();
        assert_eq!(1, reports.len(), "expected exactly one report, got {:?}", reports);
        reports.into_iter().next().unwrap()
    }
}

impl AuditCollaborator for Recorder {
    fn report_attempt(&self, report: &AttemptReport) -> Result<bool, CollaboratorError> {
        self.reports.lock().unwrap().push(report.clone());
        if self.report_fails {
            return Err(ErrorKind::Unavailable.into());
        }
        Ok(self.authorize)
    }

    fn hit_rate_limit(&self, _username: &str, _address: Option<IpAddr>) -> Result<bool, CollaboratorError> {
        if self.unavailable {
            return Err(ErrorKind::TimedOut.into());
        }
        Ok(self.rate_limited)
    }

    fn check_account_accessible(&self, _username: &str) -> Result<bool, CollaboratorError> {
        Ok(self.accessible)
    }

    fn check_twofactor_session(&self, _username: &str, _address: Option<IpAddr>) -> Result<bool, CollaboratorError> {
        Ok(self.twofactor)
    }
}

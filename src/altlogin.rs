//! Matching of alternative login modes.
//!
//! Share links and session mounts are not accounts. They are symlinks named after a random
//! identifier that point back into a user's home. A presented username is only taken for such an
//! identifier if the link structurally checks out: correct length, an actual symlink, a target
//! inside the canonical home root and a readable target.

use crate::error::RejectReason;
use crate::identity::ValidIdentity;
use crate::options::AltModeConfig;
use crate::path;
use migauth_core::audit::LoginMode;
use migauth_core::secret::Secret;
use nix::unistd::{AccessFlags, access};
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// An alternative login mode whose structural check passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltMatch<'a> {
    config: &'a AltModeConfig,
    candidate: PathBuf,
}

impl AltMatch<'_> {
    /// The matched mode.
    pub fn mode(&self) -> LoginMode {
        self.config.mode()
    }

    /// The configuration of the matched mode.
    pub fn config(&self) -> &AltModeConfig {
        self.config
    }

    /// The symlink that matched. Not resolved.
    pub fn candidate(&self) -> &Path {
        &self.candidate
    }
}

/// The verdict on a secret presented for a matched alternative mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltDecision {
    /// The secret is accepted.
    Accepted,
    /// The mode does not allow password login at all.
    Disabled,
    /// The secret is wrong.
    Mismatch,
}

/// Why a candidate symlink did not pass the structural check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkMiss {
    NotALink,
    OutsideHomeRoot,
    Unreadable,
    Escapes,
}

/// The symlink that would represent `name` in the given mode.
pub fn candidate_path(mode: &AltModeConfig, name: &ValidIdentity) -> Result<PathBuf, RejectReason> {
    match mode.subdirectory() {
        Some(subdir) => path::join_checked(mode.home(), &[subdir, name.name()]),
        None => path::join_checked(mode.home(), &[name.name()]),
    }
}

/// Finds the first mode, in precedence order, whose structural check passes for `name`.
///
/// A candidate path that does not fit the path buffer is a hard failure rather than a miss.
pub fn match_structural<'a>(
    name: &ValidIdentity,
    home_root: &Path,
    modes: &'a [AltModeConfig],
    logger: &slog::Logger,
) -> Result<Option<AltMatch<'a>>, RejectReason> {
    for mode in modes {
        if name.name().len() != mode.identifier_length() {
            continue;
        }
        let candidate = candidate_path(mode, name)?;
        match check_link(&candidate, home_root) {
            Ok(()) => {
                slog::debug!(logger, "Structural match"; "mode" => %mode.mode(), "candidate" => %candidate.display());
                return Ok(Some(AltMatch { config: mode, candidate }));
            }
            Err(miss) => {
                slog::debug!(logger, "No structural match"; "mode" => %mode.mode(), "candidate" => %candidate.display(), "miss" => ?miss);
            }
        }
    }
    Ok(None)
}

fn check_link(candidate: &Path, home_root: &Path) -> Result<(), LinkMiss> {
    let target = fs::read_link(candidate).map_err(|_| LinkMiss::NotALink)?;
    let root = home_root.as_os_str().as_bytes();
    let target = target.as_os_str().as_bytes();
    if root.is_empty() || !target.starts_with(root) {
        return Err(LinkMiss::OutsideHomeRoot);
    }
    let known_good = Path::new(OsStr::from_bytes(&target[..root.len()]));
    access(known_good, AccessFlags::R_OK).map_err(|_| LinkMiss::Unreadable)?;

    // A textual prefix still admits `<root>/../elsewhere`. Make sure the fully resolved link
    // stays below the resolved root.
    let resolved_root = fs::canonicalize(home_root).map_err(|_| LinkMiss::Unreadable)?;
    let resolved = fs::canonicalize(candidate).map_err(|_| LinkMiss::Escapes)?;
    if !resolved.starts_with(&resolved_root) {
        return Err(LinkMiss::Escapes);
    }
    Ok(())
}

/// Decides on the secret presented for a matched mode.
pub fn decide_secret(mode: &AltModeConfig, name: &ValidIdentity, secret: &Secret) -> AltDecision {
    if !mode.password_login_enabled() {
        return AltDecision::Disabled;
    }
    if mode.username_as_secret_allowed() && secret.as_bytes() == name.name().as_bytes() {
        AltDecision::Accepted
    } else {
        AltDecision::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;
    use crate::options::UsernamePolicy;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::symlink;

    const LINK_ID: &str = "abcdefghij";

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn identity(name: &str) -> ValidIdentity {
        identity::validate(name, &UsernamePolicy::default()).unwrap()
    }

    struct Layout {
        _tmp: tempfile::TempDir,
        home_root: PathBuf,
        share_home: PathBuf,
        mount_home: PathBuf,
    }

    fn layout() -> Layout {
        let tmp = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        let home_root = base.join("user_home");
        let share_home = base.join("sharelink_home");
        let mount_home = base.join("mount_home");
        fs::create_dir_all(home_root.join("alice/shared")).unwrap();
        fs::create_dir_all(share_home.join("read-write")).unwrap();
        fs::create_dir_all(&mount_home).unwrap();
        Layout {
            _tmp: tmp,
            home_root,
            share_home,
            mount_home,
        }
    }

    fn modes(layout: &Layout) -> Vec<AltModeConfig> {
        vec![
            AltModeConfig::share_link().home_root(&layout.share_home).length(LINK_ID.len()),
            AltModeConfig::job_session_mount().home_root(&layout.mount_home).length(LINK_ID.len()),
        ]
    }

    #[test]
    fn share_link_into_home_root_matches() {
        let layout = layout();
        symlink(layout.home_root.join("alice/shared"), layout.share_home.join("read-write").join(LINK_ID)).unwrap();
        let modes = modes(&layout);

        let found = match_structural(&identity(LINK_ID), &layout.home_root, &modes, &logger()).unwrap().unwrap();
        assert_eq!(LoginMode::ShareLink, found.mode());
        assert_eq!(layout.share_home.join("read-write").join(LINK_ID), found.candidate());
    }

    #[test]
    fn earlier_mode_wins_when_both_match() {
        let layout = layout();
        let target = layout.home_root.join("alice/shared");
        symlink(&target, layout.share_home.join("read-write").join(LINK_ID)).unwrap();
        symlink(&target, layout.mount_home.join(LINK_ID)).unwrap();
        let modes = modes(&layout);

        let found = match_structural(&identity(LINK_ID), &layout.home_root, &modes, &logger()).unwrap().unwrap();
        assert_eq!(LoginMode::ShareLink, found.mode());
    }

    #[test]
    fn later_mode_matches_when_earlier_is_absent() {
        let layout = layout();
        symlink(layout.home_root.join("alice/shared"), layout.mount_home.join(LINK_ID)).unwrap();
        let modes = modes(&layout);

        let found = match_structural(&identity(LINK_ID), &layout.home_root, &modes, &logger()).unwrap().unwrap();
        assert_eq!(LoginMode::JobSessionMount, found.mode());
    }

    #[test]
    fn wrong_length_never_matches() {
        let layout = layout();
        let modes = modes(&layout);
        assert_eq!(None, match_structural(&identity("alice"), &layout.home_root, &modes, &logger()).unwrap());
    }

    #[test]
    fn plain_directory_is_not_a_link() {
        let layout = layout();
        fs::create_dir(layout.mount_home.join(LINK_ID)).unwrap();
        let modes = modes(&layout);
        assert_eq!(None, match_structural(&identity(LINK_ID), &layout.home_root, &modes, &logger()).unwrap());
    }

    #[test]
    fn link_outside_home_root_does_not_match() {
        let layout = layout();
        let outside = tempfile::tempdir().unwrap();
        symlink(outside.path(), layout.mount_home.join(LINK_ID)).unwrap();
        let modes = modes(&layout);
        assert_eq!(None, match_structural(&identity(LINK_ID), &layout.home_root, &modes, &logger()).unwrap());
    }

    #[test]
    fn link_escaping_through_dotdot_does_not_match() {
        let layout = layout();
        let escape = layout.home_root.join("..").join("mount_home");
        symlink(escape, layout.mount_home.join(LINK_ID)).unwrap();
        let modes = modes(&layout);
        assert_eq!(None, match_structural(&identity(LINK_ID), &layout.home_root, &modes, &logger()).unwrap());
    }

    #[test]
    fn sibling_with_common_prefix_passes_textual_check_only() {
        let layout = layout();
        let sibling = PathBuf::from(format!("{}_evil", layout.home_root.display()));
        fs::create_dir(&sibling).unwrap();
        symlink(&sibling, layout.mount_home.join(LINK_ID)).unwrap();
        let modes = modes(&layout);
        assert_eq!(None, match_structural(&identity(LINK_ID), &layout.home_root, &modes, &logger()).unwrap());
    }

    #[test]
    fn overlong_candidate_is_a_hard_failure() {
        let layout = layout();
        let name = "a".repeat(120);
        let deep = layout.share_home.join("x".repeat(2000));
        let modes = vec![AltModeConfig::share_link().home_root(deep).length(name.len())];
        assert_eq!(
            Err(RejectReason::PathTooLong),
            match_structural(&identity(&name), &layout.home_root, &modes, &logger())
        );
    }

    #[test]
    fn share_link_secret_must_equal_identifier() {
        let mode = AltModeConfig::share_link();
        let id = identity(LINK_ID);
        assert_eq!(AltDecision::Accepted, decide_secret(&mode, &id, &Secret::from(LINK_ID)));
        assert_eq!(AltDecision::Mismatch, decide_secret(&mode, &id, &Secret::from("abcdefghiJ")));
    }

    #[test]
    fn session_mounts_refuse_passwords_by_default() {
        let id = identity(LINK_ID);
        let job = AltModeConfig::job_session_mount();
        assert_eq!(AltDecision::Disabled, decide_secret(&job, &id, &Secret::from(LINK_ID)));
        let enabled = job.password_login(true);
        assert_eq!(AltDecision::Accepted, decide_secret(&enabled, &id, &Secret::from(LINK_ID)));
        assert_eq!(AltDecision::Mismatch, decide_secret(&enabled, &id, &Secret::from("secret")));
        let strict = enabled.allow_username_as_secret(false);
        assert_eq!(AltDecision::Mismatch, decide_secret(&strict, &id, &Secret::from(LINK_ID)));
        let notebook = AltModeConfig::notebook_session_mount();
        assert_eq!(AltDecision::Disabled, decide_secret(&notebook, &id, &Secret::from("anything")));
    }
}

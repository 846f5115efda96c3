//! Bounded path construction and home directory resolution.

use crate::error::RejectReason;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Size of the path buffer. A path must fit including its terminating NUL.
pub const MAX_PATH_LENGTH: usize = 2048;

/// A canonical, existing, readable directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHome {
    path: PathBuf,
}

impl ResolvedHome {
    /// The canonical path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consumes self, returning the canonical path.
    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl fmt::Display for ResolvedHome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for ResolvedHome {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

fn check_length(path: &Path) -> Result<(), RejectReason> {
    if path.as_os_str().len() >= MAX_PATH_LENGTH {
        return Err(RejectReason::PathTooLong);
    }
    Ok(())
}

/// Appends the parts to `base`, failing if the result would not fit the path buffer.
///
/// Leading slashes of the parts are ignored so that a part can never replace the base. Empty
/// parts are skipped.
pub fn join_checked<S: AsRef<str>>(base: &Path, parts: &[S]) -> Result<PathBuf, RejectReason> {
    let mut path = base.to_path_buf();
    for part in parts {
        let part = part.as_ref().trim_start_matches('/');
        if !part.is_empty() {
            path.push(part);
        }
    }
    check_length(&path)?;
    Ok(path)
}

/// Canonicalizes `raw` and confirms it is a readable directory.
pub fn resolve(raw: &Path) -> Result<ResolvedHome, RejectReason> {
    check_length(raw)?;
    let canonical = fs::canonicalize(raw).map_err(|_| RejectReason::PathResolutionFailed)?;
    check_length(&canonical)?;
    // Listing proves both that it is a directory and that we may read it.
    fs::read_dir(&canonical).map_err(|_| RejectReason::NotADirectory)?;
    Ok(ResolvedHome { path: canonical })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn joins_parts_below_base() {
        let path = join_checked(Path::new("/home"), &["alice", "/.ssh", "", "authorized_passwords"]).unwrap();
        assert_eq!(PathBuf::from("/home/alice/.ssh/authorized_passwords"), path);
    }

    #[test]
    fn rejects_paths_that_do_not_fit() {
        let fits = "a".repeat(MAX_PATH_LENGTH - "/home/".len() - 1);
        assert_eq!(MAX_PATH_LENGTH - 1, join_checked(Path::new("/home"), &[&fits]).unwrap().as_os_str().len());

        let too_long = "a".repeat(MAX_PATH_LENGTH - "/home/".len());
        assert_eq!(Err(RejectReason::PathTooLong), join_checked(Path::new("/home"), &[&too_long]));
    }

    #[test]
    fn resolves_existing_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("alice");
        fs::create_dir(&dir).unwrap();

        let resolved = resolve(&tmp.path().join("alice/../alice")).unwrap();
        assert_eq!(fs::canonicalize(&dir).unwrap(), resolved.path());
    }

    #[test]
    fn resolves_through_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("target");
        fs::create_dir(&target).unwrap();
        std::os::unix::fs::symlink(&target, tmp.path().join("link")).unwrap();

        let resolved = resolve(&tmp.path().join("link")).unwrap();
        assert_eq!(fs::canonicalize(&target).unwrap(), resolved.into_path_buf());
    }

    #[test]
    fn resolution_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("alice")).unwrap();
        let raw = tmp.path().join("alice");
        assert_eq!(resolve(&raw), resolve(&raw));
        let first = resolve(&raw).unwrap();
        assert_eq!(first, resolve(first.path()).unwrap());
        let missing = tmp.path().join("bob");
        assert_eq!(resolve(&missing), resolve(&missing));
    }

    #[test]
    fn missing_path_fails_resolution() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(Err(RejectReason::PathResolutionFailed), resolve(&tmp.path().join("nobody")));
    }

    #[test]
    fn regular_file_is_not_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert_eq!(Err(RejectReason::NotADirectory), resolve(&file));
    }

    #[test]
    fn overlong_input_is_rejected_before_touching_the_filesystem() {
        let raw = PathBuf::from(format!("/{}", "a".repeat(MAX_PATH_LENGTH)));
        assert_eq!(Err(RejectReason::PathTooLong), resolve(&raw));
    }
}

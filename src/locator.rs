//! Discovery of the working copy that a push should be deployed into.

use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};

/// Marker that identifies the root of a git working copy.
pub const VCS_MARKER: &str = ".git/config";

/// Upper bound on the number of ancestors inspected by a single walk.
pub const MAX_SEARCH_DEPTH: usize = 64;

/// Root directory of a working copy. A [`VCS_MARKER`] exists directly under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    root: PathBuf,
}

impl RepoLocation {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> PathBuf {
        self.root.join(".git")
    }
}

fn has_vcs_marker(dir: &Path) -> bool {
    dir.join(VCS_MARKER).exists()
}

/// Returns the first ancestor of `start` (itself included) that satisfies
/// `found`, giving up at the filesystem root or after [`MAX_SEARCH_DEPTH`] steps.
/// The filesystem root itself is never returned.
pub fn find_upward(start: &Path, mut found: impl FnMut(&Path) -> bool) -> Option<PathBuf> {
    start
        .ancestors()
        .take(MAX_SEARCH_DEPTH)
        .take_while(|dir| dir.parent().is_some())
        .find(|dir| found(*dir))
        .map(Path::to_path_buf)
}

/// Finds the working copy root.
///
/// A configured path is trusted as-is once it carries the git marker. Otherwise
/// the search runs in two phases from `start_dir`: first up to the directory
/// holding `project_marker`, then further up to the first directory with a git
/// marker. This tolerates the service being installed deep inside the project.
pub fn locate(
    configured_path: Option<&Path>,
    start_dir: &Path,
    project_marker: &str,
) -> Result<RepoLocation> {
    if let Some(path) = configured_path {
        if !has_vcs_marker(path) {
            return Err(DeployError::InvalidConfiguredPath(path.to_path_buf()));
        }
        return Ok(RepoLocation {
            root: path.to_path_buf(),
        });
    }

    let project_dir = find_upward(start_dir, |dir| dir.join(project_marker).exists())
        .ok_or(DeployError::RepoNotFound)?;

    find_upward(&project_dir, has_vcs_marker)
        .map(|root| RepoLocation { root })
        .ok_or(DeployError::RepoNotFound)
}

/// Directory the running service lives in, used as the default search origin.
pub fn default_search_origin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

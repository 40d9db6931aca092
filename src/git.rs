// Read-only git queries, answered by the `git` binary in the working
// directory. A failing or missing git yields "unknown" answers; the
// pipeline treats those as defaults rather than errors.

use std::path::PathBuf;
use std::process::Command;

use crate::naming::RepoIdentity;

/// What the pipeline needs to know about the local checkout.
pub trait RepoInspector {
    fn identity(&self) -> RepoIdentity;

    /// `git diff-index --name-status HEAD` output when the tree is dirty.
    fn uncommitted_changes(&self) -> Option<String>;

    /// Whether the current branch has commits its upstream lacks.
    fn is_ahead_of_upstream(&self) -> bool;
}

pub struct GitCli {
    workdir: Option<PathBuf>,
}

impl GitCli {
    pub fn new() -> Self {
        GitCli { workdir: None }
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        GitCli {
            workdir: Some(dir.into()),
        }
    }

    /// Trimmed stdout of a successful, non-empty git invocation.
    fn output(&self, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        let out = match cmd.output() {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(?args, error = %e, "git not runnable");
                return None;
            }
        };
        if !out.status.success() {
            tracing::debug!(?args, status = %out.status, "git exited with failure");
            return None;
        }
        let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl RepoInspector for GitCli {
    fn identity(&self) -> RepoIdentity {
        RepoIdentity {
            user_email: self.output(&["config", "user.email"]),
            branch: self.output(&["branch", "--show-current"]),
            remote_url: self.output(&["remote", "get-url", "origin"]),
        }
    }

    fn uncommitted_changes(&self) -> Option<String> {
        self.output(&["diff-index", "--name-status", "HEAD"])
    }

    fn is_ahead_of_upstream(&self) -> bool {
        self.output(&["status"])
            .map(|status| status.contains("branch is ahead"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn outside_a_repository_everything_is_unknown() {
        let dir = TempDir::new().unwrap();
        let git = GitCli::in_dir(dir.path());
        assert!(git.uncommitted_changes().is_none());
        assert!(!git.is_ahead_of_upstream());
        let identity = git.identity();
        assert!(identity.branch.is_none());
        assert!(identity.remote_url.is_none());
    }
}

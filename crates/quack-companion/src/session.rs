//! Active repository identity, derived from the workspace's git remotes.
use std::fmt;
use std::path::Path;

use regex::Regex;
use schemars::JsonSchema;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no workspace opened")]
    NoWorkspace,

    #[error("no remote GitHub URL found")]
    NoRemote,

    #[error("git error: {0}")]
    Git(String),
}

/// `owner/name` of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct RepoIdentity {
    pub owner: String,
    pub name: String,
}

impl RepoIdentity {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Run `<git> remote -v` in the workspace and parse the `origin` fetch URL.
///
/// A directory that is not a git repository has no origin and reports
/// [`SessionError::NoRemote`]; only a git binary that cannot be spawned is a
/// [`SessionError::Git`].
pub async fn resolve_repository_identity(
    workspace: Option<&Path>,
    git: &str,
) -> Result<RepoIdentity, SessionError> {
    let workspace = workspace
        .filter(|p| p.is_dir())
        .ok_or(SessionError::NoWorkspace)?;

    let output = Command::new(git)
        .args(["remote", "-v"])
        .current_dir(workspace)
        .output()
        .await
        .map_err(|e| SessionError::Git(format!("failed to run {git} remote -v: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(workspace = %workspace.display(), stderr = %stderr.trim(), "git remote -v failed");
        return Err(SessionError::NoRemote);
    }

    parse_origin(&String::from_utf8_lossy(&output.stdout)).ok_or(SessionError::NoRemote)
}

/// Extract the identity from `git remote -v` output.
///
/// Recognised forms for the `origin` fetch URL:
/// - `git@github.com:owner/name.git`
/// - `ssh://git@github.com/owner/name.git`
/// - `https://github.com/owner/name.git` (optionally with userinfo)
///
/// The `.git` suffix is optional.
pub fn parse_origin(output: &str) -> Option<RepoIdentity> {
    let remote_re = Regex::new(
        r"(?mi)^origin\s+(?:git@github\.com:|ssh://git@github\.com/|https?://(?:[^@/\s]+@)?github\.com/)([^/\s]+)/([^/\s]+?)(?:\.git)?/?\s+\(fetch\)",
    )
    .expect("valid regex");

    let caps = remote_re.captures(output)?;
    Some(RepoIdentity {
        owner: caps[1].to_string(),
        name: caps[2].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(owner: &str, name: &str) -> RepoIdentity {
        RepoIdentity {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn ssh_and_https_resolve_to_the_same_identity() {
        let ssh = "origin\tgit@github.com:acme/widgets.git (fetch)\norigin\tgit@github.com:acme/widgets.git (push)\n";
        let https = "origin\thttps://github.com/acme/widgets.git (fetch)\norigin\thttps://github.com/acme/widgets.git (push)\n";
        assert_eq!(parse_origin(ssh), Some(identity("acme", "widgets")));
        assert_eq!(parse_origin(https), Some(identity("acme", "widgets")));
    }

    #[test]
    fn suffixless_and_ssh_scheme_urls() {
        assert_eq!(
            parse_origin("origin\thttps://github.com/acme/widgets (fetch)\n"),
            Some(identity("acme", "widgets"))
        );
        assert_eq!(
            parse_origin("origin\tssh://git@github.com/acme/widgets.git (fetch)\n"),
            Some(identity("acme", "widgets"))
        );
        assert_eq!(
            parse_origin("origin\thttps://bot@GitHub.com/acme/widgets.rs.git (fetch)\n"),
            Some(identity("acme", "widgets.rs"))
        );
    }

    #[test]
    fn only_origin_counts() {
        let output = "upstream\tgit@github.com:other/widgets.git (fetch)\n\
                      origin\tgit@github.com:fork/widgets.git (fetch)\n";
        assert_eq!(parse_origin(output), Some(identity("fork", "widgets")));

        let no_origin = "upstream\tgit@github.com:other/widgets.git (fetch)\n";
        assert_eq!(parse_origin(no_origin), None);
    }

    #[test]
    fn unrecognised_hosts_are_rejected() {
        assert_eq!(parse_origin("origin\tgit@gitlab.com:acme/widgets.git (fetch)\n"), None);
        assert_eq!(parse_origin("origin\t/srv/git/widgets.git (fetch)\n"), None);
        assert_eq!(parse_origin(""), None);
    }

    #[tokio::test]
    async fn missing_workspace_is_reported() {
        assert!(matches!(
            resolve_repository_identity(None, "git").await,
            Err(SessionError::NoWorkspace)
        ));
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(matches!(
            resolve_repository_identity(Some(&missing), "git").await,
            Err(SessionError::NoWorkspace)
        ));
    }

    #[tokio::test]
    async fn unspawnable_git_is_a_git_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_repository_identity(Some(dir.path()), "/nonexistent/quack-git").await,
            Err(SessionError::Git(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_origin_from_git_output() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let git = dir.path().join("fake-git");
        std::fs::write(
            &git,
            "#!/bin/sh\nprintf 'origin\\tgit@github.com:acme/widgets.git (fetch)\\n'\n",
        )
        .unwrap();
        std::fs::set_permissions(&git, std::fs::Permissions::from_mode(0o755)).unwrap();

        let resolved = resolve_repository_identity(Some(dir.path()), git.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(resolved, identity("acme", "widgets"));
    }

    #[test]
    fn display_is_full_name() {
        assert_eq!(identity("acme", "widgets").to_string(), "acme/widgets");
        assert_eq!(identity("acme", "widgets").full_name(), "acme/widgets");
    }
}

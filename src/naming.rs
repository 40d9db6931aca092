// Default upload prefix and testing-group name.
//
// Used only when neither is given explicitly, so that running the tool
// with no flags still produces a unique, recognisable deployment.

use chrono::{DateTime, Utc};

const NO_REPO: &str = "no-repo";
const NO_BRANCH: &str = "no-branch";
const NO_USER: &str = "no-user";

/// Repository facts the names are derived from. Empty or missing values
/// fall back to sentinels rather than failing.
#[derive(Debug, Clone, Default)]
pub struct RepoIdentity {
    pub user_email: Option<String>,
    pub branch: Option<String>,
    pub remote_url: Option<String>,
}

pub struct RemoteNamer {
    user: String,
    branch: String,
    repo: String,
    timestamp: String,
}

impl RemoteNamer {
    pub fn new(identity: &RepoIdentity, now: DateTime<Utc>) -> Self {
        let user = identity
            .user_email
            .as_deref()
            .and_then(user_name)
            .unwrap_or(NO_USER)
            .to_string();
        let branch = non_empty(identity.branch.as_deref())
            .unwrap_or(NO_BRANCH)
            .to_string();
        let repo = identity
            .remote_url
            .as_deref()
            .and_then(repo_name)
            .unwrap_or_else(|| NO_REPO.to_string());

        Self {
            user,
            branch,
            repo,
            timestamp: timestamp(now),
        }
    }

    /// `/<repo>/<YYYY-MM-DD-HH-MM-SS>-<user>-<branch>/`
    pub fn derive_prefix(&self) -> String {
        format!(
            "/{}/{}-{}-{}/",
            self.repo,
            self.timestamp,
            self.user,
            sanitize_branch(&self.branch)
        )
    }

    /// `<user> <branch>`, with the branch as git reports it.
    pub fn derive_group_name(&self) -> String {
        format!("{} {}", self.user, self.branch).trim().to_string()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Local part of an email address.
fn user_name(email: &str) -> Option<&str> {
    let email = email.trim();
    let local = email.split('@').next().unwrap_or(email);
    non_empty(Some(local))
}

/// Last path segment of a remote URL without its `.git` suffix.
fn repo_name(remote_url: &str) -> Option<String> {
    let last = remote_url.trim().trim_end_matches('/').rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    non_empty(Some(name)).map(str::to_string)
}

/// Replaces everything outside `[A-Za-z0-9_-]` with `-`.
pub fn sanitize_branch(branch: &str) -> String {
    branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// UTC time as `YYYY-MM-DD-HH-MM-SS`.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H-%M-%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap()
    }

    fn identity(email: &str, branch: &str, remote: &str) -> RepoIdentity {
        RepoIdentity {
            user_email: Some(email.into()),
            branch: Some(branch.into()),
            remote_url: Some(remote.into()),
        }
    }

    #[test]
    fn sanitizes_branch_names() {
        assert_eq!(sanitize_branch("feature/foo bar#1"), "feature-foo-bar-1");
        assert_eq!(sanitize_branch("fix_ABC-12"), "fix_ABC-12");
        assert_eq!(sanitize_branch("ветка"), "-----");
        assert_eq!(sanitize_branch("a[b]^c`"), "a-b--c-");
    }

    #[test]
    fn formats_timestamp_without_fraction() {
        let now = at() + chrono::Duration::milliseconds(987);
        assert_eq!(timestamp(now), "2024-03-09-07-05-02");
    }

    #[test]
    fn derives_prefix_and_name() {
        let namer = RemoteNamer::new(
            &identity(
                "alice@example.com\n",
                "feature/x y\n",
                "git@github.com:acme/shop-front.git\n",
            ),
            at(),
        );
        assert_eq!(
            namer.derive_prefix(),
            "/shop-front/2024-03-09-07-05-02-alice-feature-x-y/"
        );
        assert_eq!(namer.derive_group_name(), "alice feature/x y");
    }

    #[test]
    fn https_remote_is_supported() {
        let namer = RemoteNamer::new(
            &identity("bob@corp", "main", "https://gitlab.com/team/app"),
            at(),
        );
        assert_eq!(namer.derive_prefix(), "/app/2024-03-09-07-05-02-bob-main/");
    }

    #[test]
    fn missing_identity_falls_back_to_sentinels() {
        let namer = RemoteNamer::new(&RepoIdentity::default(), at());
        assert_eq!(
            namer.derive_prefix(),
            "/no-repo/2024-03-09-07-05-02-no-user-no-branch/"
        );
        assert_eq!(namer.derive_group_name(), "no-user no-branch");

        let namer = RemoteNamer::new(&identity("", "  ", ""), at());
        assert_eq!(
            namer.derive_prefix(),
            "/no-repo/2024-03-09-07-05-02-no-user-no-branch/"
        );
    }
}

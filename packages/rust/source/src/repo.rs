//! Repository references.

use std::fmt;

use url::Url;

use docsteward_shared::{DocstewardError, Result};

/// Branch used when none is given explicitly.
pub const DEFAULT_BRANCH: &str = "main";

/// An owner/repo/branch triple identifying one source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepoRef {
    /// Parse a repository reference from either a browser URL
    /// (`https://github.com/acme/widget`, optionally `/tree/{branch}`) or
    /// the short `owner/repo` form.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim().trim_end_matches('/');
        if input.is_empty() {
            return Err(DocstewardError::config("repository reference is empty"));
        }

        if input.contains("://") {
            let url = Url::parse(input).map_err(|e| {
                DocstewardError::config(format!("invalid repository url {input:?}: {e}"))
            })?;
            let segments: Vec<&str> = url
                .path_segments()
                .map(|s| s.filter(|p| !p.is_empty()).collect())
                .unwrap_or_default();
            return match segments.as_slice() {
                [owner, repo] => Ok(Self::new(owner, repo, DEFAULT_BRANCH)),
                [owner, repo, "tree", branch @ ..] if !branch.is_empty() => {
                    Ok(Self::new(owner, repo, &branch.join("/")))
                }
                _ => Err(DocstewardError::config(format!(
                    "repository url {input:?} must look like https://host/owner/repo"
                ))),
            };
        }

        match input.split('/').collect::<Vec<_>>().as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
                Ok(Self::new(owner, repo, DEFAULT_BRANCH))
            }
            _ => Err(DocstewardError::config(format!(
                "repository reference {input:?} must be owner/repo or a repository url"
            ))),
        }
    }

    fn new(owner: &str, repo: &str, branch: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.strip_suffix(".git").unwrap_or(repo).to_string(),
            branch: branch.to_string(),
        }
    }

    /// Replace the branch, keeping owner and repo.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_form() {
        let repo = RepoRef::parse("acme/widget").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.repo, "widget");
        assert_eq!(repo.branch, "main");
    }

    #[test]
    fn parses_browser_url() {
        let repo = RepoRef::parse("https://github.com/acme/widget/").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.repo, "widget");
        assert_eq!(repo.branch, "main");
    }

    #[test]
    fn parses_branch_from_tree_url() {
        let repo = RepoRef::parse("https://github.com/acme/widget/tree/feature/login").unwrap();
        assert_eq!(repo.branch, "feature/login");
    }

    #[test]
    fn strips_git_suffix() {
        let repo = RepoRef::parse("https://github.com/acme/widget.git").unwrap();
        assert_eq!(repo.repo, "widget");
    }

    #[test]
    fn with_branch_overrides_default() {
        let repo = RepoRef::parse("acme/widget").unwrap().with_branch("develop");
        assert_eq!(repo.branch, "develop");
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", "acme", "acme/", "/widget", "a/b/c", "https://github.com/acme"] {
            assert!(RepoRef::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn display_includes_branch() {
        let repo = RepoRef::parse("acme/widget").unwrap();
        assert_eq!(repo.to_string(), "acme/widget@main");
    }
}

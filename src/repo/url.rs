use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const SSH_USER_PREFIX: &str = "git@";
const GIT_SUFFIX: &str = ".git";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error(
        "Invalid repository URL format: {0}; URL must be in the format git@<host>:<owner>/<repo>.git"
    )]
    Format(String),
    #[error("Invalid repository URL: {0} has an empty {1}")]
    EmptyPart(String, &'static str),
}

/// SSH-style repository address, `git@<host>:<owner>/<repo>.git`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    raw: String,
    host: String,
    path: String,
}

impl RepoUrl {
    /// # Errors
    /// Returns `UrlError` when `raw` is not in SSH form.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let raw = raw.trim();
        let format_err = || UrlError::Format(raw.to_string());

        let rest = raw.strip_prefix(SSH_USER_PREFIX).ok_or_else(format_err)?;
        if rest.matches(':').count() != 1 {
            return Err(format_err());
        }
        let (host, path) = rest.split_once(':').ok_or_else(format_err)?;
        if !path.contains('/') || !path.ends_with(GIT_SUFFIX) {
            return Err(format_err());
        }
        if host.is_empty() {
            return Err(UrlError::EmptyPart(raw.to_string(), "host"));
        }
        let url = Self {
            raw: raw.to_string(),
            host: host.to_string(),
            path: path.to_string(),
        };
        if url.name().is_empty() {
            return Err(UrlError::EmptyPart(raw.to_string(), "repository name"));
        }
        Ok(url)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `<owner>/<repo>.git`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment without `.git`.
    pub fn name(&self) -> &str {
        let segment = self.path.rsplit('/').next().unwrap_or(&self.path);
        segment.strip_suffix(GIT_SUFFIX).unwrap_or(segment)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for RepoUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

//! Vendored library version tag, read from repository history
//!
//! The vendored sources are merged in as squashed subtree commits titled
//! `Merge <vendor> <tag>`. The newest such commit touching the component
//! directory names the tag the build embeds.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

/// Library whose merges are searched for by default
pub const DEFAULT_VENDOR: &str = "wmbusmeters";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionTagError {
    #[error("git is not available: {0}")]
    GitNotAvailable(String),
    #[error("git command failed in {path}: {stderr}")]
    GitCommand { path: PathBuf, stderr: String },
    #[error("No '{vendor}' merge commit found in the history of {path}")]
    NoMatch { vendor: String, path: PathBuf },
}

/// Extract the tag from `git log --oneline` output
///
/// The newest line is the first one; its last whitespace separated token
/// is the tag.
pub fn parse_tag(log: &str) -> Option<&str> {
    log.lines()
        .find(|line| !line.trim().is_empty())?
        .split_whitespace()
        .last()
}

/// Run git in `search_root` and return the vendored version tag
pub fn resolve_tag(search_root: &Path, vendor: &str) -> Result<String, VersionTagError> {
    let output = Command::new("git")
        .arg("log")
        .arg("--oneline")
        .arg(format!("--grep=^Merge {}", vendor))
        .arg(".")
        .current_dir(search_root)
        .output()
        .map_err(|e| VersionTagError::GitNotAvailable(e.to_string()))?;

    if !output.status.success() {
        return Err(VersionTagError::GitCommand {
            path: search_root.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let log = String::from_utf8_lossy(&output.stdout);
    debug!(path = %search_root.display(), lines = log.lines().count(), "git log finished");

    parse_tag(&log)
        .map(str::to_string)
        .ok_or_else(|| VersionTagError::NoMatch {
            vendor: vendor.to_string(),
            path: search_root.to_path_buf(),
        })
}

/// Where the tag comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSource {
    /// Query repository history
    Git { search_root: PathBuf, vendor: String },
    /// Use a known tag, no history lookup
    Fixed(String),
}

/// Resolves the tag at most once per build
#[derive(Debug)]
pub struct VersionTagResolver {
    source: TagSource,
    tag: OnceCell<String>,
}

impl VersionTagResolver {
    pub fn new(source: TagSource) -> Self {
        Self {
            source,
            tag: OnceCell::new(),
        }
    }

    pub fn git(search_root: impl Into<PathBuf>, vendor: impl Into<String>) -> Self {
        Self::new(TagSource::Git {
            search_root: search_root.into(),
            vendor: vendor.into(),
        })
    }

    pub fn fixed(tag: impl Into<String>) -> Self {
        Self::new(TagSource::Fixed(tag.into()))
    }

    pub fn source(&self) -> &TagSource {
        &self.source
    }

    /// The tag, computed on first call
    pub fn tag(&self) -> Result<&str, VersionTagError> {
        if let Some(tag) = self.tag.get() {
            return Ok(tag);
        }
        let tag = match &self.source {
            TagSource::Fixed(tag) => tag.clone(),
            TagSource::Git {
                search_root,
                vendor,
            } => resolve_tag(search_root, vendor)?,
        };
        info!(tag = %tag, "Resolved vendored library version");
        Ok(self.tag.get_or_init(|| tag))
    }
}

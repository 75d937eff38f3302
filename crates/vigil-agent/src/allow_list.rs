//! Command allow-list
//!
//! When an allow-list is configured, a command only runs if one entry
//! accounts for all of it: the entry's executable and each of its
//! arguments must appear in the command, and nothing but whitespace may
//! remain once they are removed. Argument order does not matter.

use crate::config::load_by_extension;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One permitted command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListEntry {
    /// Executable as written in the command
    pub exec: String,
    /// Arguments that must all be present
    #[serde(default)]
    pub args: Vec<String>,
    /// Expected sha512 of the resolved executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
    /// Apply the check's own environment variables
    #[serde(default)]
    pub enable_env: bool,
}

/// Outcome of checking a command against the allow-list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// No allow-list is configured
    Unrestricted,
    /// A matching entry permits the command
    Allowed {
        /// Whether the check's environment variables may be applied
        enable_env: bool,
    },
    /// The command must not run
    Denied(String),
}

impl Authorization {
    /// Whether the command may run
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied(_))
    }

    /// Whether the check's own environment variables may be applied
    pub fn env_enabled(&self) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Allowed { enable_env } => *enable_env,
            Self::Denied(_) => false,
        }
    }
}

/// Find the first entry that accounts for the whole command
pub fn match_allow_list<'a>(command: &str, entries: &'a [AllowListEntry]) -> Option<&'a AllowListEntry> {
    entries.iter().find(|entry| entry_matches(command, entry))
}

fn entry_matches(command: &str, entry: &AllowListEntry) -> bool {
    if entry.exec.is_empty() || !command.contains(&entry.exec) {
        return false;
    }
    let mut remainder = command.replacen(&entry.exec, "", 1);
    for arg in &entry.args {
        if !remainder.contains(arg.as_str()) {
            return false;
        }
        remainder = remainder.replacen(arg.as_str(), "", 1);
    }
    remainder.trim().is_empty()
}

/// Configured allow-list, read-only once loaded
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<AllowListEntry>,
}

impl AllowList {
    /// Create an allow-list from entries
    pub fn new(entries: Vec<AllowListEntry>) -> Self {
        Self { entries }
    }

    /// Load from a YAML or JSON file; no path means an empty list
    pub fn load(path: Option<&Path>) -> Result<Self, AgentError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let entries: Vec<AllowListEntry> = load_by_extension(path)?;
        info!("Loaded {} allow-list entries from {}", entries.len(), path.display());
        Ok(Self::new(entries))
    }

    /// Whether the list is empty, leaving execution unrestricted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured entries
    pub fn entries(&self) -> &[AllowListEntry] {
        &self.entries
    }

    /// Decide whether `command` may run
    ///
    /// `search_path` is the `PATH` the command will run with; it is used
    /// to resolve the executable when the matching entry pins a sha512.
    pub async fn authorize(&self, command: &str, search_path: Option<&str>) -> Authorization {
        if self.is_empty() {
            return Authorization::Unrestricted;
        }
        let Some(entry) = match_allow_list(command, &self.entries) else {
            warn!("Command not in allow list: {}", command);
            return Authorization::Denied(format!("no allow-list entry matches {:?}", command));
        };

        if let Some(expected) = entry.sha512.as_deref() {
            let Some(path) = resolve_executable(&entry.exec, search_path) else {
                warn!("Cannot resolve {} to verify its sha512", entry.exec);
                return Authorization::Denied(format!("executable {} not found", entry.exec));
            };
            match tokio::fs::read(&path).await {
                Ok(content) => {
                    let actual = format!("{:x}", Sha512::digest(&content));
                    if !actual.eq_ignore_ascii_case(expected) {
                        warn!("sha512 mismatch for {}", path.display());
                        return Authorization::Denied(format!("sha512 mismatch for {}", path.display()));
                    }
                    debug!("Verified sha512 of {}", path.display());
                }
                Err(e) => {
                    return Authorization::Denied(format!("cannot read {}: {}", path.display(), e));
                }
            }
        }

        Authorization::Allowed {
            enable_env: entry.enable_env,
        }
    }
}

/// Resolve an executable the way a shell would look it up
fn resolve_executable(exec: &str, search_path: Option<&str>) -> Option<PathBuf> {
    if exec.contains(std::path::MAIN_SEPARATOR) || exec.contains('/') {
        let path = PathBuf::from(exec);
        return path.is_file().then_some(path);
    }
    let search_path = search_path.map(str::to_string).or_else(|| std::env::var("PATH").ok())?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(exec))
        .find(|candidate| candidate.is_file())
}

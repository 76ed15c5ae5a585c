//! Build identification

use std::fmt;

/// Version of the remote API spoken by this build
pub const API_VERSION: &str = "1.10";

/// Version and commit the binary was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
}

impl BuildInfo {
    /// Values baked in at compile time; set `RUNE_GITCOMMIT` when building to record the commit.
    pub const fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: match option_env!("RUNE_GITCOMMIT") {
                Some(commit) => commit,
                None => "unknown",
            },
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rune version {}, build {}", self.version, self.git_commit)
    }
}

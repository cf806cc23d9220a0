//! Path filter rules.

use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};
use tracing::warn;

/// Suffix of the engine's own temporary files.
pub const TEMP_SUFFIX: &str = ".reposync-tmp";

const DEFAULT_PATTERNS: &[&str] = &[
    "~$*",
    "*.tmp",
    "*.swp",
    ".~lock.*",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
];

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Decides which local paths and remote names are never synchronized.
///
/// Patterns are matched against each path component and against the whole
/// relative path, so `*.tmp` ignores temporaries at any depth and
/// `build/*` ignores everything under a top-level `build` folder.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
    reject_invalid_names: bool,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        let mut rules = Self::empty();
        for pattern in DEFAULT_PATTERNS {
            rules = rules.with_pattern(pattern);
        }
        rules.reject_invalid_names = true;
        rules
    }
}

impl IgnoreRules {
    /// Rules that only exclude the engine's own temporaries.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            reject_invalid_names: false,
        }
    }

    /// Adds a glob pattern. Invalid patterns are logged and skipped.
    pub fn with_pattern(mut self, pattern: &str) -> Self {
        match Pattern::new(pattern) {
            Ok(compiled) => self.patterns.push(compiled),
            Err(e) => warn!(pattern, error = %e, "Skipping invalid ignore pattern"),
        }
        self
    }

    /// Sets whether names invalid on common filesystems are ignored.
    pub fn with_invalid_names_rejected(mut self, reject: bool) -> Self {
        self.reject_invalid_names = reject;
        self
    }

    /// Returns the number of configured patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Returns true if a single file or folder name is ignored.
    pub fn is_name_ignored(&self, name: &str) -> bool {
        if name.ends_with(TEMP_SUFFIX) || name.starts_with(".reposync") {
            return true;
        }
        if self.reject_invalid_names && is_invalid_name(name) {
            return true;
        }
        let options = match_options();
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(name, options))
    }

    /// Returns true if a path relative to the sync root is ignored.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        let names_ignored = relative.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .map_or(true, |name| self.is_name_ignored(name)),
            _ => false,
        });
        if names_ignored {
            return true;
        }
        let options = match_options();
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path_with(relative, options))
    }
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn is_invalid_name(name: &str) -> bool {
    name.contains(INVALID_CHARS)
        || name.ends_with('.')
        || name.ends_with(' ')
        || name.chars().any(char::is_control)
}

//! File matching - ordered include/exclude glob rules over a base directory.

use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSetError {
    #[error("failed to parse file pattern \"{0}\": {1}")]
    Pattern(String, glob::PatternError),

    #[error("file iteration failed: {0}")]
    Iteration(#[from] glob::GlobError),
}

/// A glob rule relative to the file set base
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobRule {
    Include(String),
    Exclude(String),
}

/// Files below `base` selected by an ordered list of rules.
///
/// For each candidate path the last rule that matches it decides whether it
/// belongs to the set, so a later exclusion overrides an earlier inclusion.
/// Wildcards never match a leading `.`, so dotfiles and hidden directories
/// are only selected by patterns that name them literally.
#[derive(Debug, Clone)]
pub struct FileSet {
    base: PathBuf,
    rules: Vec<GlobRule>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

impl FileSet {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), rules: vec![] }
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.rules.push(GlobRule::Include(pattern.to_string()));
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.rules.push(GlobRule::Exclude(pattern.to_string()));
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn rules(&self) -> &[GlobRule] {
        &self.rules
    }

    /// Sorted, de-duplicated regular files selected by the rules. A missing
    /// base directory yields an empty set.
    pub fn matches(&self) -> Result<Vec<PathBuf>, FileSetError> {
        let compiled = self.compile()?;
        let mut found = BTreeSet::new();

        if !self.base.is_dir() {
            return Ok(vec![]);
        }

        for rule in &self.rules {
            let GlobRule::Include(pattern) = rule else { continue };
            let base = Pattern::escape(&self.base.to_string_lossy());
            let full = format!("{}/{}", base.trim_end_matches('/'), pattern);
            let paths = glob::glob_with(&full, MATCH_OPTIONS)
                .map_err(|e| FileSetError::Pattern(pattern.clone(), e))?;
            for path in paths {
                let path = path?;
                if path.is_file() && self.selected(&compiled, &path) {
                    found.insert(path);
                }
            }
        }

        Ok(found.into_iter().collect())
    }

    /// Path relative to the base, if it lies below it
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.base).ok()
    }

    fn compile(&self) -> Result<Vec<(bool, Pattern)>, FileSetError> {
        self.rules.iter()
            .map(|rule| {
                let (include, pattern) = match rule {
                    GlobRule::Include(p) => (true, p),
                    GlobRule::Exclude(p) => (false, p),
                };
                Pattern::new(pattern)
                    .map(|compiled| (include, compiled))
                    .map_err(|e| FileSetError::Pattern(pattern.clone(), e))
            })
            .collect()
    }

    fn selected(&self, compiled: &[(bool, Pattern)], path: &Path) -> bool {
        let Some(relative) = self.relative(path) else { return false };
        compiled.iter()
            .rev()
            .find(|(_, pattern)| pattern.matches_path_with(relative, MATCH_OPTIONS))
            .map_or(false, |(include, _)| *include)
    }
}

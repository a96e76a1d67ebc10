//! Configuration System - Layout, Build Settings, Lint Rules

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::hashing::DEFAULT_HASH_LENGTH;
use crate::lint::Severity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Root directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Invalid config {0}: {1}")]
    Parse(PathBuf, serde_json::Error),

    #[error("Invalid setting for rule \"{0}\": {1}")]
    InvalidRuleSetting(String, String),

    #[error("Hash length must be between 1 and 64, got {0}")]
    InvalidHashLength(usize),
}

/// Directory layout of a project, derived from the configured root.
///
/// Every source path lives below `<root>/src/main/web` and is mirrored to
/// `<root>/src/main/dist/web`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    source_root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            source_root: root.as_ref().join("src").join("main"),
        }
    }

    /// Like `new`, but requires the root to be an existing directory
    pub fn existing(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ConfigError::RootNotFound(root.to_path_buf()));
        }
        Ok(Self::new(root))
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn web_dir(&self) -> PathBuf {
        self.source_root.join("web")
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.source_root.join("dist").join("web")
    }

    pub fn template_dir(&self) -> PathBuf {
        self.web_dir().join("template")
    }

    pub fn css_dir(&self) -> PathBuf {
        self.web_dir().join("static").join("css")
    }

    pub fn js_dir(&self) -> PathBuf {
        self.web_dir().join("static").join("js")
    }

    /// `/`-separated path of a directory below the web root, as it appears
    /// in template URLs (`static/css/lib`). Empty for the root itself and for
    /// paths outside it.
    pub fn web_url(&self, path: &Path) -> String {
        match path.strip_prefix(self.web_dir()) {
            Ok(relative) => relative.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => String::new(),
        }
    }

    /// Map a path inside the source web tree to its destination counterpart
    /// (`web/...` → `dist/web/...`). Paths outside the web tree are returned
    /// unchanged.
    pub fn mirror(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(self.web_dir()) {
            Ok(relative) => self.dist_dir().join(relative),
            Err(_) => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceMapMode {
    #[default]
    External,
    Inline,
}

/// External program used in place of a built-in minifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCommand {
    pub command: Vec<String>,
}

/// Build settings, read from an optional JSON file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
    #[serde(default)]
    pub source_maps: SourceMapMode,
    #[serde(default)]
    pub stylelint_config: Option<PathBuf>,
    #[serde(default)]
    pub eslint_config: Option<PathBuf>,
    #[serde(default)]
    pub css_minifier: Option<ToolCommand>,
    #[serde(default)]
    pub js_minifier: Option<ToolCommand>,
}

fn default_hash_length() -> usize { DEFAULT_HASH_LENGTH }

pub const DEFAULT_STYLELINT_CONFIG: &str = "stylelint.json";
pub const DEFAULT_ESLINT_CONFIG: &str = "eslint.json";

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            hash_length: DEFAULT_HASH_LENGTH,
            source_maps: SourceMapMode::default(),
            stylelint_config: None,
            eslint_config: None,
            css_minifier: None,
            js_minifier: None,
        }
    }
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: BuildConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.hash_length == 0 || self.hash_length > 64 {
            return Err(ConfigError::InvalidHashLength(self.hash_length));
        }
        Ok(())
    }

    pub fn css_lint_rules(&self) -> Result<LintConfig, ConfigError> {
        LintConfig::resolve(self.stylelint_config.as_deref(), DEFAULT_STYLELINT_CONFIG, RuleDialect::Stylelint, LintConfig::default_css)
    }

    pub fn js_lint_rules(&self) -> Result<LintConfig, ConfigError> {
        LintConfig::resolve(self.eslint_config.as_deref(), DEFAULT_ESLINT_CONFIG, RuleDialect::Eslint, LintConfig::default_js)
    }
}

/// A single rule's resolved setting: its severity and an optional option value
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSetting {
    pub severity: Option<Severity>,
    pub option: Option<Value>,
}

impl RuleSetting {
    pub fn error() -> Self {
        Self { severity: Some(Severity::Error), option: None }
    }

    pub fn warning() -> Self {
        Self { severity: Some(Severity::Warning), option: None }
    }

    pub fn with_option(mut self, option: Value) -> Self {
        self.option = Some(option);
        self
    }

    pub fn enabled(&self) -> bool {
        self.severity.is_some()
    }

    pub fn parse(dialect: RuleDialect, rule: &str, value: &Value) -> Result<Self, ConfigError> {
        match dialect {
            RuleDialect::Eslint => Self::parse_eslint(rule, value),
            RuleDialect::Stylelint => Self::parse_stylelint(rule, value),
        }
    }

    /// `"off" | "warn" | "error"`, `0 | 1 | 2`, `true | false | null`, or
    /// `[level, option, ...]`
    fn parse_eslint(rule: &str, value: &Value) -> Result<Self, ConfigError> {
        let invalid = |msg: &str| ConfigError::InvalidRuleSetting(rule.to_string(), msg.to_string());
        match value {
            Value::Null | Value::Bool(false) => Ok(Self { severity: None, option: None }),
            Value::Bool(true) => Ok(Self::error()),
            Value::String(_) | Value::Number(_) => match parse_level(value) {
                Some(severity) => Ok(Self { severity, option: None }),
                None => Err(invalid("expected off, warn, error, 0, 1 or 2")),
            },
            Value::Array(items) => {
                let first = items.first().ok_or_else(|| invalid("empty array"))?;
                let severity = parse_level(first)
                    .ok_or_else(|| invalid("first element must be off, warn, error, 0, 1 or 2"))?;
                Ok(Self { severity, option: items.get(1).cloned() })
            }
            Value::Object(_) => Err(invalid("expected a severity level or [level, option]")),
        }
    }

    /// `null | false` turn the rule off. Any other value is the primary
    /// option at error level; `[option, { "severity": .. }]` sets the level.
    fn parse_stylelint(rule: &str, value: &Value) -> Result<Self, ConfigError> {
        let invalid = |msg: &str| ConfigError::InvalidRuleSetting(rule.to_string(), msg.to_string());
        match value {
            Value::Null | Value::Bool(false) => Ok(Self { severity: None, option: None }),
            Value::Bool(true) => Ok(Self::error()),
            Value::Array(items) => {
                let first = items.first().ok_or_else(|| invalid("empty array"))?;
                if first.is_null() {
                    return Ok(Self { severity: None, option: None });
                }
                let severity = match items.get(1).and_then(|v| v.get("severity")) {
                    None => Some(Severity::Error),
                    Some(level) => match level.as_str() {
                        Some("warning") => Some(Severity::Warning),
                        Some("error") => Some(Severity::Error),
                        _ => return Err(invalid("severity must be \"warning\" or \"error\"")),
                    },
                };
                Ok(Self { severity, option: Some(first.clone()) })
            }
            _ => Ok(Self::error().with_option(value.clone())),
        }
    }

    /// Numeric option, used by length-limit rules
    pub fn option_usize(&self) -> Option<usize> {
        self.option.as_ref().and_then(|v| match v {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::Object(map) => map.get("code").and_then(Value::as_u64).map(|n| n as usize),
            _ => None,
        })
    }
}

fn parse_level(value: &Value) -> Option<Option<Severity>> {
    match value {
        Value::String(s) => match s.as_str() {
            "off" => Some(None),
            "warn" | "warning" => Some(Some(Severity::Warning)),
            "error" => Some(Some(Severity::Error)),
            _ => None,
        },
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(None),
            Some(1) => Some(Some(Severity::Warning)),
            Some(2) => Some(Some(Severity::Error)),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawLintConfig {
    #[serde(default)]
    rules: BTreeMap<String, Value>,
}

/// Value conventions of a rule file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDialect {
    /// `eslint.json`: the value is a severity level
    Eslint,
    /// `stylelint.json`: the value is the rule's primary option
    Stylelint,
}

/// Rule configuration in the shape of `eslint.json` / `stylelint.json`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LintConfig {
    rules: BTreeMap<String, RuleSetting>,
}

impl LintConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(path: &Path, content: &str, dialect: RuleDialect) -> Result<Self, ConfigError> {
        let raw: RawLintConfig = serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        let mut config = Self::new();
        for (name, value) in &raw.rules {
            config.rules.insert(name.clone(), RuleSetting::parse(dialect, name, value)?);
        }
        Ok(config)
    }

    pub fn load(path: &Path, dialect: RuleDialect) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json(path, &content, dialect)
    }

    /// An explicitly configured file must exist; the default location is
    /// optional and falls back to the built-in rule set.
    fn resolve(
        explicit: Option<&Path>,
        default_path: &str,
        dialect: RuleDialect,
        fallback: fn() -> Self,
    ) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path, dialect),
            None => {
                let path = Path::new(default_path);
                if path.is_file() {
                    Self::load(path, dialect)
                } else {
                    tracing::debug!(path = default_path, "no lint config found, using built-in rules");
                    Ok(fallback())
                }
            }
        }
    }

    pub fn rule(mut self, name: &str, setting: RuleSetting) -> Self {
        self.rules.insert(name.to_string(), setting);
        self
    }

    pub fn get(&self, name: &str) -> Option<&RuleSetting> {
        self.rules.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RuleSetting)> {
        self.rules.iter()
    }

    pub fn default_css() -> Self {
        Self::new()
            .rule("block-no-empty", RuleSetting::error())
            .rule("color-no-invalid-hex", RuleSetting::error())
            .rule("comment-no-empty", RuleSetting::warning())
            .rule("declaration-block-no-duplicate-properties", RuleSetting::error())
    }

    pub fn default_js() -> Self {
        Self::new()
            .rule("no-debugger", RuleSetting::error())
            .rule("eqeqeq", RuleSetting::error())
            .rule("no-trailing-spaces", RuleSetting::warning())
    }
}

//! Lint System - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! The gate maps violations to a pipeline decision.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{LintConfig, RuleSetting};
use crate::scan::{self, LineIndex, Segment, SegmentKind, Syntax};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.pad("warning"),
            Severity::Error => f.pad("error"),
        }
    }
}

/// One finding, positions are 1-based
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// What a lint finding does to the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LintGate {
    /// Print violations, never fail
    #[default]
    Report,
    /// Print violations, fail once all files are linted if any is an error
    FailOnError,
}

/// Source prepared for rules: original text, masked code and positions
pub struct LintSource<'a> {
    pub text: &'a str,
    pub code: String,
    pub segments: Vec<Segment>,
    index: LineIndex,
}

impl<'a> LintSource<'a> {
    pub fn new(text: &'a str, syntax: Syntax) -> Self {
        let segments = scan::scan(text, syntax);
        let code = scan::mask(text, &segments);
        Self { text, code, segments, index: LineIndex::new(text) }
    }

    /// 1-based (line, column) of a byte offset
    pub fn position(&self, offset: usize) -> (usize, usize) {
        let (line, column) = self.index.position(self.text, offset);
        (line + 1, column + 1)
    }
}

/// Rule trait - produces violations for a single source
pub trait LintRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, source: &LintSource<'_>, setting: &RuleSetting) -> Vec<(usize, String)>;
}

// --- CSS Rules ---

pub struct BlockNoEmpty;

impl LintRule for BlockNoEmpty {
    fn name(&self) -> &'static str { "block-no-empty" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        let bytes = source.code.as_bytes();
        let mut found = vec![];
        for (i, _) in source.code.match_indices('{') {
            let rest = &bytes[i + 1..];
            if let Some(p) = rest.iter().position(|b| !b.is_ascii_whitespace()) {
                if rest[p] == b'}' {
                    found.push((i, "Unexpected empty block".to_string()));
                }
            }
        }
        found
    }
}

pub struct ColorNoInvalidHex;

impl LintRule for ColorNoInvalidHex {
    fn name(&self) -> &'static str { "color-no-invalid-hex" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        let bytes = source.code.as_bytes();
        let mut found = vec![];
        let mut depth = 0usize;
        let mut in_value = false;
        let mut in_url = false;
        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b'{' => { depth += 1; in_value = false; }
                b'}' => { depth = depth.saturating_sub(1); in_value = false; }
                b':' if depth > 0 => in_value = true,
                b';' => in_value = false,
                // `url(#id)` is a fragment reference, not a color
                b'(' => in_url = i >= 3 && bytes[i - 3..i].eq_ignore_ascii_case(b"url"),
                b')' => in_url = false,
                b'#' if in_value && !in_url => {
                    let word: String = source.code[i + 1..].chars()
                        .take_while(|c| c.is_ascii_alphanumeric())
                        .collect();
                    let valid_len = matches!(word.len(), 3 | 4 | 6 | 8);
                    if !valid_len || !word.chars().all(|c| c.is_ascii_hexdigit()) {
                        found.push((i, format!("Unexpected invalid hex color \"#{}\"", word)));
                    }
                }
                _ => {}
            }
        }
        found
    }
}

pub struct CommentNoEmpty;

impl LintRule for CommentNoEmpty {
    fn name(&self) -> &'static str { "comment-no-empty" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        source.segments.iter()
            .filter(|s| s.kind == SegmentKind::Comment)
            .filter(|s| {
                let text = s.text(source.text);
                let inner = text.strip_prefix("/*").unwrap_or(text);
                let inner = inner.strip_suffix("*/").unwrap_or(inner);
                inner.trim().is_empty()
            })
            .map(|s| (s.start, "Unexpected empty comment".to_string()))
            .collect()
    }
}

pub struct DeclarationBlockNoDuplicateProperties;

impl LintRule for DeclarationBlockNoDuplicateProperties {
    fn name(&self) -> &'static str { "declaration-block-no-duplicate-properties" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        let code = &source.code;
        let mut found = vec![];
        // stack of property sets, one per open block
        let mut blocks: Vec<HashSet<String>> = vec![];
        let mut decl_start = 0;
        for (i, b) in code.bytes().enumerate() {
            match b {
                b'{' => {
                    blocks.push(HashSet::new());
                    decl_start = i + 1;
                }
                b'}' | b';' => {
                    if let Some(props) = blocks.last_mut() {
                        let decl = &code[decl_start..i];
                        if let Some((name, _)) = decl.split_once(':') {
                            let name = name.trim().to_ascii_lowercase();
                            let offset = decl_start + (decl.len() - decl.trim_start().len());
                            if !name.is_empty() && !name.contains(char::is_whitespace) && !props.insert(name.clone()) {
                                found.push((offset, format!("Unexpected duplicate \"{}\"", name)));
                            }
                        }
                    }
                    if b == b'}' {
                        blocks.pop();
                    }
                    decl_start = i + 1;
                }
                _ => {}
            }
        }
        found
    }
}

pub struct MaxLineLength {
    name: &'static str,
}

impl MaxLineLength {
    pub const DEFAULT_LIMIT: usize = 120;

    pub fn css() -> Self { Self { name: "max-line-length" } }
    pub fn js() -> Self { Self { name: "max-len" } }
}

impl LintRule for MaxLineLength {
    fn name(&self) -> &'static str { self.name }

    fn check(&self, source: &LintSource<'_>, setting: &RuleSetting) -> Vec<(usize, String)> {
        let limit = setting.option_usize().unwrap_or(Self::DEFAULT_LIMIT);
        let mut offset = 0;
        let mut found = vec![];
        for line in source.text.split('\n') {
            let length = line.trim_end_matches('\r').chars().count();
            if length > limit {
                found.push((offset, format!("Expected line length to be no more than {} characters", limit)));
            }
            offset += line.len() + 1;
        }
        found
    }
}

// --- JS Rules ---

pub struct NoDebugger;

impl LintRule for NoDebugger {
    fn name(&self) -> &'static str { "no-debugger" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        find_word(&source.code, "debugger")
            .into_iter()
            .map(|i| (i, "Unexpected 'debugger' statement".to_string()))
            .collect()
    }
}

pub struct NoConsole;

impl LintRule for NoConsole {
    fn name(&self) -> &'static str { "no-console" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        find_word(&source.code, "console")
            .into_iter()
            .filter(|&i| source.code[i + "console".len()..].trim_start().starts_with('.'))
            .map(|i| (i, "Unexpected console statement".to_string()))
            .collect()
    }
}

pub struct Eqeqeq;

impl LintRule for Eqeqeq {
    fn name(&self) -> &'static str { "eqeqeq" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        let bytes = source.code.as_bytes();
        let mut found = vec![];
        let mut i = 0;
        while i + 1 < bytes.len() {
            let op = &bytes[i..i + 2];
            if (op == b"==" || op == b"!=") && bytes.get(i + 2) != Some(&b'=') {
                let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                let is_double = op == b"!=" || !matches!(prev, b'=' | b'!' | b'<' | b'>');
                if is_double {
                    let (expected, actual) = if op == b"==" { ("===", "==") } else { ("!==", "!=") };
                    found.push((i, format!("Expected '{}' and instead saw '{}'", expected, actual)));
                }
                i += 2;
                continue;
            }
            if op == b"==" || op == b"!=" {
                // strict operator, skip all three characters
                i += 3;
                continue;
            }
            i += 1;
        }
        found
    }
}

pub struct NoTrailingSpaces;

impl LintRule for NoTrailingSpaces {
    fn name(&self) -> &'static str { "no-trailing-spaces" }

    fn check(&self, source: &LintSource<'_>, _setting: &RuleSetting) -> Vec<(usize, String)> {
        let mut offset = 0;
        let mut found = vec![];
        for line in source.text.split('\n') {
            let content = line.trim_end_matches('\r');
            let trimmed = content.trim_end_matches([' ', '\t']);
            if trimmed.len() < content.len() {
                found.push((offset + trimmed.len(), "Trailing spaces not allowed".to_string()));
            }
            offset += line.len() + 1;
        }
        found
    }
}

fn find_word(code: &str, word: &str) -> Vec<usize> {
    let bytes = code.as_bytes();
    code.match_indices(word)
        .map(|(i, _)| i)
        .filter(|&i| {
            let before = i == 0 || !scan::is_ident_byte(bytes[i - 1]);
            let after = bytes.get(i + word.len()).map_or(true, |&b| !scan::is_ident_byte(b));
            before && after
        })
        .collect()
}

/// Linter trait - the seam between the pipeline and a lint implementation
pub trait Linter: Send + Sync {
    fn lint(&self, path: &Path, source: &str) -> Vec<Violation>;
}

/// Linter that applies the built-in rules enabled by a `LintConfig`
pub struct RuleLinter {
    syntax: Syntax,
    rules: Vec<Box<dyn LintRule>>,
    config: LintConfig,
}

impl RuleLinter {
    pub fn css(config: LintConfig) -> Self {
        Self::new(Syntax::Css, vec![
            Box::new(BlockNoEmpty),
            Box::new(ColorNoInvalidHex),
            Box::new(CommentNoEmpty),
            Box::new(DeclarationBlockNoDuplicateProperties),
            Box::new(MaxLineLength::css()),
        ], config)
    }

    pub fn js(config: LintConfig) -> Self {
        Self::new(Syntax::Js, vec![
            Box::new(NoDebugger),
            Box::new(NoConsole),
            Box::new(Eqeqeq),
            Box::new(NoTrailingSpaces),
            Box::new(MaxLineLength::js()),
        ], config)
    }

    fn new(syntax: Syntax, rules: Vec<Box<dyn LintRule>>, config: LintConfig) -> Self {
        for (name, _) in config.iter() {
            if !rules.iter().any(|r| r.name() == name) {
                tracing::warn!(rule = %name, "unknown lint rule, ignoring");
            }
        }
        Self { syntax, rules, config }
    }
}

impl Linter for RuleLinter {
    fn lint(&self, _path: &Path, source: &str) -> Vec<Violation> {
        let prepared = LintSource::new(source, self.syntax);
        let mut violations = vec![];

        for rule in &self.rules {
            let Some(setting) = self.config.get(rule.name()) else { continue };
            let Some(severity) = setting.severity else { continue };
            for (offset, message) in rule.check(&prepared, setting) {
                let (line, column) = prepared.position(offset);
                violations.push(Violation {
                    rule: rule.name().to_string(),
                    severity,
                    message,
                    line,
                    column,
                });
            }
        }

        violations.sort_by_key(|v| (v.line, v.column));
        violations
    }
}

/// Violations of every linted file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintReport {
    pub files: Vec<(PathBuf, Vec<Violation>)>,
}

impl LintReport {
    pub fn add(&mut self, path: PathBuf, violations: Vec<Violation>) {
        if !violations.is_empty() {
            self.files.push((path, violations));
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.files.iter()
            .flat_map(|(_, v)| v)
            .filter(|v| v.severity == severity)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl fmt::Display for LintReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, violations) in &self.files {
            writeln!(f, "{}", path.display())?;
            for v in violations {
                writeln!(f, "  {}:{}  {:<7}  {}  ({})", v.line, v.column, v.severity, v.message, v.rule)?;
            }
        }
        write!(
            f,
            "{} errors, {} warnings",
            self.count(Severity::Error),
            self.count(Severity::Warning)
        )
    }
}

//! Minification - built-in CSS/JS minifiers and external commands.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::scan::{self, LineIndex, SegmentKind, Syntax};
use crate::sourcemap::Mapping;

#[derive(Debug, Error)]
pub enum MinifyError {
    #[error("{path}: command {command:?} failed with status {status:?}: {stderr}")]
    Command {
        path: String,
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("failed to run {0}: {1}")]
    Spawn(String, std::io::Error),

    #[error("empty minifier command")]
    EmptyCommand,

    #[error("{0}: minifier output is not valid UTF-8")]
    InvalidOutput(String),
}

/// Result of a minification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minified {
    pub code: String,
    /// Mappings from `code` back to the input, `None` when unknown
    pub mappings: Option<Vec<Mapping>>,
}

/// Minifier trait - the seam between the pipeline and a minifier
pub trait Minifier: Send + Sync {
    fn minify(&self, path: &Path, source: &str) -> Result<Minified, MinifyError>;
}

/// Output buffer that tracks generated positions and records mappings
struct Emitter<'a> {
    source: &'a str,
    index: LineIndex,
    out: String,
    line: usize,
    column: usize,
    mappings: Vec<Mapping>,
}

impl<'a> Emitter<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            index: LineIndex::new(source),
            out: String::with_capacity(source.len()),
            line: 0,
            column: 0,
            mappings: vec![],
        }
    }

    fn mark(&mut self, offset: usize) {
        let (src_line, src_column) = self.index.position(self.source, offset);
        self.mappings.push(Mapping {
            gen_line: self.line,
            gen_column: self.column,
            src_line,
            src_column,
        });
    }

    fn push(&mut self, c: char) {
        self.out.push(c);
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
    }

    fn push_str(&mut self, s: &str) {
        for c in s.chars() {
            self.push(c);
        }
    }

    fn last(&self) -> Option<char> {
        self.out.chars().next_back()
    }

    fn pop(&mut self) {
        if self.out.pop().is_some() {
            self.column = self.column.saturating_sub(1);
        }
    }

    fn finish(self) -> Minified {
        Minified { code: self.out, mappings: Some(self.mappings) }
    }
}

fn is_license_comment(text: &str) -> bool {
    text.starts_with("/*!")
}

/// Comment and whitespace stripping CSS minifier
#[derive(Debug, Default, Clone, Copy)]
pub struct CssMinifier;

impl CssMinifier {
    fn tight(c: char) -> bool {
        matches!(c, '{' | '}' | ';' | ',' | '>' | ':')
    }

    /// A colon followed by `{` before any `;` or `}` belongs to a selector
    /// (`div :first-child {`), where the space in front of it is significant.
    fn is_selector_colon(code: &str, offset: usize) -> bool {
        code[offset..].bytes()
            .find(|b| matches!(b, b'{' | b';' | b'}'))
            == Some(b'{')
    }
}

impl Minifier for CssMinifier {
    fn minify(&self, _path: &Path, source: &str) -> Result<Minified, MinifyError> {
        let segments = scan::scan(source, Syntax::Css);
        let code = scan::mask(source, &segments);
        let mut emitter = Emitter::new(source);
        let mut pending_space = false;

        for segment in &segments {
            let text = segment.text(source);
            match segment.kind {
                SegmentKind::Comment if !is_license_comment(text) => pending_space = true,
                SegmentKind::Code => {
                    for (i, c) in text.char_indices() {
                        let offset = segment.start + i;
                        if c.is_whitespace() {
                            pending_space = true;
                            continue;
                        }
                        if c == '}' && emitter.last() == Some(';') {
                            emitter.pop();
                        }
                        let binds_left = Self::tight(c)
                            && !(c == ':' && Self::is_selector_colon(&code, offset));
                        let space_allowed = emitter.last().is_some_and(|prev| !Self::tight(prev) && !binds_left);
                        if pending_space && space_allowed {
                            emitter.push(' ');
                        }
                        if pending_space || emitter.last().map_or(true, Self::tight) {
                            emitter.mark(offset);
                        }
                        pending_space = false;
                        emitter.push(c);
                    }
                }
                _ => {
                    if pending_space && emitter.last().is_some_and(|p| !Self::tight(p)) {
                        emitter.push(' ');
                    }
                    pending_space = false;
                    emitter.mark(segment.start);
                    emitter.push_str(text);
                }
            }
        }

        Ok(emitter.finish())
    }
}

/// Line-preserving JS minifier.
///
/// Removes comments, indentation and blank lines and collapses whitespace.
/// Line breaks between statements are kept so automatic semicolon insertion
/// behaves exactly as in the source.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsMinifier;

impl Minifier for JsMinifier {
    fn minify(&self, _path: &Path, source: &str) -> Result<Minified, MinifyError> {
        let segments = scan::scan(source, Syntax::Js);
        let mut emitter = Emitter::new(source);
        let mut pending_space = false;
        let mut pending_newline = false;

        for segment in &segments {
            let text = segment.text(source);
            match segment.kind {
                SegmentKind::Comment if !is_license_comment(text) => {
                    // a block comment spanning lines still separates statements
                    if text.contains('\n') {
                        pending_newline = true;
                    } else {
                        pending_space = true;
                    }
                }
                SegmentKind::Code => {
                    for (i, c) in text.char_indices() {
                        if c == '\n' {
                            pending_newline = true;
                        } else if c.is_whitespace() {
                            pending_space = true;
                        } else {
                            let gap = pending_space || pending_newline || emitter.out.is_empty();
                            flush(&mut emitter, &mut pending_space, &mut pending_newline);
                            if gap {
                                emitter.mark(segment.start + i);
                            }
                            emitter.push(c);
                        }
                    }
                }
                _ => {
                    flush(&mut emitter, &mut pending_space, &mut pending_newline);
                    emitter.mark(segment.start);
                    emitter.push_str(text);
                    if is_license_comment(text) {
                        pending_newline = true;
                    }
                }
            }
        }

        Ok(emitter.finish())
    }
}

/// Emit the separator owed before the next token; nothing at the start of output
fn flush(emitter: &mut Emitter<'_>, pending_space: &mut bool, pending_newline: &mut bool) {
    if !emitter.out.is_empty() {
        if *pending_newline {
            emitter.push('\n');
        } else if *pending_space {
            emitter.push(' ');
        }
    }
    *pending_space = false;
    *pending_newline = false;
}

/// Pipes the source through an external program (stdin → stdout)
#[derive(Debug, Clone)]
pub struct CommandMinifier {
    program: String,
    args: Vec<String>,
}

impl CommandMinifier {
    pub fn new(command: &[String]) -> Result<Self, MinifyError> {
        let (program, args) = command.split_first().ok_or(MinifyError::EmptyCommand)?;
        Ok(Self { program: program.clone(), args: args.to_vec() })
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Minifier for CommandMinifier {
    fn minify(&self, path: &Path, source: &str) -> Result<Minified, MinifyError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MinifyError::Spawn(self.display(), e))?;

        // feed stdin from a thread so a large output cannot block the write
        let writer = child.stdin.take().map(|mut stdin| {
            let input = source.as_bytes().to_vec();
            std::thread::spawn(move || stdin.write_all(&input))
        });

        let output = child.wait_with_output()
            .map_err(|e| MinifyError::Spawn(self.display(), e))?;
        let written = writer.map(|handle| handle.join());

        if !output.status.success() {
            return Err(MinifyError::Command {
                path: path.display().to_string(),
                command: self.display(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if let Some(Ok(Err(e))) = written {
            return Err(MinifyError::Spawn(self.display(), e));
        }

        let code = String::from_utf8(output.stdout)
            .map_err(|_| MinifyError::InvalidOutput(path.display().to_string()))?;
        Ok(Minified { code, mappings: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css(src: &str) -> String {
        CssMinifier.minify(Path::new("a.css"), src).unwrap().code
    }

    fn js(src: &str) -> String {
        JsMinifier.minify(Path::new("a.js"), src).unwrap().code
    }

    #[test]
    fn test_css_minify() {
        let src = "/* header */\nbody ,  p > a {\n  color : red;\n  margin: 0 auto;\n}\n";
        assert_eq!(css(src), "body,p>a{color:red;margin:0 auto}");
    }

    #[test]
    fn test_css_keeps_descendant_pseudo_and_strings() {
        let src = "div :first-child { content: \"a  ;  b\"; }\n/*! keep */";
        assert_eq!(css(src), "div :first-child{content:\"a  ;  b\"}/*! keep */");
    }

    #[test]
    fn test_css_keeps_calc_spaces() {
        assert_eq!(css("a { width: calc(100% - 2px); }"), "a{width:calc(100% - 2px)}");
    }

    #[test]
    fn test_css_mappings_point_at_tokens() {
        let minified = CssMinifier.minify(Path::new("a.css"), "a {\n  color: red;\n}").unwrap();
        let mappings = minified.mappings.unwrap();
        // `color` starts at generated column 2 and original line 1, column 2
        assert!(mappings.contains(&Mapping { gen_line: 0, gen_column: 2, src_line: 1, src_column: 2 }));
        assert_eq!(mappings[0], Mapping { gen_line: 0, gen_column: 0, src_line: 0, src_column: 0 });
    }

    #[test]
    fn test_js_minify() {
        let src = "// setup\nfunction add(a, b) {\n    /* sum */\n    return a + b;\n}\n\n\nvar s = '  x  ';\n";
        assert_eq!(js(src), "function add(a, b) {\nreturn a + b;\n}\nvar s = '  x  ';");
    }

    #[test]
    fn test_js_keeps_regex_and_template() {
        let src = "var re = /a\\/\\/b/g;  // c\nvar t = `line1\n  line2`;";
        assert_eq!(js(src), "var re = /a\\/\\/b/g;\nvar t = `line1\n  line2`;");
    }

    #[test]
    fn test_js_mappings_follow_lines() {
        let minified = JsMinifier.minify(Path::new("a.js"), "\n\n  foo();\n  bar();").unwrap();
        let mappings = minified.mappings.unwrap();
        assert_eq!(mappings[0], Mapping { gen_line: 0, gen_column: 0, src_line: 2, src_column: 2 });
        assert_eq!(mappings[1], Mapping { gen_line: 1, gen_column: 0, src_line: 3, src_column: 2 });
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(CommandMinifier::new(&[]), Err(MinifyError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_minifier() {
        let minifier = CommandMinifier::new(&["tr".to_string(), "-d".to_string(), " ".to_string()]).unwrap();
        let minified = minifier.minify(Path::new("a.css"), "a { b: c }").unwrap();
        assert_eq!(minified.code, "a{b:c}");
        assert!(minified.mappings.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_failure() {
        let minifier = CommandMinifier::new(&["false".to_string()]).unwrap();
        let err = minifier.minify(Path::new("a.js"), "x").unwrap_err();
        assert!(matches!(err, MinifyError::Command { .. }));
    }
}

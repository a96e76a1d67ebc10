//! Lexical scanning of CSS and JavaScript sources.
//!
//! The scanner splits a source into contiguous segments so that lint rules
//! and minifiers never look inside strings, comments or regex literals.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Css,
    Js,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    String,
    Comment,
    Regex,
}

/// Byte range `[start, end)` of the source with its lexical kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete",
    "void", "throw", "instanceof", "yield", "await",
];

/// Split `source` into segments covering it completely, in order.
pub fn scan(source: &str, syntax: Syntax) -> Vec<Segment> {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut code_start = 0;
    let mut last_significant: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        let literal = match b {
            b'/' if next == Some(b'*') => Some((SegmentKind::Comment, block_comment_end(bytes, i))),
            b'/' if next == Some(b'/') && syntax == Syntax::Js => {
                Some((SegmentKind::Comment, line_end(bytes, i)))
            }
            b'"' | b'\'' => Some((SegmentKind::String, string_end(bytes, i, b, false))),
            b'`' if syntax == Syntax::Js => Some((SegmentKind::String, string_end(bytes, i, b, true))),
            b'/' if syntax == Syntax::Js && regex_allowed(source, last_significant) => {
                regex_end(bytes, i).map(|end| (SegmentKind::Regex, end))
            }
            _ => None,
        };

        match literal {
            Some((kind, end)) => {
                if code_start < i {
                    segments.push(Segment { kind: SegmentKind::Code, start: code_start, end: i });
                }
                segments.push(Segment { kind, start: i, end });
                if kind != SegmentKind::Comment {
                    last_significant = Some(end - 1);
                }
                i = end;
                code_start = end;
            }
            None => {
                if !b.is_ascii_whitespace() {
                    last_significant = Some(i);
                }
                i += 1;
            }
        }
    }

    if code_start < bytes.len() {
        segments.push(Segment { kind: SegmentKind::Code, start: code_start, end: bytes.len() });
    }
    segments
}

/// Copy of `source` where everything but code is blanked out.
///
/// Newlines are kept and every other masked byte becomes a space, so byte
/// offsets and line numbers of the result match the original.
pub fn mask(source: &str, segments: &[Segment]) -> String {
    let mut out = String::with_capacity(source.len());
    for segment in segments {
        let text = segment.text(source);
        if segment.kind == SegmentKind::Code {
            out.push_str(text);
        } else {
            for c in text.chars() {
                if c == '\n' {
                    out.push('\n');
                } else {
                    out.extend(std::iter::repeat(' ').take(c.len_utf8()));
                }
            }
        }
    }
    out
}

/// Converts byte offsets into 0-based (line, column) positions, columns
/// counted in characters.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { line_starts }
    }

    pub fn position(&self, source: &str, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let column = source[start..offset].chars().count();
        (line, column)
    }
}

fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

fn line_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..].iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| start + p)
}

fn string_end(bytes: &[u8], start: usize, quote: u8, multiline: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if !multiline => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// End of a regex literal starting at `start`, or `None` when the slash is
/// not closed on the same line.
fn regex_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'\n' => return None,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Some(i);
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn regex_allowed(source: &str, last_significant: Option<usize>) -> bool {
    let Some(idx) = last_significant else {
        return true;
    };
    let bytes = source.as_bytes();
    let prev = bytes[idx];
    if prev == b')' || prev == b']' || prev == b'}' || prev == b'"' || prev == b'\'' || prev == b'`' {
        return false;
    }
    if is_ident_byte(prev) {
        let word_start = bytes[..=idx].iter()
            .rposition(|&b| !is_ident_byte(b))
            .map_or(0, |p| p + 1);
        return REGEX_KEYWORDS.contains(&&source[word_start..=idx]);
    }
    true
}

pub(crate) fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

//! Source Map v3 generation.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::scan::Syntax;

const BASE64_DIGITS: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Generated position → original position, all 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mapping {
    pub gen_line: usize,
    pub gen_column: usize,
    pub src_line: usize,
    pub src_column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    pub file: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<Option<String>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_data_url(&self) -> Result<String, serde_json::Error> {
        let json = self.to_json()?;
        Ok(format!(
            "data:application/json;charset=utf-8;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(json)
        ))
    }
}

/// The `sourceMappingURL` comment appended to an asset
pub fn annotation(syntax: Syntax, url: &str) -> String {
    match syntax {
        Syntax::Css => format!("\n/*# sourceMappingURL={} */", url),
        Syntax::Js => format!("\n//# sourceMappingURL={}", url),
    }
}

/// Source map state carried by an asset through the pipeline.
///
/// Until a transform reports mappings the map is the identity of the
/// original content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapBuilder {
    source: String,
    content: String,
    mappings: Option<Vec<Mapping>>,
}

impl SourceMapBuilder {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            mappings: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Record a transform. `mappings` relate the new output to the previous
    /// output; they are composed with the mappings recorded so far.
    pub fn apply_transform(&mut self, mappings: Option<Vec<Mapping>>) {
        self.mappings = Some(match (self.mappings.take(), mappings) {
            (_, None) => vec![],
            (None, Some(new)) => new,
            (Some(previous), Some(new)) => compose(&previous, &new),
        });
    }

    pub fn mappings(&self) -> Vec<Mapping> {
        match &self.mappings {
            Some(mappings) => mappings.clone(),
            None => identity(&self.content),
        }
    }

    pub fn build(&self, file: &str) -> SourceMap {
        SourceMap {
            version: 3,
            file: file.to_string(),
            sources: vec![self.source.clone()],
            sources_content: vec![Some(self.content.clone())],
            names: vec![],
            mappings: encode_mappings(&self.mappings()),
        }
    }
}

fn identity(content: &str) -> Vec<Mapping> {
    content.split('\n')
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(line, _)| Mapping { gen_line: line, gen_column: 0, src_line: line, src_column: 0 })
        .collect()
}

/// Chain `outer` (final → intermediate) through `inner` (intermediate →
/// original). Each outer mapping resolves to the closest inner mapping at or
/// before its intermediate position on the same line.
fn compose(inner: &[Mapping], outer: &[Mapping]) -> Vec<Mapping> {
    let mut sorted = inner.to_vec();
    sorted.sort();
    outer.iter()
        .filter_map(|m| {
            let key = (m.src_line, m.src_column);
            let idx = sorted.partition_point(|i| (i.gen_line, i.gen_column) <= key);
            let base = sorted[..idx].last().filter(|i| i.gen_line == m.src_line)?;
            Some(Mapping {
                gen_line: m.gen_line,
                gen_column: m.gen_column,
                src_line: base.src_line,
                src_column: base.src_column + (m.src_column - base.gen_column),
            })
        })
        .collect()
}

/// Encode mappings for a single source as a Base64 VLQ `mappings` string
pub fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut sorted = mappings.to_vec();
    sorted.sort();
    sorted.dedup_by_key(|m| (m.gen_line, m.gen_column));

    let mut out = String::new();
    let mut line = 0;
    let mut prev_gen_column = 0i64;
    let mut prev_src_line = 0i64;
    let mut prev_src_column = 0i64;
    let mut first_in_line = true;

    for m in &sorted {
        while line < m.gen_line {
            out.push(';');
            line += 1;
            prev_gen_column = 0;
            first_in_line = true;
        }
        if !first_in_line {
            out.push(',');
        }
        vlq(m.gen_column as i64 - prev_gen_column, &mut out);
        // single source, index delta is always zero
        vlq(0, &mut out);
        vlq(m.src_line as i64 - prev_src_line, &mut out);
        vlq(m.src_column as i64 - prev_src_column, &mut out);

        prev_gen_column = m.gen_column as i64;
        prev_src_line = m.src_line as i64;
        prev_src_column = m.src_column as i64;
        first_in_line = false;
    }
    out
}

fn vlq(value: i64, out: &mut String) {
    let signed = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    let mut v = signed as u64;
    loop {
        let mut digit = (v & 31) as usize;
        v >>= 5;
        if v > 0 {
            digit |= 32;
        }
        out.push(BASE64_DIGITS[digit] as char);
        if v == 0 {
            break;
        }
    }
}

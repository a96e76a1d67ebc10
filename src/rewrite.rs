//! Reference rewriting inside the copied HTML templates.

use std::fs;
use std::sync::{Arc, Mutex};

use crate::fileset::FileSet;
use crate::pipeline::PipelineError;

/// An asset renamed by fingerprinting, as `/`-separated paths relative to
/// the web root (`static/js/lib/jquery.js` → `static/js/lib/jquery-0123456789.js`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// Rewrites `/<from>` into `/<to>` in every template of a file set.
///
/// Clones share one lock, so templates are never read and written by two
/// pipelines at once.
#[derive(Debug, Clone)]
pub struct ReferenceRewriter {
    templates: FileSet,
    lock: Arc<Mutex<()>>,
}

impl ReferenceRewriter {
    pub fn new(templates: FileSet) -> Self {
        Self { templates, lock: Arc::new(Mutex::new(())) }
    }

    /// Apply all renames; returns the number of templates changed
    pub fn rewrite(&self, renames: &[Rename]) -> Result<usize, PipelineError> {
        if renames.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut changed = 0;
        for path in self.templates.matches()? {
            let html = fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))?;
            let (updated, count) = replace_references(&html, renames);
            if count > 0 {
                fs::write(&path, updated).map_err(|e| PipelineError::io(&path, e))?;
                tracing::debug!(template = %path.display(), references = count, "rewrote asset references");
                changed += 1;
            }
        }
        Ok(changed)
    }
}

fn is_file_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// Replace `/<from>` references that end at a file name boundary
pub fn replace_references(html: &str, renames: &[Rename]) -> (String, usize) {
    let mut text = html.to_string();
    let mut total = 0;

    for rename in renames {
        let needle = format!("/{}", rename.from);
        let replacement = format!("/{}", rename.to);
        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();

        while let Some(idx) = rest.find(&needle) {
            let end = idx + needle.len();
            let bounded = rest[end..].chars().next().map_or(true, |c| !is_file_name_char(c));
            out.push_str(&rest[..idx]);
            if bounded {
                out.push_str(&replacement);
                total += 1;
            } else {
                out.push_str(&needle);
            }
            rest = &rest[end..];
        }
        out.push_str(rest);
        text = out;
    }

    (text, total)
}

//! Asset Pipeline - Composable Stages Over File Batches
//!
//! Every stage sees the whole batch, so fingerprinting can rename all assets
//! before template references are rewritten in one pass.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{ConfigError, SourceMapMode};
use crate::fileset::{FileSet, FileSetError};
use crate::hashing::{content_hash, hashed_file_name};
use crate::lint::{LintGate, LintReport, Linter, Severity};
use crate::minify::{MinifyError, Minifier};
use crate::rewrite::{ReferenceRewriter, Rename};
use crate::scan::Syntax;
use crate::sourcemap::{self, SourceMapBuilder};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("File matching failed: {0}")]
    FileSet(#[from] FileSetError),

    #[error("Lint failed: {errors} errors in {files} files")]
    LintFailed { errors: usize, files: usize },

    #[error("Minification failed: {0}")]
    Minify(#[from] MinifyError),

    #[error("Source map error: {0}")]
    SourceMap(#[from] serde_json::Error),

    #[error("Not valid UTF-8: {0}")]
    NotUtf8(PathBuf),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline {0} did not complete: {1}")]
    Interrupted(String, String),
}

impl PipelineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }

    pub fn is_lint_failure(&self) -> bool {
        matches!(self, Self::LintFailed { .. })
    }
}

/// A file flowing through a pipeline
#[derive(Debug, Clone)]
pub struct Asset {
    /// Path relative to the pipeline base, renamed by fingerprinting
    pub path: PathBuf,
    /// Where the asset was read from
    pub origin: PathBuf,
    pub contents: Vec<u8>,
    pub source_map: Option<SourceMapBuilder>,
}

impl Asset {
    pub fn new(path: impl Into<PathBuf>, origin: impl Into<PathBuf>, contents: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            origin: origin.into(),
            contents,
            source_map: None,
        }
    }

    pub fn text(&self) -> Result<&str, PipelineError> {
        std::str::from_utf8(&self.contents).map_err(|_| PipelineError::NotUtf8(self.origin.clone()))
    }

    /// Relative path with `/` separators, as referenced from HTML
    pub fn url_path(&self) -> String {
        url_path(&self.path)
    }

    pub fn file_name(&self) -> String {
        self.path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn url_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Stage trait - one transform over the whole batch
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError>;
}

// --- Stages ---

/// Attach a source map seeded with each asset's original content
pub struct InitSourceMaps;

impl Stage for InitSourceMaps {
    fn name(&self) -> &'static str { "sourcemaps.init" }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError> {
        for asset in &mut assets {
            let content = asset.text()?.to_string();
            asset.source_map = Some(SourceMapBuilder::new(asset.url_path(), content));
        }
        Ok(assets)
    }
}

/// Lint every asset and apply the gate once all files are reported
pub struct Lint {
    pub linter: Arc<dyn Linter>,
    pub gate: LintGate,
}

impl Stage for Lint {
    fn name(&self) -> &'static str { "lint" }

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError> {
        let mut report = LintReport::default();
        for asset in &assets {
            report.add(asset.origin.clone(), self.linter.lint(&asset.path, asset.text()?));
        }

        if report.is_empty() {
            debug!(files = assets.len(), "lint passed");
            return Ok(assets);
        }

        let errors = report.count(Severity::Error);
        match self.gate {
            LintGate::FailOnError if errors > 0 => {
                error!("lint errors:\n{}", report);
                Err(PipelineError::LintFailed { errors, files: report.files.len() })
            }
            _ => {
                warn!("lint problems:\n{}", report);
                Ok(assets)
            }
        }
    }
}

/// Replace contents with minified code
pub struct Minify {
    pub minifier: Arc<dyn Minifier>,
}

impl Stage for Minify {
    fn name(&self) -> &'static str { "minify" }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError> {
        for asset in &mut assets {
            let minified = self.minifier.minify(&asset.origin, asset.text()?)?;
            debug!(
                path = %asset.path.display(),
                before = asset.contents.len(),
                after = minified.code.len(),
                "minified"
            );
            asset.contents = minified.code.into_bytes();
            if let Some(map) = asset.source_map.as_mut() {
                map.apply_transform(minified.mappings);
            }
        }
        Ok(assets)
    }
}

/// Rename every asset to `<stem>-<hash>.<ext>` and rewrite template references.
///
/// `url_base` is the batch base relative to the web root (`static/css/lib`);
/// references are matched on the full web path so that same-named files in
/// different directories never claim each other's references.
pub struct Fingerprint {
    pub hash_length: usize,
    pub url_base: String,
    pub rewriter: ReferenceRewriter,
}

impl Fingerprint {
    fn web_path(&self, relative: &str) -> String {
        let base = self.url_base.trim_matches('/');
        if base.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", base, relative)
        }
    }
}

impl Stage for Fingerprint {
    fn name(&self) -> &'static str { "fingerprint" }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError> {
        let mut renames = Vec::with_capacity(assets.len());
        for asset in &mut assets {
            let hash = content_hash(&asset.contents, self.hash_length);
            let hashed = hashed_file_name(&asset.file_name(), &hash);
            let from = self.web_path(&asset.url_path());
            asset.path.set_file_name(&hashed);
            renames.push(Rename { from, to: self.web_path(&asset.url_path()) });
        }

        let changed = self.rewriter.rewrite(&renames)?;
        debug!(assets = renames.len(), templates = changed, "fingerprinted");
        Ok(assets)
    }
}

/// Finalize source maps, as `.map` files next to the assets or inline
pub struct WriteSourceMaps {
    pub mode: SourceMapMode,
    pub syntax: Syntax,
}

impl Stage for WriteSourceMaps {
    fn name(&self) -> &'static str { "sourcemaps.write" }

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError> {
        let mut out = Vec::with_capacity(assets.len() * 2);
        for mut asset in assets {
            let Some(builder) = asset.source_map.take() else {
                out.push(asset);
                continue;
            };
            let map = builder.build(&asset.file_name());
            match self.mode {
                SourceMapMode::External => {
                    let map_name = format!("{}.map", asset.file_name());
                    let comment = sourcemap::annotation(self.syntax, &map_name);
                    asset.contents.extend_from_slice(comment.as_bytes());
                    let map_asset = Asset::new(
                        asset.path.with_file_name(&map_name),
                        asset.origin.clone(),
                        map.to_json()?.into_bytes(),
                    );
                    out.push(asset);
                    out.push(map_asset);
                }
                SourceMapMode::Inline => {
                    let comment = sourcemap::annotation(self.syntax, &map.to_data_url()?);
                    asset.contents.extend_from_slice(comment.as_bytes());
                    out.push(asset);
                }
            }
        }
        Ok(out)
    }
}

/// Write every asset below `dest`
pub struct Emit {
    pub dest: PathBuf,
}

impl Stage for Emit {
    fn name(&self) -> &'static str { "dest" }

    fn apply(&self, assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError> {
        for asset in &assets {
            let target = self.dest.join(&asset.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
            }
            fs::write(&target, &asset.contents).map_err(|e| PipelineError::io(&target, e))?;
            debug!(path = %target.display(), bytes = asset.contents.len(), "wrote");
        }
        Ok(assets)
    }
}

/// An ordered chain of stages
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), stages: vec![] }
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Read every file of the set into assets relative to its base
    pub fn load(files: &FileSet) -> Result<Vec<Asset>, PipelineError> {
        files.matches()?
            .into_iter()
            .map(|path| {
                let contents = fs::read(&path).map_err(|e| PipelineError::io(&path, e))?;
                let relative = files.relative(&path).unwrap_or(&path).to_path_buf();
                Ok(Asset::new(relative, path, contents))
            })
            .collect()
    }

    /// Load the file set and push it through all stages
    pub fn run(&self, files: &FileSet) -> Result<Vec<Asset>, PipelineError> {
        let assets = Self::load(files)?;
        debug!(pipeline = %self.name, files = assets.len(), "loaded");
        self.apply(assets)
    }

    pub fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, PipelineError> {
        for stage in &self.stages {
            assets = stage.apply(assets)?;
            debug!(pipeline = %self.name, stage = stage.name(), files = assets.len(), "stage done");
        }
        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LintConfig;
    use crate::lint::RuleLinter;
    use crate::minify::CssMinifier;
    use tempfile::TempDir;

    fn css_asset(path: &str, text: &str) -> Asset {
        Asset::new(path, format!("/src/{}", path), text.as_bytes().to_vec())
    }

    #[test]
    fn test_lint_report_gate_passes_through() {
        let stage = Lint {
            linter: Arc::new(RuleLinter::css(LintConfig::default_css())),
            gate: LintGate::Report,
        };
        let assets = stage.apply(vec![css_asset("app.css", "a {}")]).unwrap();
        assert_eq!(assets.len(), 1);
    }

    #[test]
    fn test_lint_fail_gate_blocks_errors_only() {
        let stage = Lint {
            linter: Arc::new(RuleLinter::css(LintConfig::default_css())),
            gate: LintGate::FailOnError,
        };
        let err = stage.apply(vec![
            css_asset("a.css", "a {}"),
            css_asset("b.css", "b {}"),
            css_asset("c.css", "c { color: red; }"),
        ]).unwrap_err();
        assert!(err.is_lint_failure());
        assert!(matches!(err, PipelineError::LintFailed { errors: 2, files: 2 }));

        // warnings alone never block
        let ok = stage.apply(vec![css_asset("d.css", "/* */\nd { color: red; }")]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_minify_updates_source_map() {
        let assets = InitSourceMaps.apply(vec![css_asset("app.css", "a {\n  color: red;\n}\n")]).unwrap();
        let assets = Minify { minifier: Arc::new(CssMinifier) }.apply(assets).unwrap();
        assert_eq!(assets[0].text().unwrap(), "a{color:red}");
        let map = assets[0].source_map.as_ref().unwrap().build("app.css");
        assert!(map.mappings.starts_with("AAAA"));
        assert!(!map.mappings.contains(';'));
    }

    #[test]
    fn test_fingerprint_renames_and_rewrites() {
        let templates = TempDir::new().unwrap();
        let index = templates.path().join("index.html");
        fs::write(&index, r#"<script src="/static/js/lib/util.js"></script>"#).unwrap();

        let stage = Fingerprint {
            hash_length: 10,
            url_base: "static/js".to_string(),
            rewriter: ReferenceRewriter::new(FileSet::new(templates.path()).include("**/*.html")),
        };
        let assets = stage.apply(vec![css_asset("lib/util.js", "var x = 1;")]).unwrap();

        let hash = content_hash(b"var x = 1;", 10);
        assert_eq!(assets[0].url_path(), format!("lib/util-{}.js", hash));
        let html = fs::read_to_string(&index).unwrap();
        assert_eq!(html, format!(r#"<script src="/static/js/lib/util-{}.js"></script>"#, hash));
    }

    #[test]
    fn test_fingerprint_keeps_same_named_files_apart() {
        let templates = TempDir::new().unwrap();
        let index = templates.path().join("index.html");
        fs::write(
            &index,
            r#"<link href="/static/css/app.css"><link href="/static/css/pages/app.css">"#,
        ).unwrap();

        let stage = Fingerprint {
            hash_length: 10,
            url_base: "static/css".to_string(),
            rewriter: ReferenceRewriter::new(FileSet::new(templates.path()).include("**/*.html")),
        };
        stage.apply(vec![
            css_asset("app.css", "a{color:red}"),
            css_asset("pages/app.css", "b{color:blue}"),
        ]).unwrap();

        let top = content_hash(b"a{color:red}", 10);
        let page = content_hash(b"b{color:blue}", 10);
        assert_eq!(
            fs::read_to_string(&index).unwrap(),
            format!(r#"<link href="/static/css/app-{}.css"><link href="/static/css/pages/app-{}.css">"#, top, page)
        );
    }

    #[test]
    fn test_write_external_source_map() {
        let assets = InitSourceMaps.apply(vec![css_asset("app-abc.css", "a{}")]).unwrap();
        let stage = WriteSourceMaps { mode: SourceMapMode::External, syntax: Syntax::Css };
        let assets = stage.apply(assets).unwrap();

        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].text().unwrap(), "a{}\n/*# sourceMappingURL=app-abc.css.map */");
        assert_eq!(assets[1].url_path(), "app-abc.css.map");
        let json: serde_json::Value = serde_json::from_slice(&assets[1].contents).unwrap();
        assert_eq!(json["file"], "app-abc.css");
    }

    #[test]
    fn test_write_inline_source_map() {
        let assets = InitSourceMaps.apply(vec![css_asset("app.js", "x();")]).unwrap();
        let stage = WriteSourceMaps { mode: SourceMapMode::Inline, syntax: Syntax::Js };
        let assets = stage.apply(assets).unwrap();
        assert_eq!(assets.len(), 1);
        assert!(assets[0].text().unwrap().contains("//# sourceMappingURL=data:application/json;charset=utf-8;base64,"));
    }

    #[test]
    fn test_pipeline_copy_roundtrip() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/page.html"), b"<h1>hi</h1>").unwrap();

        let pipeline = Pipeline::new("copy").stage(Emit { dest: dest.path().to_path_buf() });
        let files = FileSet::new(src.path()).include("**/*.html");
        let written = pipeline.run(&files).unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(fs::read(dest.path().join("nested/page.html")).unwrap(), b"<h1>hi</h1>");
        assert_eq!(pipeline.stage_names(), vec!["dest"]);
    }

    #[test]
    fn test_non_utf8_asset_is_rejected() {
        let asset = Asset::new("bad.css", "/src/bad.css", vec![0xff, 0xfe]);
        assert!(matches!(InitSourceMaps.apply(vec![asset]), Err(PipelineError::NotUtf8(_))));
    }
}

//! AssetForge Core - Front-End Asset Build Orchestrator
//!
//! Copies templates and static resources from `src/main/web` into
//! `src/main/dist/web`, and lints, minifies and fingerprints stylesheets and
//! scripts, rewriting template references to the fingerprinted names.
//!
//! Tasks form a dependency graph: `css` and `js` run after `html` so that the
//! templates they rewrite are already in place, and `build` finishes only
//! when `resource`, `html`, `css` and `js` have all finished.

pub mod config;
pub mod fileset;
pub mod graph;
pub mod hashing;
pub mod lint;
pub mod minify;
pub mod pipeline;
pub mod rewrite;
pub mod scan;
pub mod sourcemap;
pub mod tasks;

pub use config::{BuildConfig, ConfigError, LintConfig, ProjectLayout, RuleDialect, RuleSetting, SourceMapMode};
pub use fileset::{FileSet, FileSetError};
pub use graph::{RunReport, ScheduleError, Scheduler, Task, TaskGraph, TaskState};
pub use hashing::{content_hash, hashed_file_name, sha256_hex};
pub use lint::{LintGate, LintReport, Linter, Severity, Violation};
pub use minify::{CommandMinifier, CssMinifier, JsMinifier, Minifier, MinifyError};
pub use pipeline::{Asset, Pipeline, PipelineError, Stage};
pub use rewrite::{ReferenceRewriter, Rename};
pub use tasks::{run_targets, standard_graph, BuildContext};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

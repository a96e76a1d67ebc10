//! Build Tasks - clean, html, resource, css, js and the composite build

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::{BuildConfig, ConfigError, LintConfig, ProjectLayout, ToolCommand};
use crate::fileset::FileSet;
use crate::graph::{RunReport, ScheduleError, Scheduler, Task, TaskGraph};
use crate::lint::{LintGate, RuleLinter};
use crate::minify::{CommandMinifier, CssMinifier, JsMinifier, Minifier};
use crate::pipeline::{Emit, Fingerprint, InitSourceMaps, Lint, Minify, Pipeline, PipelineError, WriteSourceMaps};
use crate::rewrite::ReferenceRewriter;
use crate::scan::Syntax;

pub const CLEAN: &str = "clean";
pub const HTML: &str = "html";
pub const RESOURCE: &str = "resource";
pub const CSS: &str = "css";
pub const JS: &str = "js";
pub const BUILD: &str = "build";

/// Everything a task needs for one run
pub struct BuildContext {
    pub layout: ProjectLayout,
    pub config: BuildConfig,
    css_rules: LintConfig,
    js_rules: LintConfig,
    rewriter: ReferenceRewriter,
}

impl BuildContext {
    /// Context with lint rules resolved from the build config
    pub fn new(layout: ProjectLayout, config: BuildConfig) -> Result<Self, ConfigError> {
        config.check()?;
        let css_rules = config.css_lint_rules()?;
        let js_rules = config.js_lint_rules()?;
        Ok(Self::with_lint_rules(layout, config, css_rules, js_rules))
    }

    pub fn with_lint_rules(
        layout: ProjectLayout,
        config: BuildConfig,
        css_rules: LintConfig,
        js_rules: LintConfig,
    ) -> Self {
        let templates = FileSet::new(layout.mirror(&layout.template_dir())).include("**/*.html");
        Self {
            layout,
            config,
            css_rules,
            js_rules,
            rewriter: ReferenceRewriter::new(templates),
        }
    }
}

/// Fingerprinted asset classes, handled by the css and js tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Css,
    Js,
}

impl AssetKind {
    fn task_name(self) -> &'static str {
        match self {
            AssetKind::Css => CSS,
            AssetKind::Js => JS,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            AssetKind::Css => "css",
            AssetKind::Js => "js",
        }
    }

    fn syntax(self) -> Syntax {
        match self {
            AssetKind::Css => Syntax::Css,
            AssetKind::Js => Syntax::Js,
        }
    }

    /// CSS lint only reports; JS lint errors fail the task
    fn gate(self) -> LintGate {
        match self {
            AssetKind::Css => LintGate::Report,
            AssetKind::Js => LintGate::FailOnError,
        }
    }

    fn source_dir(self, layout: &ProjectLayout) -> std::path::PathBuf {
        match self {
            AssetKind::Css => layout.css_dir(),
            AssetKind::Js => layout.js_dir(),
        }
    }

    /// App sources: everything except the `lib` directory
    pub fn app_files(self, layout: &ProjectLayout) -> FileSet {
        FileSet::new(self.source_dir(layout))
            .include(&format!("**/*.{}", self.extension()))
            .exclude("lib/**/*")
    }

    /// Third-party sources below `lib`
    pub fn lib_files(self, layout: &ProjectLayout) -> FileSet {
        FileSet::new(self.source_dir(layout).join("lib"))
            .include(&format!("**/*.{}", self.extension()))
    }

    fn linter(self, ctx: &BuildContext) -> RuleLinter {
        match self {
            AssetKind::Css => RuleLinter::css(ctx.css_rules.clone()),
            AssetKind::Js => RuleLinter::js(ctx.js_rules.clone()),
        }
    }

    fn minifier(self, ctx: &BuildContext) -> Result<Arc<dyn Minifier>, PipelineError> {
        let command: Option<&ToolCommand> = match self {
            AssetKind::Css => ctx.config.css_minifier.as_ref(),
            AssetKind::Js => ctx.config.js_minifier.as_ref(),
        };
        let minifier: Arc<dyn Minifier> = match (command, self) {
            (Some(tool), _) => Arc::new(CommandMinifier::new(&tool.command)?),
            (None, AssetKind::Css) => Arc::new(CssMinifier),
            (None, AssetKind::Js) => Arc::new(JsMinifier),
        };
        Ok(minifier)
    }

    /// lint → minify → fingerprint → source map → write, with source map
    /// tracking starting before lint for CSS and after it for JS
    pub fn app_pipeline(self, ctx: &BuildContext) -> Result<Pipeline, PipelineError> {
        let dest = ctx.layout.mirror(&self.source_dir(&ctx.layout));
        let lint = Lint { linter: Arc::new(self.linter(ctx)), gate: self.gate() };
        let pipeline = Pipeline::new(format!("{}:app", self.task_name()));
        let pipeline = match self {
            AssetKind::Css => pipeline.stage(InitSourceMaps).stage(lint),
            AssetKind::Js => pipeline.stage(lint).stage(InitSourceMaps),
        };
        Ok(pipeline
            .stage(Minify { minifier: self.minifier(ctx)? })
            .stage(Fingerprint {
                hash_length: ctx.config.hash_length,
                url_base: ctx.layout.web_url(&self.source_dir(&ctx.layout)),
                rewriter: ctx.rewriter.clone(),
            })
            .stage(WriteSourceMaps { mode: ctx.config.source_maps, syntax: self.syntax() })
            .stage(Emit { dest }))
    }

    /// fingerprint → write; libraries are neither linted nor minified
    pub fn lib_pipeline(self, ctx: &BuildContext) -> Pipeline {
        let lib_dir = self.source_dir(&ctx.layout).join("lib");
        Pipeline::new(format!("{}:lib", self.task_name()))
            .stage(Fingerprint {
                hash_length: ctx.config.hash_length,
                url_base: ctx.layout.web_url(&lib_dir),
                rewriter: ctx.rewriter.clone(),
            })
            .stage(Emit { dest: ctx.layout.mirror(&lib_dir) })
    }
}

async fn run_blocking(pipeline: Pipeline, files: FileSet) -> Result<usize, PipelineError> {
    let name = pipeline.name().to_string();
    tokio::task::spawn_blocking(move || pipeline.run(&files).map(|assets| assets.len()))
        .await
        .map_err(|e| PipelineError::Interrupted(name, e.to_string()))?
}

/// Run the app and lib pipelines concurrently; succeeds iff both do
async fn run_asset_task(kind: AssetKind, ctx: &BuildContext) -> Result<(), PipelineError> {
    let app = kind.app_pipeline(ctx)?;
    let lib = kind.lib_pipeline(ctx);
    let (app_result, lib_result) = tokio::join!(
        run_blocking(app, kind.app_files(&ctx.layout)),
        run_blocking(lib, kind.lib_files(&ctx.layout)),
    );
    let (app_count, lib_count) = (app_result?, lib_result?);
    info!(task = kind.task_name(), app = app_count, lib = lib_count, "assets written");
    Ok(())
}

/// Delete a directory tree, clearing read-only flags first. Returns whether
/// anything was removed.
pub fn remove_tree(path: &Path) -> Result<bool, PipelineError> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(false);
    }
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            PipelineError::io(&at, e.into())
        })?;
        let metadata = entry.metadata().map_err(|e| PipelineError::io(entry.path(), e.into()))?;
        let mut permissions = metadata.permissions();
        if permissions.readonly() && !entry.path_is_symlink() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            fs::set_permissions(entry.path(), permissions)
                .map_err(|e| PipelineError::io(entry.path(), e))?;
        }
    }
    fs::remove_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(true)
}

pub struct Clean;

#[async_trait]
impl Task<BuildContext> for Clean {
    fn name(&self) -> &str { CLEAN }

    async fn run(&self, ctx: Arc<BuildContext>) -> Result<(), PipelineError> {
        let dist = ctx.layout.dist_dir();
        let target = dist.clone();
        let removed = tokio::task::spawn_blocking(move || remove_tree(&target))
            .await
            .map_err(|e| PipelineError::Interrupted(CLEAN.to_string(), e.to_string()))??;
        if removed {
            info!(path = %dist.display(), "removed destination tree");
        } else {
            warn!(path = %dist.display(), "destination tree does not exist");
        }
        Ok(())
    }
}

pub struct Html;

impl Html {
    pub fn files(layout: &ProjectLayout) -> FileSet {
        FileSet::new(layout.template_dir()).include("**/*.html")
    }
}

#[async_trait]
impl Task<BuildContext> for Html {
    fn name(&self) -> &str { HTML }

    async fn run(&self, ctx: Arc<BuildContext>) -> Result<(), PipelineError> {
        let dest = ctx.layout.mirror(&ctx.layout.template_dir());
        let pipeline = Pipeline::new(HTML).stage(Emit { dest });
        let count = run_blocking(pipeline, Self::files(&ctx.layout)).await?;
        info!(task = HTML, files = count, "templates copied");
        Ok(())
    }
}

pub struct Resource;

impl Resource {
    pub fn files(layout: &ProjectLayout) -> FileSet {
        FileSet::new(layout.web_dir())
            .include("**/*.*")
            .exclude("static/css/**/*.css")
            .exclude("static/js/**/*.js")
            .exclude("template/**/*.*")
    }
}

#[async_trait]
impl Task<BuildContext> for Resource {
    fn name(&self) -> &str { RESOURCE }

    async fn run(&self, ctx: Arc<BuildContext>) -> Result<(), PipelineError> {
        let pipeline = Pipeline::new(RESOURCE).stage(Emit { dest: ctx.layout.dist_dir() });
        let count = run_blocking(pipeline, Self::files(&ctx.layout)).await?;
        info!(task = RESOURCE, files = count, "resources copied");
        Ok(())
    }
}

pub struct Css;

#[async_trait]
impl Task<BuildContext> for Css {
    fn name(&self) -> &str { CSS }

    fn prerequisites(&self) -> Vec<String> {
        vec![HTML.to_string()]
    }

    async fn run(&self, ctx: Arc<BuildContext>) -> Result<(), PipelineError> {
        run_asset_task(AssetKind::Css, &ctx).await
    }
}

pub struct Js;

#[async_trait]
impl Task<BuildContext> for Js {
    fn name(&self) -> &str { JS }

    fn prerequisites(&self) -> Vec<String> {
        vec![HTML.to_string()]
    }

    async fn run(&self, ctx: Arc<BuildContext>) -> Result<(), PipelineError> {
        run_asset_task(AssetKind::Js, &ctx).await
    }
}

/// Composite over resource, html, css and js; finishes when all of them have
pub struct Build;

#[async_trait]
impl Task<BuildContext> for Build {
    fn name(&self) -> &str { BUILD }

    fn prerequisites(&self) -> Vec<String> {
        [RESOURCE, HTML, CSS, JS].iter().map(|t| t.to_string()).collect()
    }

    async fn run(&self, _ctx: Arc<BuildContext>) -> Result<(), PipelineError> {
        Ok(())
    }
}

pub fn standard_graph() -> TaskGraph<BuildContext> {
    let tasks: Vec<Arc<dyn Task<BuildContext>>> = vec![
        Arc::new(Clean),
        Arc::new(Html),
        Arc::new(Resource),
        Arc::new(Css),
        Arc::new(Js),
        Arc::new(Build),
    ];
    match TaskGraph::from_tasks(tasks) {
        Ok(graph) => graph,
        // the built-in graph is fixed; an error here is a programming mistake
        Err(e) => unreachable!("standard task graph is invalid: {}", e),
    }
}

/// Run each target (with its prerequisites) in order, stopping after the
/// first run that does not succeed
pub async fn run_targets(ctx: BuildContext, targets: &[String]) -> Result<Vec<RunReport>, ScheduleError> {
    let scheduler = Scheduler::new(standard_graph());
    for target in targets {
        if !scheduler.graph().contains(target) {
            return Err(ScheduleError::UnknownTask(target.clone()));
        }
    }

    let ctx = Arc::new(ctx);
    let mut reports = Vec::with_capacity(targets.len());
    for target in targets {
        let report = scheduler.run(&[target.as_str()], ctx.clone()).await?;
        let success = report.is_success();
        reports.push(report);
        if !success {
            break;
        }
    }
    Ok(reports)
}

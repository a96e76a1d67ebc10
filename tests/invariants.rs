//! Build Invariant Tests
//!
//! End-to-end runs of the task graph over temporary project trees.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use assetforge_core::{
    content_hash, run_targets, BuildConfig, BuildContext, LintConfig, ProjectLayout, RunReport,
    SourceMapMode, TaskState,
};

const INDEX_HTML: &str = r#"<html>
<head>
  <link rel="stylesheet" href="/static/css/app.css">
  <link rel="stylesheet" href="/static/css/lib/reset.css">
</head>
<body>
  <script src="/static/js/lib/vendor.js"></script>
  <script src="/static/js/app.js"></script>
</body>
</html>
"#;

const APP_CSS: &str = "/* app styles */\nbody {\n  margin: 0;\n  color: #333;\n}\n\na:hover {\n  color: #ff0000;\n}\n";
const RESET_CSS: &str = "* {\n  box-sizing: border-box;\n}\n";
const APP_JS: &str = "// entry\nfunction greet(name) {\n  if (name === 'x') {\n    return 1;\n  }\n  return 2;\n}\n";
const VENDOR_JS: &str = "/* vendor */\nvar vendor = {\n  version: 1\n};\n";

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let project = Self { dir: TempDir::new().unwrap() };
        project.write("template/index.html", INDEX_HTML);
        project.write("template/admin/users.html", "<p>users</p>\n");
        project.write("static/css/app.css", APP_CSS);
        project.write("static/css/lib/reset.css", RESET_CSS);
        project.write("static/js/app.js", APP_JS);
        project.write("static/js/lib/vendor.js", VENDOR_JS);
        project.write("static/img/logo.png", "\u{89}PNG");
        project.write("static/css/fonts/icons.woff", "woff");
        project.write("robots.txt", "User-agent: *\n");
        project
    }

    fn layout(&self) -> ProjectLayout {
        ProjectLayout::new(self.dir.path())
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.layout().web_dir().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn dist(&self, relative: &str) -> PathBuf {
        self.layout().dist_dir().join(relative)
    }

    fn context(&self, config: BuildConfig) -> BuildContext {
        BuildContext::with_lint_rules(self.layout(), config, LintConfig::default_css(), LintConfig::default_js())
    }

    async fn run(&self, tasks: &[&str]) -> Vec<RunReport> {
        self.run_with(BuildConfig::default(), tasks).await
    }

    async fn run_with(&self, config: BuildConfig, tasks: &[&str]) -> Vec<RunReport> {
        let tasks: Vec<String> = tasks.iter().map(|t| t.to_string()).collect();
        run_targets(self.context(config), &tasks).await.unwrap()
    }
}

/// File names in a directory (not recursive), sorted
fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// The single `<stem>-<hash>.<ext>` file in a directory
fn hashed(dir: &Path, stem: &str, ext: &str) -> String {
    let prefix = format!("{}-", stem);
    let suffix = format!(".{}", ext);
    let found: Vec<String> = listing(dir)
        .into_iter()
        .filter(|n| n.starts_with(&prefix) && n.ends_with(&suffix))
        .collect();
    assert_eq!(found.len(), 1, "expected one {}-*.{} in {:?}", stem, ext, listing(dir));
    found[0].clone()
}

fn hash_of(file_name: &str, stem: &str, ext: &str) -> String {
    file_name[stem.len() + 1..file_name.len() - ext.len() - 1].to_string()
}

#[tokio::test]
async fn invariant_html_copies_are_byte_identical() {
    let project = Project::new();
    let reports = project.run(&["html"]).await;

    assert!(reports[0].is_success());
    assert_eq!(fs::read_to_string(project.dist("template/index.html")).unwrap(), INDEX_HTML);
    assert_eq!(fs::read_to_string(project.dist("template/admin/users.html")).unwrap(), "<p>users</p>\n");
}

#[tokio::test]
async fn invariant_resource_excludes_sources_and_templates() {
    let project = Project::new();
    let reports = project.run(&["resource"]).await;

    assert!(reports[0].is_success());
    assert!(project.dist("static/img/logo.png").is_file());
    assert!(project.dist("static/css/fonts/icons.woff").is_file());
    assert!(project.dist("robots.txt").is_file());
    assert!(!project.dist("static/css/app.css").exists());
    assert!(!project.dist("static/css/lib/reset.css").exists());
    assert!(!project.dist("static/js/app.js").exists());
    assert!(!project.dist("template").exists());
}

#[tokio::test]
async fn invariant_clean_removes_destination() {
    let project = Project::new();
    let stale = project.dist("static/old/stale.txt");
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, "stale").unwrap();
    let mut permissions = fs::metadata(&stale).unwrap().permissions();
    permissions.set_readonly(true);
    fs::set_permissions(&stale, permissions).unwrap();

    let reports = project.run(&["clean"]).await;
    assert!(reports[0].is_success());
    assert!(!project.dist("").exists());

    // nothing left to remove is not an error
    let reports = project.run(&["clean"]).await;
    assert!(reports[0].is_success());
}

#[tokio::test]
async fn invariant_css_is_fingerprinted_and_referenced() {
    let project = Project::new();
    let reports = project.run(&["css"]).await;
    let report = &reports[0];

    assert!(report.is_success(), "{:?}", report.tasks);
    assert!(matches!(report.state("html"), Some(TaskState::Succeeded { .. })));

    let css_dir = project.dist("static/css");
    let app = hashed(&css_dir, "app", "css");
    let hash = hash_of(&app, "app", "css");
    assert_eq!(hash.len(), 10);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(css_dir.join(format!("{}.map", app)).is_file());
    assert!(!css_dir.join("app.css").exists());

    // the hash covers the minified body, before the map annotation
    let written = fs::read_to_string(css_dir.join(&app)).unwrap();
    let (body, annotation) = written.split_once("\n/*# sourceMappingURL=").unwrap();
    assert_eq!(annotation, format!("{}.map */", app));
    assert_eq!(content_hash(body.as_bytes(), 10), hash);
    assert!(!body.contains('\n'));
    assert!(!body.contains("app styles"));

    let map: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(css_dir.join(format!("{}.map", app))).unwrap()).unwrap();
    assert_eq!(map["version"], 3);
    assert_eq!(map["sources"][0], "app.css");

    let index = fs::read_to_string(project.dist("template/index.html")).unwrap();
    assert!(index.contains(&format!("/static/css/{}", app)));
    assert!(!index.contains("/static/css/app.css"));
}

#[tokio::test]
async fn invariant_lib_assets_are_hashed_but_not_minified() {
    let project = Project::new();
    let reports = project.run(&["js"]).await;
    assert!(reports[0].is_success(), "{:?}", reports[0].tasks);

    let lib_dir = project.dist("static/js/lib");
    let vendor = hashed(&lib_dir, "vendor", "js");
    assert_eq!(fs::read_to_string(lib_dir.join(&vendor)).unwrap(), VENDOR_JS);
    assert_eq!(hash_of(&vendor, "vendor", "js"), content_hash(VENDOR_JS.as_bytes(), 10));
    assert_eq!(listing(&lib_dir), vec![vendor.clone()]);

    let index = fs::read_to_string(project.dist("template/index.html")).unwrap();
    assert!(index.contains(&format!("/static/js/lib/{}", vendor)));
}

#[tokio::test]
async fn invariant_same_named_assets_keep_their_own_references() {
    let project = Project::new();
    project.write("static/css/pages/app.css", "main {\n  color: #00f;\n}\n");
    project.write("static/js/util.js", "var util = 'app';\n");
    project.write("static/js/lib/util.js", "var util = 'lib';\n");
    project.write(
        "template/index.html",
        concat!(
            r#"<link href="/static/css/app.css"><link href="/static/css/pages/app.css">"#,
            r#"<script src="/static/js/util.js"></script><script src="/static/js/lib/util.js"></script>"#,
        ),
    );

    let reports = project.run(&["build"]).await;
    assert!(reports[0].is_success(), "{:?}", reports[0].tasks);

    let top_css = hashed(&project.dist("static/css"), "app", "css");
    let page_css = hashed(&project.dist("static/css/pages"), "app", "css");
    let app_js = hashed(&project.dist("static/js"), "util", "js");
    let lib_js = hashed(&project.dist("static/js/lib"), "util", "js");
    assert_ne!(top_css, page_css);
    assert_ne!(app_js, lib_js);

    let index = fs::read_to_string(project.dist("template/index.html")).unwrap();
    assert_eq!(
        index,
        format!(
            r#"<link href="/static/css/{}"><link href="/static/css/pages/{}"><script src="/static/js/{}"></script><script src="/static/js/lib/{}"></script>"#,
            top_css, page_css, app_js, lib_js
        )
    );
}

#[tokio::test]
async fn invariant_resource_skips_dotfiles() {
    let project = Project::new();
    project.write(".htaccess", "Deny from all\n");
    project.write("static/img/.DS_Store", "junk");
    project.write(".well-known/security.txt", "Contact: ops\n");

    let reports = project.run(&["resource"]).await;
    assert!(reports[0].is_success());
    assert!(project.dist("robots.txt").is_file());
    assert!(!project.dist(".htaccess").exists());
    assert!(!project.dist("static/img/.DS_Store").exists());
    assert!(!project.dist(".well-known").exists());
}

#[tokio::test]
async fn invariant_css_lint_errors_only_report() {
    let project = Project::new();
    project.write("static/css/app.css", "a {}\nb { color: #zzz; }\n");

    let reports = project.run(&["css"]).await;
    assert!(reports[0].is_success(), "{:?}", reports[0].tasks);
    hashed(&project.dist("static/css"), "app", "css");
}

#[tokio::test]
async fn invariant_js_lint_error_fails_build() {
    let project = Project::new();
    project.write("static/js/app.js", "function f(a) {\n  debugger;\n  return a == 1;\n}\n");

    let reports = project.run(&["build"]).await;
    let report = &reports[0];

    assert!(!report.is_success());
    assert!(report.lint_failed());
    assert!(matches!(report.state("js"), Some(TaskState::Failed { lint_failure: true, .. })));
    assert!(matches!(report.state("build"), Some(TaskState::Skipped { failed_dependency }) if failed_dependency == "js"));
    assert!(matches!(report.state("css"), Some(TaskState::Succeeded { .. })));
    assert!(matches!(report.state("resource"), Some(TaskState::Succeeded { .. })));

    let js_dir = project.dist("static/js");
    let app_outputs: Vec<String> = if js_dir.is_dir() {
        listing(&js_dir).into_iter().filter(|n| n.starts_with("app")).collect()
    } else {
        vec![]
    };
    assert!(app_outputs.is_empty(), "{:?}", app_outputs);

    let index = fs::read_to_string(project.dist("template/index.html")).unwrap();
    assert!(index.contains("/static/js/app.js"));
}

#[tokio::test]
async fn invariant_build_waits_for_every_task() {
    let project = Project::new();
    let reports = project.run(&["clean", "build"]).await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].targets, vec!["clean"]);
    let build = &reports[1];
    assert!(build.is_success(), "{:?}", build.tasks);
    assert_eq!(
        build.tasks.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["build", "css", "html", "js", "resource"]
    );

    hashed(&project.dist("static/css"), "app", "css");
    hashed(&project.dist("static/css/lib"), "reset", "css");
    hashed(&project.dist("static/js"), "app", "js");
    assert!(project.dist("robots.txt").is_file());

    let index = fs::read_to_string(project.dist("template/index.html")).unwrap();
    for original in ["/static/css/app.css", "/static/css/lib/reset.css", "/static/js/app.js", "/static/js/lib/vendor.js"] {
        assert!(!index.contains(original), "{} was not rewritten", original);
    }
}

#[tokio::test]
async fn invariant_inline_source_maps() {
    let project = Project::new();
    let config = BuildConfig { source_maps: SourceMapMode::Inline, ..BuildConfig::default() };
    let reports = project.run_with(config, &["js"]).await;
    assert!(reports[0].is_success(), "{:?}", reports[0].tasks);

    let js_dir = project.dist("static/js");
    let app = hashed(&js_dir, "app", "js");
    assert!(listing(&js_dir).iter().all(|n| !n.ends_with(".map")));
    let written = fs::read_to_string(js_dir.join(app)).unwrap();
    assert!(written.contains("\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,"));
}

#[tokio::test]
async fn invariant_unknown_task_is_rejected() {
    let project = Project::new();
    let ctx = project.context(BuildConfig::default());
    let result = run_targets(ctx, &["deploy".to_string()]).await;
    assert!(result.is_err());
    assert!(!project.dist("").exists());
}

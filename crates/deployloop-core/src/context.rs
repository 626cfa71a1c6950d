//! Codebase excerpts handed to the AI stages.
//!
//! Two selections over the same walk: [`api_context`] keeps files that look
//! like HTTP route definitions or API descriptions (for test planning), and
//! [`fix_context`] keeps every source file ranked so manifests, templates and
//! entrypoints come first (for remediation). Both are bounded per file and
//! in aggregate.

use crate::config::ContextConfig;
use crate::error::Result;
use regex::Regex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::{DirEntry, WalkDir};

/// Dependency, build and tool-state directories never worth reading.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".aws-sam",
    "cdk.out",
    ".serverless",
    ".terraform",
    ".deployloop",
    "target",
    "dist",
    "build",
    "coverage",
    ".next",
    "__pycache__",
    ".venv",
    "venv",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "ts", "py", "go", "java", "rb", "json", "yaml", "yml", "tf", "toml",
];

const SKIP_FILES: &[&str] = &["package-lock.json", "yarn.lock", "pnpm-lock.yaml"];

/// Files larger than this are generated or vendored; never read them.
const MAX_FILE_BYTES: u64 = 512 * 1024;

const MANIFESTS: &[&str] = &[
    "package.json",
    "requirements.txt",
    "pyproject.toml",
    "Pipfile",
    "go.mod",
    "tsconfig.json",
];

const ENTRYPOINT_STEMS: &[&str] = &[
    "index",
    "app",
    "main",
    "handler",
    "server",
    "lambda_function",
];

// ---------------------------------------------------------------------------
// CodeContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContextFile {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CodeContext {
    pub files: Vec<ContextFile>,
    /// Files left out because the aggregate budget ran out.
    pub omitted: usize,
}

impl CodeContext {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_chars(&self) -> usize {
        self.files.iter().map(|f| f.content.chars().count()).sum()
    }

    /// Markdown rendering used inside prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for f in &self.files {
            let _ = writeln!(out, "### {}\n```\n{}", f.path, f.content.trim_end());
            if f.truncated {
                out.push_str("... [truncated]\n");
            }
            out.push_str("```\n\n");
        }
        if self.omitted > 0 {
            let _ = writeln!(out, "({} more files omitted)", self.omitted);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

static ROUTE_RE: OnceLock<Regex> = OnceLock::new();

fn route_re() -> &'static Regex {
    ROUTE_RE.get_or_init(|| {
        Regex::new(concat!(
            // Express / Fastify / Koa routers
            r"\b(app|router|server|fastify)\.(get|post|put|patch|delete|route|all)\s*\(",
            // Flask / FastAPI decorators
            r"|@(app|router|bp|api|blueprint)\.(get|post|put|patch|delete|route)\s*\(",
            // Lambda handlers
            r"|exports\.handler\b|export\s+(const|async\s+function|function)\s+handler\b",
            r"|def\s+(lambda_)?handler\s*\(\s*event",
            // API Gateway resources
            r"|APIGatewayProxy|Type:\s*(Api|HttpApi)\b|aws_apigatewayv2_|aws_api_gateway_|HttpApi\(|RestApi\(",
        ))
        .expect("route pattern is valid")
    })
}

fn is_api_description(rel: &str, content: &str) -> bool {
    let name = rel.rsplit('/').next().unwrap_or(rel).to_ascii_lowercase();
    if name.contains("openapi") || name.contains("swagger") {
        return true;
    }
    let head = content.trim_start();
    head.starts_with("openapi:")
        || head.starts_with("swagger:")
        || head.starts_with("{\n  \"openapi\"")
        || head.starts_with("{\"openapi\"")
}

/// Route/handler files and API descriptions, API descriptions first.
pub fn api_context(root: &Path, limits: &ContextConfig) -> Result<CodeContext> {
    let mut docs = Vec::new();
    let mut handlers = Vec::new();
    for (rel, path) in source_files(root) {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        if is_api_description(&rel, &content) {
            docs.push((rel, content));
        } else if route_re().is_match(&content) {
            handlers.push((rel, content));
        }
    }
    tracing::debug!(docs = docs.len(), handlers = handlers.len(), "api context selected");
    docs.extend(handlers);
    Ok(bounded(docs, limits))
}

/// Every source file, manifests then templates then entrypoints then the rest.
pub fn fix_context(root: &Path, limits: &ContextConfig) -> Result<CodeContext> {
    let mut files: Vec<(u8, String, PathBuf)> = source_files(root)
        .into_iter()
        .map(|(rel, path)| (fix_rank(&rel), rel, path))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let loaded = files
        .into_iter()
        .filter_map(|(_, rel, path)| std::fs::read_to_string(&path).ok().map(|c| (rel, c)))
        .collect();
    Ok(bounded(loaded, limits))
}

fn fix_rank(rel: &str) -> u8 {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    let top_level = !rel.contains('/');
    if MANIFESTS.contains(&name) {
        0
    } else if is_infra_template(name) {
        1
    } else if top_level || rel.starts_with("src/") {
        let stem = name.split('.').next().unwrap_or(name);
        if ENTRYPOINT_STEMS.contains(&stem) {
            2
        } else {
            3
        }
    } else {
        3
    }
}

fn is_infra_template(name: &str) -> bool {
    name.ends_with(".tf")
        || name == "cdk.json"
        || [
            "template",
            "serverless",
            "cloudformation",
            "stack",
        ]
        .iter()
        .any(|stem| name == format!("{stem}.yaml") || name == format!("{stem}.yml"))
}

// ---------------------------------------------------------------------------
// Walk + truncation
// ---------------------------------------------------------------------------

fn should_skip(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|n| SKIP_DIRS.contains(&n))
            .unwrap_or(false)
}

/// Candidate source files in lexical order of their relative path.
fn source_files(root: &Path) -> Vec<(String, PathBuf)> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !should_skip(e))
    {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if SKIP_FILES.contains(&name.as_str()) {
            continue;
        }
        let is_source = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SOURCE_EXTENSIONS.contains(&e))
            .unwrap_or(false)
            || MANIFESTS.contains(&name.as_str());
        if !is_source {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        files.push((rel, path.to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

fn bounded(files: Vec<(String, String)>, limits: &ContextConfig) -> CodeContext {
    let mut ctx = CodeContext::default();
    let mut remaining = limits.max_total_chars;
    for (path, content) in files {
        if remaining == 0 {
            ctx.omitted += 1;
            continue;
        }
        let budget = limits.max_file_chars.min(remaining);
        let (kept, truncated) = truncate_chars(&content, budget);
        remaining -= kept.chars().count();
        ctx.files.push(ContextFile {
            path,
            content: kept.to_string(),
            truncated,
        });
    }
    ctx
}

/// Longest prefix of `s` holding at most `max` chars.
pub fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

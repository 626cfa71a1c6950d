//! Test execution engine.
//!
//! Runs a [`TestPlan`] against the deployed API. Each suite starts with its
//! variables seeded from the stack outputs; `storeVariables` captures values
//! from a successful step's response for later steps of the same suite.
//! A failing step ends its suite (the rest are counted as skipped) but never
//! stops later suites. Step failures are data in [`StepResult`], not errors:
//! the only fatal condition is having no base URL.

use crate::config::Config;
use crate::error::Result;
use crate::outputs::{resolve_api_url, StackOutputs};
use crate::plan::{TestPlan, TestStep};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

pub type Variables = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub suite: String,
    pub step_index: usize,
    pub action: String,
    pub method: String,
    pub url: String,
    pub success: bool,
    /// Observed status; absent when the request itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub passed: bool,
    pub steps: Vec<StepResult>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub base_url: String,
    /// Executed steps only.
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub suites: Vec<SuiteResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Plain-text report written next to the JSON results.
    pub fn render_log(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# deployloop test run against {}", self.base_url);
        let _ = writeln!(
            out,
            "# started {} finished {}",
            self.started_at.to_rfc3339(),
            self.finished_at.to_rfc3339()
        );
        for suite in &self.suites {
            let mark = if suite.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "\n[{mark}] {}", suite.name);
            for step in &suite.steps {
                let status = step
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "---".to_string());
                let mark = if step.success { "ok  " } else { "FAIL" };
                let _ = writeln!(
                    out,
                    "  {mark} #{} {} {} -> {status} ({}ms) {}",
                    step.step_index + 1,
                    step.method,
                    step.url,
                    step.duration_ms,
                    step.action
                );
                if let Some(err) = &step.error {
                    let _ = writeln!(out, "       {err}");
                }
            }
            if suite.skipped > 0 {
                let _ = writeln!(out, "  skipped {} remaining step(s)", suite.skipped);
            }
        }
        let _ = writeln!(
            out,
            "\ntotal={} passed={} failed={} skipped={}",
            self.total, self.passed, self.failed, self.skipped
        );
        out
    }
}

// ---------------------------------------------------------------------------
// Substitution and path lookup
// ---------------------------------------------------------------------------

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("placeholder pattern is valid")
    })
}

/// Replace `${name}` with its value; unknown names stay as written.
pub fn substitute(template: &str, vars: &Variables) -> String {
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Substitute inside every string of a JSON value. Keys are left alone.
pub fn substitute_value(value: &Value, vars: &Variables) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve a dotted path (`response.data.items.0.id`, `items[0].id`) against
/// a response body.
pub fn lookup_path<'v>(body: &'v Value, path: &str) -> Option<&'v Value> {
    let path = path.trim();
    let path = path.strip_prefix("response").map_or(path, |rest| {
        if rest.is_empty() || rest.starts_with('.') || rest.starts_with('[') {
            rest
        } else {
            path
        }
    });
    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = body;
    for segment in normalized.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub step_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            step_delay: Duration::from_millis(cfg.testing.step_delay_ms),
            request_timeout: Duration::from_secs(cfg.testing.request_timeout_secs),
        }
    }
}

pub struct TestEngine {
    client: reqwest::Client,
    options: EngineOptions,
}

impl TestEngine {
    pub fn new(options: EngineOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self { client, options })
    }

    /// Execute every suite in order. Fails only with `NoEndpointFound`.
    pub async fn execute(&self, plan: &TestPlan, outputs: &StackOutputs) -> Result<RunSummary> {
        let base_url = resolve_api_url(outputs)?;
        let base = base_url.trim_end_matches('/');
        let started_at = Utc::now();
        tracing::info!(base_url = %base_url, suites = plan.suites.len(), "executing test plan");

        let mut suites = Vec::with_capacity(plan.suites.len());
        for suite in &plan.suites {
            let mut vars: Variables = outputs.clone();
            let mut results = Vec::new();
            let mut skipped = 0;

            for (index, step) in suite.steps.iter().enumerate() {
                let result = self.run_step(base, &suite.name, index, step, &mut vars).await;
                let ok = result.success;
                results.push(result);
                if !ok {
                    skipped = suite.steps.len() - index - 1;
                    if skipped > 0 {
                        tracing::info!(suite = %suite.name, skipped, "suite short-circuited");
                    }
                    break;
                }
                if index + 1 < suite.steps.len() && !self.options.step_delay.is_zero() {
                    tokio::time::sleep(self.options.step_delay).await;
                }
            }

            suites.push(SuiteResult {
                name: suite.name.clone(),
                passed: skipped == 0 && results.iter().all(|r| r.success),
                steps: results,
                skipped,
            });
        }

        let total = suites.iter().map(|s| s.steps.len()).sum();
        let passed = suites
            .iter()
            .flat_map(|s| &s.steps)
            .filter(|r| r.success)
            .count();
        let skipped = suites.iter().map(|s| s.skipped).sum();
        let summary = RunSummary {
            base_url,
            total,
            passed,
            failed: total - passed,
            skipped,
            suites,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            "test run finished"
        );
        Ok(summary)
    }

    async fn run_step(
        &self,
        base: &str,
        suite: &str,
        index: usize,
        step: &TestStep,
        vars: &mut Variables,
    ) -> StepResult {
        let endpoint = substitute(&step.endpoint, vars);
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint
        } else if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            format!("{base}/{endpoint}")
        };
        let method_name = step.method.trim().to_ascii_uppercase();
        let mut result = StepResult {
            suite: suite.to_string(),
            step_index: index,
            action: step.action.clone(),
            method: method_name.clone(),
            url: url.clone(),
            success: false,
            status: None,
            error: None,
            duration_ms: 0,
        };

        let method = match reqwest::Method::from_bytes(method_name.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                result.error = Some(format!("invalid HTTP method '{}'", step.method));
                return result;
            }
        };

        let mut request = self.client.request(method, &url);
        if let Some(headers) = &step.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), substitute(value, vars));
            }
        }
        if let Some(body) = &step.body {
            request = request.json(&substitute_value(body, vars));
        }

        let started = Instant::now();
        let response = request.send().await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                let kind = if e.is_timeout() { "timed out" } else { "request failed" };
                result.error = Some(format!("{kind}: {e}"));
                tracing::warn!(suite, step = index, url = %url, error = %e, "test request failed");
                return result;
            }
        };

        let status = response.status().as_u16();
        result.status = Some(status);
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                result.duration_ms = started.elapsed().as_millis() as u64;
                let kind = if e.is_timeout() { "timed out" } else { "request failed" };
                result.error = Some(format!("{kind} reading response body: {e}"));
                tracing::warn!(suite, step = index, url = %url, error = %e, "test response body unreadable");
                return result;
            }
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        if status != step.expected_status {
            result.error = Some(format!(
                "expected status {} but got {status}: {}",
                step.expected_status,
                crate::context::truncate_chars(text.trim(), 200).0
            ));
            tracing::warn!(suite, step = index, status, expected = step.expected_status, "assertion failed");
            return result;
        }
        result.success = true;
        tracing::debug!(suite, step = index, status, "step passed");

        if let Some(store) = &step.store_variables {
            let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            for (name, path) in store {
                match lookup_path(&body, path) {
                    Some(v) => {
                        vars.insert(name.clone(), value_text(v));
                    }
                    None => {
                        tracing::warn!(suite, step = index, variable = %name, path = %path, "path not found in response; variable left unset");
                    }
                }
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

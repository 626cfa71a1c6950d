use crate::error::{LoopError, Result};
use crate::paths;
use crate::run_dir::RunDir;
use crate::runner::{tail, CommandRunner, ToolCommand};
use crate::strategy;
use crate::types::DeploymentKind;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Flat output-key → value map. Sorted, so "first" is deterministic.
pub type StackOutputs = BTreeMap<String, String>;

/// Keys checked, in order, before falling back to any `http` value.
pub const API_URL_KEYS: &[&str] = &[
    "ApiUrl",
    "api_url",
    "endpoint",
    "url",
    "ServiceEndpoint",
    "HttpApiUrl",
];

pub const SERVERLESS_STATE: &str = ".serverless/serverless-state.json";

/// Inputs for reading a deployment's outputs back.
pub struct OutputsContext<'a> {
    pub kind: DeploymentKind,
    pub project_dir: &'a Path,
    pub run: &'a RunDir,
    pub stack_name: &'a str,
    pub region: &'a str,
    pub stage: &'a str,
    pub runner: &'a dyn CommandRunner,
    pub timeout: Duration,
}

impl OutputsContext<'_> {
    fn unavailable(&self, reason: impl Into<String>) -> LoopError {
        LoopError::OutputsUnavailable {
            kind: self.kind,
            reason: reason.into(),
        }
    }
}

/// Normalize the kind-specific outputs and persist them as `outputs.json`.
pub fn extract_outputs(ctx: &OutputsContext) -> Result<StackOutputs> {
    let strategy = strategy::strategy_for(ctx.kind)
        .ok_or_else(|| ctx.unavailable("deployment kind is unknown"))?;
    let outputs = (strategy.extract)(ctx)?;
    ctx.run.write_json(paths::OUTPUTS_JSON, &outputs)?;
    tracing::info!(kind = %ctx.kind, count = outputs.len(), "stack outputs extracted");
    Ok(outputs)
}

// ---------------------------------------------------------------------------
// CloudFormation stack query (sam, cloudformation, lambda)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct StackOutput {
    #[serde(rename = "OutputKey")]
    key: String,
    #[serde(rename = "OutputValue", default)]
    value: String,
}

pub fn extract_stack(ctx: &OutputsContext) -> Result<StackOutputs> {
    describe_stack(ctx, ctx.stack_name)
}

fn describe_stack(ctx: &OutputsContext, stack_name: &str) -> Result<StackOutputs> {
    let cmd = ToolCommand::new("aws", ctx.project_dir).args([
        "cloudformation",
        "describe-stacks",
        "--stack-name",
        stack_name,
        "--region",
        ctx.region,
        "--query",
        "Stacks[0].Outputs",
        "--output",
        "json",
    ]);
    let output = ctx
        .runner
        .run(&cmd, ctx.timeout)
        .map_err(|e| ctx.unavailable(e.to_string()))?;
    if !output.success() {
        return Err(ctx.unavailable(format!(
            "describe-stacks for '{stack_name}' failed: {}",
            tail(&output.stderr, 2000)
        )));
    }
    parse_stack_outputs(&output.stdout).map_err(|e| ctx.unavailable(e))
}

/// Parse `[{OutputKey, OutputValue}]`; JSON `null` means the stack has none.
pub fn parse_stack_outputs(text: &str) -> std::result::Result<StackOutputs, String> {
    let text = text.trim();
    if text.is_empty() || text == "null" {
        return Ok(StackOutputs::new());
    }
    let entries: Vec<StackOutput> =
        serde_json::from_str(text).map_err(|e| format!("unreadable describe-stacks output: {e}"))?;
    Ok(entries.into_iter().map(|o| (o.key, o.value)).collect())
}

// ---------------------------------------------------------------------------
// CDK
// ---------------------------------------------------------------------------

/// JSON object that keeps its keys in document order.
struct OrderedObject(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for OrderedObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = OrderedObject;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<OrderedObject, A::Error> {
                let mut entries = Vec::new();
                while let Some((k, v)) = map.next_entry::<String, Value>()? {
                    entries.push((k, v));
                }
                Ok(OrderedObject(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

pub fn extract_cdk(ctx: &OutputsContext) -> Result<StackOutputs> {
    let path = ctx.run.raw(paths::CDK_OUTPUTS_JSON);
    let Some(text) = crate::io::read_optional(&path)? else {
        return Err(ctx.unavailable(format!("{} not found", path.display())));
    };
    parse_cdk_outputs(&text).map_err(|e| ctx.unavailable(e))
}

/// Flatten `{stack: {key: value}}`. Stacks are applied in file order, so a
/// later stack's value wins on a key collision.
pub fn parse_cdk_outputs(text: &str) -> std::result::Result<StackOutputs, String> {
    let stacks: OrderedObject =
        serde_json::from_str(text).map_err(|e| format!("unreadable cdk outputs: {e}"))?;
    let mut outputs = StackOutputs::new();
    for (stack, body) in stacks.0 {
        let Value::Object(entries) = body else {
            tracing::warn!(stack = %stack, "cdk outputs entry is not an object; skipping");
            continue;
        };
        for (key, value) in entries {
            outputs.insert(key, value_text(&value));
        }
    }
    Ok(outputs)
}

// ---------------------------------------------------------------------------
// Terraform
// ---------------------------------------------------------------------------

pub fn extract_terraform(ctx: &OutputsContext) -> Result<StackOutputs> {
    let cmd = ToolCommand::new("terraform", ctx.project_dir).args(["output", "-json"]);
    let output = ctx
        .runner
        .run(&cmd, ctx.timeout)
        .map_err(|e| ctx.unavailable(e.to_string()))?;
    if !output.success() {
        return Err(ctx.unavailable(format!(
            "terraform output failed: {}",
            tail(&output.stderr, 2000)
        )));
    }
    parse_terraform_outputs(&output.stdout).map_err(|e| ctx.unavailable(e))
}

/// Unwrap `{name: {value, sensitive, type}}` to `{name: value}`.
pub fn parse_terraform_outputs(text: &str) -> std::result::Result<StackOutputs, String> {
    let root: serde_json::Map<String, Value> =
        serde_json::from_str(text).map_err(|e| format!("unreadable terraform output: {e}"))?;
    Ok(root
        .into_iter()
        .map(|(name, entry)| {
            let value = match entry {
                Value::Object(mut o) => o.remove("value").unwrap_or(Value::Null),
                other => other,
            };
            (name, value_text(&value))
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Serverless Framework
// ---------------------------------------------------------------------------

/// Service facts recovered from the state file or `serverless.yml`.
#[derive(Debug, Default)]
struct ServerlessService {
    service: Option<String>,
    stage: Option<String>,
    region: Option<String>,
    function_paths: Vec<(String, String)>,
}

pub fn extract_serverless(ctx: &OutputsContext) -> Result<StackOutputs> {
    let state_path = ctx.project_dir.join(SERVERLESS_STATE);
    let from_state = match crate::io::read_optional(&state_path)? {
        Some(text) => Some(parse_serverless_state(&text).map_err(|e| ctx.unavailable(e))?),
        None => None,
    };

    let mut outputs = StackOutputs::new();
    let mut service = from_state.unwrap_or_default();
    outputs.extend(serverless_entries(&service));

    if resolve_api_url(&outputs).is_ok() {
        return Ok(outputs);
    }

    if service.service.is_none() {
        service.service = serverless_yml_service(ctx.project_dir)?;
    }
    let Some(name) = service.service.as_deref() else {
        return Err(ctx.unavailable(format!(
            "{SERVERLESS_STATE} missing and no service name in serverless.yml"
        )));
    };
    let stage = service.stage.as_deref().unwrap_or(ctx.stage);
    let stack_name = format!("{name}-{stage}");
    tracing::debug!(stack = %stack_name, "falling back to CloudFormation outputs");

    match describe_stack(ctx, &stack_name) {
        Ok(stack) => outputs.extend(stack),
        Err(e) if !outputs.is_empty() => {
            tracing::warn!(stack = %stack_name, error = %e, "stack fallback failed; keeping state outputs");
        }
        Err(e) => return Err(e),
    }
    Ok(outputs)
}

fn serverless_entries(svc: &ServerlessService) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    if let Some(s) = &svc.service {
        entries.push(("service".to_string(), s.clone()));
    }
    if let Some(s) = &svc.stage {
        entries.push(("stage".to_string(), s.clone()));
    }
    if let Some(r) = &svc.region {
        entries.push(("region".to_string(), r.clone()));
    }
    for (function, path) in &svc.function_paths {
        entries.push((format!("{function}Path"), path.clone()));
    }
    entries
}

fn parse_serverless_state(text: &str) -> std::result::Result<ServerlessService, String> {
    let state: Value =
        serde_json::from_str(text).map_err(|e| format!("unreadable serverless state: {e}"))?;
    let service = &state["service"];
    let name = match &service["service"] {
        Value::String(s) => Some(s.clone()),
        v => v["name"].as_str().map(str::to_string),
    };
    let provider = &service["provider"];

    let mut function_paths = Vec::new();
    if let Some(functions) = service["functions"].as_object() {
        for (fname, def) in functions {
            let events = def["events"].as_array().map(Vec::as_slice).unwrap_or(&[]);
            let path = events.iter().find_map(|ev| {
                ["http", "httpApi"].iter().find_map(|k| match &ev[*k] {
                    Value::Object(o) => o.get("path").and_then(Value::as_str).map(str::to_string),
                    // Shorthand: `httpApi: 'GET /users'`
                    Value::String(s) => s.split_whitespace().last().map(str::to_string),
                    _ => None,
                })
            });
            if let Some(p) = path {
                function_paths.push((fname.clone(), p));
            }
        }
    }

    Ok(ServerlessService {
        service: name,
        stage: provider["stage"].as_str().map(str::to_string),
        region: provider["region"].as_str().map(str::to_string),
        function_paths,
    })
}

fn serverless_yml_service(project_dir: &Path) -> Result<Option<String>> {
    for name in ["serverless.yml", "serverless.yaml"] {
        let Some(text) = crate::io::read_optional(&project_dir.join(name))? else {
            continue;
        };
        let doc: serde_yaml::Value = serde_yaml::from_str(&text)?;
        let service = match &doc["service"] {
            serde_yaml::Value::String(s) => Some(s.clone()),
            v => v["name"].as_str().map(str::to_string),
        };
        return Ok(service);
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// URL resolution
// ---------------------------------------------------------------------------

/// Pick the API base URL: preferred keys first, then the first value in key
/// order that starts with `http`.
pub fn resolve_api_url(outputs: &StackOutputs) -> Result<String> {
    let preferred = API_URL_KEYS
        .iter()
        .filter_map(|k| outputs.get(*k))
        .map(|v| v.trim())
        .find(|v| !v.is_empty());
    if let Some(url) = preferred {
        return Ok(url.to_string());
    }
    outputs
        .values()
        .map(|v| v.trim())
        .find(|v| v.starts_with("http"))
        .map(str::to_string)
        .ok_or_else(|| LoopError::NoEndpointFound {
            keys: if outputs.is_empty() {
                "none".to_string()
            } else {
                outputs.keys().cloned().collect::<Vec<_>>().join(", ")
            },
        })
}

/// Scalar strings stay bare; anything else is stored as JSON text.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

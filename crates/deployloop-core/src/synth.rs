use crate::config::Config;
use crate::context::{truncate_chars, CodeContext};
use crate::error::{LoopError, Result};
use crate::plan::TestPlan;
use ai_gateway::{extract_json, strip_fence, GatewayError, GenerateRequest, TextGenerator};
use serde_json::Value;

const SYSTEM_PROMPT: &str = "You are a senior QA engineer who writes HTTP API integration \
tests. You respond with a single JSON object and nothing else.";

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub max_suites: usize,
    pub max_steps_per_suite: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&Config> for SynthesisOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            max_suites: cfg.testing.max_suites,
            max_steps_per_suite: cfg.testing.max_steps_per_suite,
            max_tokens: cfg.ai.max_tokens,
            temperature: cfg.ai.temperature,
        }
    }
}

/// Turns an endpoint plus code excerpts into a [`TestPlan`].
pub struct Synthesizer<'a, G> {
    generator: &'a G,
    options: SynthesisOptions,
}

impl<'a, G: TextGenerator> Synthesizer<'a, G> {
    pub fn new(generator: &'a G, options: SynthesisOptions) -> Self {
        Self { generator, options }
    }

    pub async fn synthesize(&self, api_url: &str, context: &CodeContext) -> Result<TestPlan> {
        let prompt = build_prompt(api_url, context, &self.options);
        let req = GenerateRequest::new(prompt)
            .with_system(SYSTEM_PROMPT)
            .with_max_tokens(self.options.max_tokens)
            .with_temperature(self.options.temperature);

        tracing::info!(
            generator = %self.generator.describe(),
            context_files = context.files.len(),
            "synthesizing test plan"
        );
        let text = self.generator.generate(req).await?;
        let mut plan = parse_plan(&text)?;

        if plan.enforce_limits(self.options.max_suites, self.options.max_steps_per_suite) {
            tracing::warn!(
                max_suites = self.options.max_suites,
                max_steps = self.options.max_steps_per_suite,
                "test plan exceeded size bound; truncated"
            );
        }
        if plan.is_empty() {
            return Err(LoopError::EmptyPlan);
        }
        tracing::info!(suites = plan.suites.len(), steps = plan.step_count(), "test plan ready");
        Ok(plan)
    }
}

/// Parse a model response into a plan. A bare array is taken as the suite
/// list; an object must carry a `suites` key.
pub fn parse_plan(text: &str) -> Result<TestPlan> {
    let body = strip_fence(text).trim();
    let value = if body.starts_with('[') {
        serde_json::from_str::<Value>(body).map_err(|e| malformed(text, e))?
    } else {
        let (value, strategy) = extract_json(text)?;
        tracing::debug!(?strategy, "test plan JSON extracted");
        value
    };
    let value = match value {
        Value::Array(suites) => serde_json::json!({ "suites": suites }),
        Value::Object(map) if !map.contains_key("suites") => {
            return Err(malformed(text, "object has no `suites` key"));
        }
        other => other,
    };
    serde_json::from_value(value).map_err(|e| malformed(text, e))
}

fn malformed(text: &str, cause: impl std::fmt::Display) -> LoopError {
    LoopError::Gateway(GatewayError::MalformedResponse {
        reason: format!("response does not match the test plan shape: {cause}"),
        preview: truncate_chars(text, 300).0.to_string(),
    })
}

pub fn build_prompt(api_url: &str, context: &CodeContext, options: &SynthesisOptions) -> String {
    let code = if context.is_empty() {
        "(no route or handler files were found; infer a minimal health-check style plan)\n"
            .to_string()
    } else {
        context.render()
    };
    format!(
        r#"Write an integration test plan for the HTTP API deployed at {api_url}.

Rules:
- Success paths only. Every step must be expected to succeed against a healthy deployment.
- Order steps create -> read -> update -> delete so each step can use what earlier steps created.
- At most {max_suites} suites and at most {max_steps} steps per suite.
- `endpoint` is a path relative to the base URL (for example "/users"), never a full URL.
- Capture values from a response with `storeVariables` (variable name -> dotted path such as "id" or "data.items.0.id")
  and reference them in later steps of the same suite as ${{name}} inside endpoint, headers or body.
- Variables do not carry across suites.
- `expectedStatus` is the exact HTTP status code a successful call returns.

Respond with JSON only, in exactly this shape:
{{
  "suites": [
    {{
      "name": "string",
      "description": "string",
      "steps": [
        {{
          "action": "what the step does",
          "endpoint": "/path/${{var}}",
          "method": "GET|POST|PUT|PATCH|DELETE",
          "body": {{}},
          "headers": {{"Content-Type": "application/json"}},
          "expectedStatus": 200,
          "storeVariables": {{"var": "path.in.response"}}
        }}
      ]
    }}
  ]
}}

Relevant source files:

{code}"#,
        max_suites = options.max_suites,
        max_steps = options.max_steps_per_suite,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned responses in order and records prompts.
    pub(crate) struct CannedGenerator {
        responses: Mutex<Vec<String>>,
        pub(crate) prompts: Mutex<Vec<GenerateRequest>>,
    }

    impl CannedGenerator {
        pub(crate) fn new(responses: &[&str]) -> Self {
            let mut r: Vec<String> = responses.iter().map(|s| s.to_string()).collect();
            r.reverse();
            Self {
                responses: Mutex::new(r),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextGenerator for CannedGenerator {
        async fn generate(&self, req: GenerateRequest) -> ai_gateway::Result<String> {
            self.prompts.lock().unwrap().push(req);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| GatewayError::Provider {
                    provider: "canned".into(),
                    message: "no more responses".into(),
                })
        }

        fn describe(&self) -> String {
            "canned/test".to_string()
        }
    }

    fn options() -> SynthesisOptions {
        SynthesisOptions::from(&Config::default())
    }

    #[tokio::test]
    async fn fenced_plan_is_parsed() {
        let gen = CannedGenerator::new(&[
            "Here you go:\n```json\n{\"suites\":[{\"name\":\"Health\",\"steps\":[{\"endpoint\":\"/health\"}]}]}\n```",
        ]);
        let plan = Synthesizer::new(&gen, options())
            .synthesize("https://api.example.com", &CodeContext::default())
            .await
            .unwrap();
        assert_eq!(plan.suites[0].name, "Health");

        let prompts = gen.prompts.lock().unwrap();
        assert!(prompts[0].prompt.contains("https://api.example.com"));
        assert!(prompts[0].prompt.contains("At most 5 suites"));
        assert!(prompts[0].system_prompt.is_some());
    }

    #[tokio::test]
    async fn oversize_plan_is_truncated() {
        let step = r#"{"endpoint":"/x"}"#;
        let steps = vec![step; 8].join(",");
        let suites: Vec<String> = (0..7)
            .map(|i| format!(r#"{{"name":"s{i}","steps":[{steps}]}}"#))
            .collect();
        let body = format!(r#"{{"suites":[{}]}}"#, suites.join(","));
        let gen = CannedGenerator::new(&[&body]);
        let plan = Synthesizer::new(&gen, options())
            .synthesize("https://x", &CodeContext::default())
            .await
            .unwrap();
        assert_eq!(plan.suites.len(), 5);
        assert!(plan.suites.iter().all(|s| s.steps.len() == 5));
    }

    #[tokio::test]
    async fn empty_plan_is_an_error() {
        let gen = CannedGenerator::new(&[r#"{"suites":[{"name":"a","steps":[]}]}"#]);
        let err = Synthesizer::new(&gen, options())
            .synthesize("https://x", &CodeContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::EmptyPlan));
    }

    #[test]
    fn bare_array_is_suite_list() {
        let plan = parse_plan(r#"[{"name":"a","steps":[{"endpoint":"/"}]}]"#).unwrap();
        assert_eq!(plan.suites.len(), 1);
    }

    #[test]
    fn fenced_bare_array_is_suite_list() {
        let text = "Here you go:\n```json\n[{\"name\":\"a\",\"steps\":[{\"endpoint\":\"/\"}]},\n {\"name\":\"b\",\"steps\":[{\"endpoint\":\"/b\"}]}]\n```\n";
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.suites.len(), 2);
        assert_eq!(plan.suites[1].name, "b");
    }

    #[test]
    fn object_without_suites_is_malformed() {
        let err = parse_plan(r#"{"name":"a","steps":[{"endpoint":"/"}]}"#).unwrap_err();
        assert!(err.to_string().contains("suites"));
        assert!(matches!(
            err,
            LoopError::Gateway(GatewayError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let err = parse_plan(r#"{"suites":"nope"}"#).unwrap_err();
        assert!(matches!(
            err,
            LoopError::Gateway(GatewayError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn prose_only_is_malformed() {
        assert!(parse_plan("I cannot help with that.").is_err());
    }
}

use crate::config::Config;
use crate::error::{LoopError, Result};
use ai_gateway::{extract_json, strip_fence, GatewayError, GenerateRequest, TextGenerator};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

const PLAN_SYSTEM_PROMPT: &str = "You are a senior cloud engineer planning a new serverless \
project. You respond with a single JSON object and nothing else.";

const FILE_SYSTEM_PROMPT: &str = "You are a senior cloud engineer writing one file of a new \
project. You respond with the complete file content only.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldPlan {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub files: Vec<ScaffoldFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaffoldFile {
    pub path: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScaffoldOutcome {
    pub project_name: String,
    pub written: Vec<String>,
    /// Existing files left untouched (no `--force`).
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScaffoldOptions {
    pub max_files: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&Config> for ScaffoldOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            max_files: cfg.scaffold.max_files,
            max_tokens: cfg.ai.max_tokens,
            temperature: cfg.ai.temperature,
        }
    }
}

/// A path that stays inside the target directory once joined.
pub fn validate_relative_path(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim();
    let reject = |why: &str| LoopError::InvalidScaffold(format!("'{path}': {why}"));
    if trimmed.is_empty() {
        return Err(reject("empty path"));
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') || trimmed.contains(':') {
        return Err(reject("absolute paths are not allowed"));
    }
    let p = Path::new(trimmed);
    let mut clean = PathBuf::new();
    for component in p.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(reject("'..' escapes the target directory")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(reject("absolute paths are not allowed"))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(reject("empty path"));
    }
    Ok(clean)
}

/// Unwrap a response that is one fenced block. Fences inside the content
/// (a README's shell snippets) are kept.
fn unwrap_file(text: &str) -> &str {
    if text.trim_start().starts_with("```") {
        strip_fence(text)
    } else {
        text
    }
}

pub struct Scaffolder<'a, G> {
    generator: &'a G,
    options: ScaffoldOptions,
}

impl<'a, G: TextGenerator> Scaffolder<'a, G> {
    pub fn new(generator: &'a G, options: ScaffoldOptions) -> Self {
        Self { generator, options }
    }

    /// Ask for the file manifest. Unsafe paths reject the whole plan.
    pub async fn plan_scaffold(&self, spec: &str) -> Result<ScaffoldPlan> {
        let prompt = format!(
            "Plan the files for a new project implementing the specification below. \
             Include an infrastructure template (AWS SAM `template.yaml`, a CDK app, or Terraform), \
             the handler source, a dependency manifest and a README. At most {max} files. \
             Paths are relative to the project root.\n\n\
             Respond with JSON only:\n\
             {{\"projectName\": \"kebab-case-name\", \"files\": [{{\"path\": \"relative/path\", \"purpose\": \"one line\"}}]}}\n\n\
             ## Specification\n\n{spec}\n",
            max = self.options.max_files
        );
        let req = GenerateRequest::new(prompt)
            .with_system(PLAN_SYSTEM_PROMPT)
            .with_max_tokens(self.options.max_tokens)
            .with_temperature(self.options.temperature);
        let text = self.generator.generate(req).await?;
        let (value, _) = extract_json(&text)?;
        let mut plan: ScaffoldPlan = serde_json::from_value(value).map_err(|e| {
            GatewayError::MalformedResponse {
                reason: format!("response does not match the scaffold plan shape: {e}"),
                preview: crate::context::truncate_chars(&text, 300).0.to_string(),
            }
        })?;

        let cleaned = plan
            .files
            .iter()
            .map(|f| validate_relative_path(&f.path))
            .collect::<Result<Vec<PathBuf>>>()?;
        let mut seen = HashSet::new();
        plan.files = std::mem::take(&mut plan.files)
            .into_iter()
            .zip(cleaned)
            .filter_map(|(file, path)| seen.insert(path).then_some(file))
            .collect();
        if plan.files.is_empty() {
            return Err(LoopError::InvalidScaffold("plan lists no files".to_string()));
        }
        if plan.files.len() > self.options.max_files {
            tracing::warn!(
                files = plan.files.len(),
                max = self.options.max_files,
                "scaffold plan exceeded file bound; truncated"
            );
            plan.files.truncate(self.options.max_files);
        }
        tracing::info!(project = %plan.project_name, files = plan.files.len(), "scaffold planned");
        Ok(plan)
    }

    pub async fn generate_file(
        &self,
        spec: &str,
        plan: &ScaffoldPlan,
        file: &ScaffoldFile,
    ) -> Result<String> {
        let manifest: String = plan
            .files
            .iter()
            .map(|f| format!("- {}: {}\n", f.path, f.purpose))
            .collect();
        let prompt = format!(
            "Project: {name}\n\nAll files in the project:\n{manifest}\n\
             Write the complete content of `{path}` ({purpose}). It must work together with the \
             other files listed. Output only the file content.\n\n## Specification\n\n{spec}\n",
            name = plan.project_name,
            path = file.path,
            purpose = file.purpose,
        );
        let req = GenerateRequest::new(prompt)
            .with_system(FILE_SYSTEM_PROMPT)
            .with_max_tokens(self.options.max_tokens)
            .with_temperature(self.options.temperature);
        let text = self.generator.generate(req).await?;
        let mut content = unwrap_file(&text).trim_matches('\n').to_string();
        content.push('\n');
        Ok(content)
    }

    /// Plan, then generate and write each file under `out_dir` in order.
    pub async fn scaffold(&self, spec: &str, out_dir: &Path, force: bool) -> Result<ScaffoldOutcome> {
        let plan = self.plan_scaffold(spec).await?;
        crate::io::ensure_dir(out_dir)?;
        let mut outcome = ScaffoldOutcome {
            project_name: plan.project_name.clone(),
            ..Default::default()
        };
        for file in &plan.files {
            let rel = validate_relative_path(&file.path)?;
            let target = out_dir.join(&rel);
            let shown = rel.to_string_lossy().replace('\\', "/");
            if target.exists() && !force {
                tracing::info!(path = %shown, "exists; skipping");
                outcome.skipped.push(shown);
                continue;
            }
            let content = self.generate_file(spec, &plan, file).await?;
            crate::io::atomic_write(&target, content.as_bytes())?;
            tracing::debug!(path = %shown, bytes = content.len(), "scaffold file written");
            outcome.written.push(shown);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::tests::CannedGenerator;
    use tempfile::TempDir;

    fn options() -> ScaffoldOptions {
        ScaffoldOptions::from(&Config::default())
    }

    const PLAN: &str = r#"{"projectName":"todo-api","files":[
        {"path":"template.yaml","purpose":"SAM template"},
        {"path":"src/index.js","purpose":"handler"}]}"#;

    #[test]
    fn path_validation() {
        assert_eq!(
            validate_relative_path("./src/index.js").unwrap(),
            PathBuf::from("src/index.js")
        );
        for bad in ["", "/etc/passwd", "../x", "src/../../x", "C:\\win", "\\\\share\\x"] {
            assert!(
                matches!(validate_relative_path(bad), Err(LoopError::InvalidScaffold(_))),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn writes_files_and_unwraps_fences() {
        let dir = TempDir::new().unwrap();
        let gen = CannedGenerator::new(&[
            PLAN,
            "```yaml\nTransform: AWS::Serverless-2016-10-31\n```",
            "exports.handler = async () => ({ statusCode: 200 });",
        ]);
        let outcome = Scaffolder::new(&gen, options())
            .scaffold("A todo API", dir.path(), false)
            .await
            .unwrap();
        assert_eq!(outcome.project_name, "todo-api");
        assert_eq!(outcome.written, ["template.yaml", "src/index.js"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("template.yaml")).unwrap(),
            "Transform: AWS::Serverless-2016-10-31\n"
        );
        assert!(dir.path().join("src/index.js").exists());

        let prompts = gen.prompts.lock().unwrap();
        assert!(prompts[2].prompt.contains("`src/index.js`"));
        assert!(prompts[2].prompt.contains("- template.yaml: SAM template"));
    }

    #[test]
    fn inner_fences_survive() {
        let readme = "# Todo\n\n```bash\nnpm test\n```\n";
        assert_eq!(unwrap_file(readme), readme);
        assert_eq!(unwrap_file("```js\nx();\n```"), "x();\n");
    }

    #[tokio::test]
    async fn existing_files_skipped_without_force() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("template.yaml"), "mine").unwrap();
        let gen = CannedGenerator::new(&[PLAN, "handler"]);
        let outcome = Scaffolder::new(&gen, options())
            .scaffold("spec", dir.path(), false)
            .await
            .unwrap();
        assert_eq!(outcome.skipped, ["template.yaml"]);
        assert_eq!(outcome.written, ["src/index.js"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("template.yaml")).unwrap(),
            "mine"
        );
    }

    #[tokio::test]
    async fn escaping_path_rejects_plan() {
        let dir = TempDir::new().unwrap();
        let gen = CannedGenerator::new(&[
            r#"{"projectName":"x","files":[{"path":"ok.txt"},{"path":"../../.bashrc"}]}"#,
        ]);
        let err = Scaffolder::new(&gen, options())
            .scaffold("spec", dir.path(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::InvalidScaffold(_)));
        assert!(!dir.path().join("ok.txt").exists());
    }

    #[tokio::test]
    async fn plan_is_bounded_and_deduplicated() {
        let files: Vec<String> = (0..30)
            .map(|i| format!(r#"{{"path":"f{}.txt"}}"#, i % 28))
            .collect();
        let body = format!(r#"{{"projectName":"big","files":[{}]}}"#, files.join(","));
        let gen = CannedGenerator::new(&[&body]);
        let plan = Scaffolder::new(&gen, options())
            .plan_scaffold("spec")
            .await
            .unwrap();
        assert_eq!(plan.files.len(), 25);
        assert_eq!(plan.files[0].path, "f0.txt");
    }

    #[tokio::test]
    async fn equivalent_paths_collapse_to_first() {
        let body = r#"{"projectName":"dup","files":[
            {"path":"./src/app.js","purpose":"first"},
            {"path":"src/app.js","purpose":"second"},
            {"path":"README.md","purpose":"docs"}]}"#;
        let gen = CannedGenerator::new(&[body]);
        let plan = Scaffolder::new(&gen, options())
            .plan_scaffold("spec")
            .await
            .unwrap();
        let purposes: Vec<&str> = plan.files.iter().map(|f| f.purpose.as_str()).collect();
        assert_eq!(purposes, ["first", "docs"]);
    }
}

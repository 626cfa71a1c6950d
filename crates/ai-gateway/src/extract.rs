//! Pulling structured payloads out of free-form model output.
//!
//! Models wrap JSON in prose or markdown fences and patches in code blocks.
//! These helpers recover the payload or fail loudly; they never guess at a
//! partial structure.

use serde_json::Value;

use crate::{GatewayError, Result};

/// Which strategy produced the parsed JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStrategy {
    FencedBlock,
    BraceSpan,
    WholeText,
}

/// Parse JSON from model output.
///
/// Tries, in order: the first fenced code block, the first balanced
/// `{...}` span, the whole trimmed text. The first successful parse wins.
pub fn extract_json(text: &str) -> Result<(Value, JsonStrategy)> {
    if let Some(block) = first_fenced_block(text) {
        if let Ok(v) = serde_json::from_str(block.trim()) {
            return Ok((v, JsonStrategy::FencedBlock));
        }
    }
    if let Some(span) = first_brace_span(text) {
        if let Ok(v) = serde_json::from_str(span) {
            return Ok((v, JsonStrategy::BraceSpan));
        }
    }
    match serde_json::from_str(text.trim()) {
        Ok(v) => Ok((v, JsonStrategy::WholeText)),
        Err(e) => Err(GatewayError::MalformedResponse {
            reason: format!("no parseable JSON found: {e}"),
            preview: preview(text),
        }),
    }
}

/// Extract a unified diff from model output.
///
/// The returned patch always ends with a newline so `git apply` accepts it.
pub fn extract_patch(text: &str) -> Result<String> {
    let body = first_fenced_block(text).unwrap_or(text);
    let trimmed = body.trim_matches(|c| c == '\n' || c == '\r');

    let patch = if trimmed.starts_with("diff --git") || trimmed.starts_with("--- ") {
        trimmed
    } else if let Some(pos) = trimmed.find("diff --git") {
        &trimmed[pos..]
    } else if let Some(pos) = line_start(trimmed, "--- ") {
        if trimmed[pos..].contains("\n+++ ") {
            &trimmed[pos..]
        } else {
            return Err(GatewayError::InvalidPatch(preview(text)));
        }
    } else {
        return Err(GatewayError::InvalidPatch(preview(text)));
    };

    let mut out = patch.trim_end().to_string();
    out.push('\n');
    Ok(out)
}

/// Unwrap the content of the first fenced code block, if any. The info
/// string (```json, ```diff) is dropped.
pub fn strip_fence(text: &str) -> &str {
    first_fenced_block(text).unwrap_or(text)
}

fn first_fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    // Skip the info string up to the end of the fence line.
    let body_start = after_open.find('\n').map(|i| i + 1)?;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// The first `{` through its matching `}`, honouring string literals.
fn first_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn line_start(text: &str, prefix: &str) -> Option<usize> {
    if text.starts_with(prefix) {
        return Some(0);
    }
    text.find(&format!("\n{prefix}")).map(|i| i + 1)
}

fn preview(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() > 300 {
        format!("{}…", s.chars().take(300).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_uses_first_strategy() {
        let text = "Here is the plan:\n```json\n{\"suites\": []}\n```\nThanks!";
        let (v, strategy) = extract_json(text).unwrap();
        assert_eq!(strategy, JsonStrategy::FencedBlock);
        assert_eq!(v["suites"], serde_json::json!([]));
    }

    #[test]
    fn embedded_object_uses_brace_span() {
        let text = "Sure. {\"name\": \"a {b}\", \"n\": 1} Hope that helps.";
        let (v, strategy) = extract_json(text).unwrap();
        assert_eq!(strategy, JsonStrategy::BraceSpan);
        assert_eq!(v["name"], "a {b}");
    }

    #[test]
    fn bare_array_falls_through_to_whole_text() {
        let (v, strategy) = extract_json("  [1, 2, 3]\n").unwrap();
        assert_eq!(strategy, JsonStrategy::WholeText);
        assert_eq!(v, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn broken_fence_falls_back_to_brace_span() {
        let text = "```\nnot json\n```\nactual: {\"ok\": true}";
        let (v, strategy) = extract_json(text).unwrap();
        assert_eq!(strategy, JsonStrategy::BraceSpan);
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn prose_is_malformed() {
        let err = extract_json("I could not produce a plan for this API.").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse { .. }));
    }

    #[test]
    fn unbalanced_braces_are_malformed() {
        assert!(extract_json("{\"a\": {\"b\": 1}").is_err());
    }

    #[test]
    fn patch_inside_fence() {
        let text = "Fix:\n```diff\ndiff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n```";
        let patch = extract_patch(text).unwrap();
        assert!(patch.starts_with("diff --git a/x b/x"));
        assert!(patch.ends_with("+b\n"));
    }

    #[test]
    fn patch_after_prose_is_sliced_at_anchor() {
        let text = "The handler is missing an import.\ndiff --git a/h.js b/h.js\n--- a/h.js\n+++ b/h.js\n";
        let patch = extract_patch(text).unwrap();
        assert!(patch.starts_with("diff --git a/h.js"));
    }

    #[test]
    fn plain_unified_diff_without_git_header() {
        let text = "Change below\n--- a/app.py\n+++ b/app.py\n@@ -1 +1 @@\n-x\n+y";
        let patch = extract_patch(text).unwrap();
        assert!(patch.starts_with("--- a/app.py"));
    }

    #[test]
    fn prose_is_not_a_patch() {
        let err = extract_patch("Just restart the server.").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPatch(_)));
    }

    #[test]
    fn strip_fence_leaves_plain_text_alone() {
        assert_eq!(strip_fence("plain"), "plain");
        assert_eq!(strip_fence("```js\nconst a = 1;\n```"), "const a = 1;\n");
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    #[serde(default)]
    pub action: String,
    /// Relative path (or absolute URL) with `${var}` placeholders.
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// variable name → dotted path into the response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_variables: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    #[serde(default)]
    pub suites: Vec<TestSuite>,
}

impl TestPlan {
    /// True when there is nothing to execute.
    pub fn is_empty(&self) -> bool {
        self.suites.iter().all(|s| s.steps.is_empty())
    }

    pub fn step_count(&self) -> usize {
        self.suites.iter().map(|s| s.steps.len()).sum()
    }

    /// Drop empty suites and cut the plan down to `max_suites` ×
    /// `max_steps`. Returns true when anything was removed for size.
    pub fn enforce_limits(&mut self, max_suites: usize, max_steps: usize) -> bool {
        self.suites.retain(|s| !s.steps.is_empty());
        let mut truncated = false;
        if self.suites.len() > max_suites {
            self.suites.truncate(max_suites);
            truncated = true;
        }
        for suite in &mut self.suites {
            if suite.steps.len() > max_steps {
                suite.steps.truncate(max_steps);
                truncated = true;
            }
        }
        truncated
    }
}

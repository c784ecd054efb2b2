//! Vidhi's data model: learned procedures and the session records they are
//! mined from (spec.md §3).
//!
//! Grounded in `orchestrator::queue::Task`/`TaskStatus` for the plain-struct
//! + `serde` shape, and in `orchestrator::event_bus::AgencyEvent`'s
//! `#[serde(tag = ...)]` convention for the tagged `Role` enum below.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type VidhiId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VidhiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub examples: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VidhiStep {
    pub index: usize,
    pub tool_name: String,
    pub arg_template: HashMap<String, Value>,
    pub description: String,
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vidhi {
    pub id: VidhiId,
    pub project: String,
    pub name: String,
    pub steps: Vec<VidhiStep>,
    pub triggers: Vec<String>,
    pub parameter_schema: HashMap<String, VidhiParam>,
    pub learned_from: Vec<String>,
    pub confidence: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vidhi {
    /// `successRate = (successCount+1) / (successCount+failureCount+2)`,
    /// the Beta(1,1)-prior posterior mean (spec.md §3 Vidhi invariants).
    pub fn recompute_success_rate(&mut self) {
        self.success_rate =
            (self.success_count as f64 + 1.0) / (self.success_count as f64 + self.failure_count as f64 + 2.0);
    }

    pub fn record_outcome(&mut self, success: bool, now: DateTime<Utc>) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.recompute_success_rate();
        self.updated_at = now;
    }

    /// Every `${param}` reference in any step's `argTemplate` must resolve
    /// against `parameterSchema` (spec.md §8 invariant).
    pub fn validate_parameter_references(&self) -> Result<(), String> {
        for step in &self.steps {
            for value in step.arg_template.values() {
                if let Some(name) = param_reference(value) {
                    if !self.parameter_schema.contains_key(name) {
                        return Err(format!(
                            "step {} references unknown parameter '{}'",
                            step.index, name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Extracts `name` from a `"${name}"`-shaped JSON string value, if any.
pub fn param_reference(value: &Value) -> Option<&str> {
    let s = value.as_str()?;
    let s = s.strip_prefix("${")?;
    s.strip_suffix('}')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub input: HashMap<String, Value>,
    pub result: Option<Value>,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub project: String,
    pub turns: Vec<Turn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vidhi() -> Vidhi {
        let now = Utc::now();
        Vidhi {
            id: "v1".into(),
            project: "p".into(),
            name: "test".into(),
            steps: vec![],
            triggers: vec![],
            parameter_schema: HashMap::new(),
            learned_from: vec!["s1".into()],
            confidence: 0.5,
            success_count: 0,
            failure_count: 0,
            success_rate: 0.5,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn success_rate_uses_beta_prior() {
        let mut v = sample_vidhi();
        v.recompute_success_rate();
        assert_eq!(v.success_rate, 0.5);

        v.record_outcome(true, Utc::now());
        assert_eq!(v.success_rate, 2.0 / 3.0);
    }

    #[test]
    fn unknown_parameter_reference_fails_validation() {
        let mut v = sample_vidhi();
        let mut arg_template = HashMap::new();
        arg_template.insert("path".to_string(), Value::String("${param_path}".into()));
        v.steps.push(VidhiStep {
            index: 0,
            tool_name: "read".into(),
            arg_template,
            description: String::new(),
            critical: false,
        });
        assert!(v.validate_parameter_references().is_err());

        v.parameter_schema.insert(
            "param_path".into(),
            VidhiParam {
                name: "param_path".into(),
                param_type: ParamType::String,
                description: String::new(),
                required: true,
                examples: vec![],
            },
        );
        assert!(v.validate_parameter_references().is_ok());
    }
}

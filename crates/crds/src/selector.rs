//! Label selectors
//!
//! Mirrors the Kubernetes `LabelSelector` wire shape and can evaluate itself
//! against a label map, or render itself as a list query string.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::CrdError;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key
    pub key: String,

    /// One of In, NotIn, Exists, DoesNotExist
    pub operator: String,

    /// Values for In/NotIn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Parsed selector operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelectorRequirement {
    pub fn does_not_exist(key: &str) -> Self {
        Self {
            key: key.to_string(),
            operator: "DoesNotExist".to_string(),
            values: Vec::new(),
        }
    }

    pub fn operator(&self) -> Result<SelectorOperator, CrdError> {
        let op = match self.operator.as_str() {
            "In" => SelectorOperator::In,
            "NotIn" => SelectorOperator::NotIn,
            "Exists" => SelectorOperator::Exists,
            "DoesNotExist" => SelectorOperator::DoesNotExist,
            other => {
                return Err(CrdError::InvalidSelectorOperator {
                    key: self.key.clone(),
                    operator: other.to_string(),
                });
            }
        };
        match op {
            SelectorOperator::In | SelectorOperator::NotIn if self.values.is_empty() => {
                Err(CrdError::EmptySelectorValues(self.key.clone()))
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist if !self.values.is_empty() => {
                Err(CrdError::UnexpectedSelectorValues(self.key.clone()))
            }
            _ => Ok(op),
        }
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, CrdError> {
        let value = labels.get(&self.key);
        Ok(match self.operator()? {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        })
    }
}

impl LabelSelector {
    /// Copy of this selector that additionally requires `key` to be absent.
    pub fn without_label(&self, key: &str) -> Self {
        let mut selector = self.clone();
        selector
            .match_expressions
            .push(LabelSelectorRequirement::does_not_exist(key));
        selector
    }

    /// Reject malformed requirements up front.
    pub fn validate(&self) -> Result<(), CrdError> {
        for requirement in &self.match_expressions {
            requirement.operator()?;
        }
        Ok(())
    }

    /// Evaluate against a label set. An empty selector matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool, CrdError> {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
        for requirement in &self.match_expressions {
            if !requirement.matches(labels)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Render as a `labelSelector` query string (e.g. `role=worker,!cluster.x-k8s.io/cluster-name`).
    pub fn to_query(&self) -> Result<String, CrdError> {
        self.validate()?;
        Ok(self.to_string())
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        for requirement in &self.match_expressions {
            let part = match requirement.operator.as_str() {
                "In" => format!("{} in ({})", requirement.key, requirement.values.join(",")),
                "NotIn" => format!("{} notin ({})", requirement.key, requirement.values.join(",")),
                "Exists" => requirement.key.clone(),
                "DoesNotExist" => format!("!{}", requirement.key),
                other => format!("{} {other}", requirement.key),
            };
            parts.push(part);
        }
        write!(f, "{}", parts.join(","))
    }
}

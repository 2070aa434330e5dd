// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template model: an immutable, versioned job recipe.
//!
//! Templates are never mutated in place. A semantically different submission
//! under the same name produces a new row with the next version; the diff
//! rules that decide "semantically different" live in [`Template::differs_from`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::EnvVar;

/// CPU shares assigned when a template does not request any.
pub const MIN_CPU: i64 = 256;

/// Build a template id of the form `tpl-<uuid-tail>`.
pub fn new_template_id() -> String {
    let uid = Uuid::new_v4().to_string();
    format!("tpl-{}", &uid[4..])
}

/// A versioned, parameterized job recipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    /// Surrogate identifier, `tpl-<uuid-tail>`.
    #[serde(default)]
    pub template_id: String,
    /// Logical name; `(template_name, version)` is unique.
    #[serde(default)]
    pub template_name: String,
    /// Version within the name, assigned by the template service.
    #[serde(default)]
    pub version: i64,
    /// JSON-Schema document the execution payload must satisfy.
    #[serde(default)]
    pub schema: Value,
    /// Text template rendered into the run command.
    #[serde(default)]
    pub command_template: String,
    /// Default payload values, overridden by caller-supplied keys.
    #[serde(default)]
    pub defaults: Map<String, Value>,
    /// Container image runs of this template execute.
    #[serde(default)]
    pub image: String,
    /// Default memory request (MB). Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    /// Default CPU request (millicores).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i64>,
    /// Default GPU request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<i64>,
    /// Default environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,
    /// Exposed ports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
    /// Free-form tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Display avatar for UIs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_uri: Option<String>,
}

impl Template {
    /// Validate the invariants a template must satisfy before creation.
    /// Returns the list of violations; empty means valid.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.template_name.is_empty() {
            reasons.push("string [template_name] must be specified".to_string());
        }
        if !self.schema.is_object() {
            reasons.push("schema must be specified".to_string());
        }
        if self.command_template.is_empty() {
            reasons.push("string [command_template] must be specified".to_string());
        }
        if self.image.is_empty() {
            reasons.push("string [image] must be specified".to_string());
        }
        if self.memory.is_none() {
            reasons.push("int [memory] must be specified".to_string());
        }
        reasons
    }

    /// Fill in creation-time defaults: surrogate id and minimum CPU.
    pub fn ensure_identity(&mut self) {
        if self.template_id.is_empty() {
            self.template_id = new_template_id();
        }
        if self.cpu.is_none() {
            self.cpu = Some(MIN_CPU);
        }
    }

    /// True when `self` (a new submission) is semantically different from
    /// `existing` and deserves a new version.
    pub fn differs_from(&self, existing: &Template) -> bool {
        if self.template_name != existing.template_name {
            return true;
        }
        if self.command_template != existing.command_template {
            return true;
        }
        if self.image != existing.image {
            return true;
        }
        if both_differ(self.memory, existing.memory) {
            return true;
        }
        if both_differ(self.cpu, existing.cpu) {
            return true;
        }
        if both_differ(self.gpu, existing.gpu) {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.env, &existing.env)
            && a != b
        {
            return true;
        }
        if self.defaults != existing.defaults
            && self.defaults.len() != existing.defaults.len()
            && !self.defaults.is_empty()
        {
            return true;
        }
        if self.avatar_uri != existing.avatar_uri {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.ports, &existing.ports)
            && a != b
        {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.tags, &existing.tags)
            && a != b
        {
            return true;
        }
        if self.schema != existing.schema {
            return true;
        }
        false
    }

    /// Merge a caller payload with this template's defaults. Caller values
    /// win on key collisions.
    pub fn merged_payload(&self, user_payload: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = user_payload.clone();
        for (key, value) in &self.defaults {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
        merged
    }
}

fn both_differ(a: Option<i64>, b: Option<i64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}

/// A page of templates plus the total matching count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateList {
    /// Rows matching the query before pagination.
    pub total: i64,
    /// The requested page.
    pub templates: Vec<Template>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_template() -> Template {
        Template {
            template_name: "etl".to_string(),
            schema: json!({"type": "object"}),
            command_template: "echo {{ who }}".to_string(),
            image: "img:1".to_string(),
            memory: Some(512),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_template_id_shape() {
        let id = new_template_id();
        assert!(id.starts_with("tpl-"));
        assert_eq!(id.len(), 36);
    }

    #[test]
    fn test_validation_passes() {
        assert!(base_template().validation_errors().is_empty());
    }

    #[test]
    fn test_validation_allows_empty_schema_object() {
        let mut t = base_template();
        t.schema = json!({});
        assert!(t.validation_errors().is_empty());
    }

    #[test]
    fn test_validation_collects_all_reasons() {
        let t = Template::default();
        let reasons = t.validation_errors();
        assert_eq!(reasons.len(), 5);
        assert!(reasons.contains(&"string [template_name] must be specified".to_string()));
        assert!(reasons.contains(&"int [memory] must be specified".to_string()));
    }

    #[test]
    fn test_ensure_identity() {
        let mut t = base_template();
        t.ensure_identity();
        assert!(t.template_id.starts_with("tpl-"));
        assert_eq!(t.cpu, Some(MIN_CPU));

        // Explicit CPU survives.
        let mut t = base_template();
        t.cpu = Some(1000);
        t.ensure_identity();
        assert_eq!(t.cpu, Some(1000));
    }

    #[test]
    fn test_diff_identical_is_false() {
        let t = base_template();
        assert!(!t.clone().differs_from(&t));
    }

    #[test]
    fn test_diff_on_command_template() {
        let existing = base_template();
        let mut new = base_template();
        new.command_template = "echo changed".to_string();
        assert!(new.differs_from(&existing));
    }

    #[test]
    fn test_diff_on_schema() {
        let existing = base_template();
        let mut new = base_template();
        new.schema = json!({"type": "object", "required": ["who"]});
        assert!(new.differs_from(&existing));
    }

    #[test]
    fn test_diff_resources_need_both_sides() {
        let mut existing = base_template();
        existing.gpu = None;
        let mut new = base_template();
        new.gpu = Some(1);
        // One side unset: not a difference.
        assert!(!new.differs_from(&existing));

        existing.gpu = Some(2);
        assert!(new.differs_from(&existing));
    }

    #[test]
    fn test_diff_env_element_order_matters() {
        let ev = |n: &str, v: &str| EnvVar {
            name: n.to_string(),
            value: v.to_string(),
        };
        let mut existing = base_template();
        existing.env = Some(vec![ev("A", "1"), ev("B", "2")]);
        let mut new = base_template();
        new.env = Some(vec![ev("B", "2"), ev("A", "1")]);
        assert!(new.differs_from(&existing));
    }

    #[test]
    fn test_diff_defaults_requires_new_side_non_empty() {
        let mut existing = base_template();
        existing.defaults = json!({"who": "world"}).as_object().unwrap().clone();
        let new = base_template();
        // New side empty: not counted as a difference.
        assert!(!new.differs_from(&existing));

        let mut new = base_template();
        new.defaults = json!({"who": "x", "extra": 1}).as_object().unwrap().clone();
        assert!(new.differs_from(&existing));
    }

    #[test]
    fn test_merged_payload_user_wins() {
        let mut t = base_template();
        t.defaults = json!({"who": "world", "count": 3})
            .as_object()
            .unwrap()
            .clone();
        let user = json!({"who": "you"}).as_object().unwrap().clone();
        let merged = t.merged_payload(&user);
        assert_eq!(merged["who"], json!("you"));
        assert_eq!(merged["count"], json!(3));
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command template rendering.
//!
//! Command templates are minijinja text templates rendered with the merged
//! execution payload as context: `{{ who }}`, conditionals, loops, and the
//! built-in filter library (`default`, `upper`, `join`, ...) are all
//! available.

use minijinja::Environment;
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Render a command template with the merged payload as the value context.
pub fn render_command(command_template: &str, payload: &Map<String, Value>) -> crate::Result<String> {
    let mut env = Environment::new();
    env.add_template("command", command_template)
        .map_err(|e| CoreError::Render(format!("template parse error: {e}")))?;
    let template = env
        .get_template("command")
        .map_err(|e| CoreError::Render(e.to_string()))?;
    template
        .render(Value::Object(payload.clone()))
        .map_err(|e| CoreError::Render(format!("template render error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_render_simple_substitution() {
        let rendered =
            render_command("echo {{ who }}", &payload(json!({"who": "world"}))).unwrap();
        assert_eq!(rendered, "echo world");
    }

    #[test]
    fn test_render_conditional_and_loop() {
        let tmpl = "{% if verbose %}-v {% endif %}{% for f in files %}{{ f }} {% endfor %}";
        let rendered = render_command(
            tmpl,
            &payload(json!({"verbose": true, "files": ["a.csv", "b.csv"]})),
        )
        .unwrap();
        assert_eq!(rendered, "-v a.csv b.csv ");
    }

    #[test]
    fn test_render_default_filter() {
        let rendered = render_command(
            "run --retries {{ retries | default(3) }}",
            &payload(json!({})),
        )
        .unwrap();
        assert_eq!(rendered, "run --retries 3");
    }

    #[test]
    fn test_render_parse_error() {
        let err = render_command("echo {{ who", &payload(json!({}))).unwrap_err();
        assert!(matches!(err, CoreError::Render(_)));
    }
}

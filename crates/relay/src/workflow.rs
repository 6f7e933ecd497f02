//! Workflow document handling.
//!
//! A workflow is a JSON object mapping node IDs to node records
//! (`{"class_type": ..., "inputs": {...}}`). The relay never interprets
//! node semantics; it only looks for string inputs that reference
//! platform files and rewrites them in place.

use serde_json::{Map, Value};

use crate::error::RelayError;
use crate::matcher::ImageUrlMatcher;

/// A node input whose value references a platform-hosted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageField {
    pub node_id: String,
    pub input: String,
    pub url: String,
}

/// Turn invocation input into a node graph.
///
/// Accepts a JSON object or a string containing one. A document of the
/// form `{"prompt": {...}}` (as exported with extra metadata) is
/// unwrapped to the inner graph.
pub fn parse_workflow_input(input: Value) -> Result<Value, RelayError> {
    let document = match input {
        Value::String(text) => serde_json::from_str::<Value>(&text).map_err(|e| {
            RelayError::InvalidWorkflow(format!("workflow must be a valid JSON object: {e}"))
        })?,
        other => other,
    };

    let Value::Object(mut map) = document else {
        return Err(RelayError::InvalidWorkflow(
            "workflow must be a JSON object".into(),
        ));
    };

    // A non-object "prompt" value is an ordinary node ID, not a wrapper.
    let is_wrapper = matches!(map.get("prompt"), Some(Value::Object(_)));
    let graph = if is_wrapper {
        match map.remove("prompt") {
            Some(Value::Object(inner)) => inner,
            _ => Map::new(),
        }
    } else {
        map
    };

    if graph.is_empty() {
        return Err(RelayError::InvalidWorkflow("workflow has no nodes".into()));
    }

    Ok(Value::Object(graph))
}

/// Every node input in `graph` whose string value `matcher` accepts,
/// in document order.
pub fn find_image_fields(graph: &Value, matcher: &dyn ImageUrlMatcher) -> Vec<ImageField> {
    let Some(nodes) = graph.as_object() else {
        return Vec::new();
    };

    let mut fields = Vec::new();
    for (node_id, node) in nodes {
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            continue;
        };
        for (input, value) in inputs {
            if let Some(url) = value.as_str().filter(|v| matcher.matches(v)) {
                fields.push(ImageField {
                    node_id: node_id.clone(),
                    input: input.clone(),
                    url: url.to_string(),
                });
            }
        }
    }
    fields
}

/// Overwrite one node input. Returns `false` if the node or its
/// `inputs` object is missing.
pub fn set_input(graph: &mut Value, node_id: &str, input: &str, value: Value) -> bool {
    match graph
        .get_mut(node_id)
        .and_then(|node| node.get_mut("inputs"))
        .and_then(Value::as_object_mut)
    {
        Some(inputs) => {
            inputs.insert(input.to_string(), value);
            true
        }
        None => false,
    }
}

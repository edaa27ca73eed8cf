//! `OpenAPI` `$ref` resolver.
//!
//! Works on the raw JSON document so schemas keep every keyword verbatim. Only local refs
//! (`#/...`) are supported; anything else is reported as unresolved.
//!
//! Two modes:
//! - [`OpenApiResolver::resolve`] follows a `$ref` chain for a component (parameter, request
//!   body, response, path item). Cycles are errors.
//! - [`OpenApiResolver::inline_schema`] expands `$ref`s nested anywhere inside a schema. Cycles
//!   and anything deeper than [`MAX_INLINE_DEPTH`] keep their `$ref` node, as does everything
//!   past [`MAX_INLINE_NODES`]. Each ref target is expanded once and reused.

use crate::error::{OpenApiToolsError, Result};
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Maximum number of nested `$ref` expansions while inlining one schema.
pub const MAX_INLINE_DEPTH: usize = 8;

/// Maximum number of JSON nodes one inlined schema may grow to. Refs past it are kept.
pub const MAX_INLINE_NODES: usize = 50_000;

#[derive(Default)]
struct InlineState {
    stack: Vec<String>,
    /// Expanded ref targets with their node counts.
    expanded: HashMap<String, (Value, usize)>,
    nodes: usize,
    truncated: bool,
}

impl InlineState {
    fn over_budget(&mut self, reference: &str) {
        if !self.truncated {
            tracing::warn!(
                reference,
                limit = MAX_INLINE_NODES,
                "Schema too large to inline fully; keeping remaining $refs"
            );
            self.truncated = true;
        }
    }
}

#[derive(Debug)]
pub struct OpenApiResolver<'a> {
    root: &'a Value,
}

impl<'a> OpenApiResolver<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    /// Follow a `$ref` chain and return the target value.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference is non-local, dangling, or cyclic.
    pub fn resolve_value(&self, node: &Value) -> Result<Value> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur = node;

        while let Some(reference) = ref_of(cur) {
            if !seen.insert(reference.to_string()) {
                return Err(OpenApiToolsError::CyclicRef(reference.to_string()));
            }
            cur = self.lookup(reference)?;
        }
        Ok(cur.clone())
    }

    /// Follow a `$ref` chain and deserialize the target.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be resolved or the target does not have the
    /// expected shape.
    pub fn resolve<T: DeserializeOwned>(&self, node: &Value) -> Result<(Value, T)> {
        let value = self.resolve_value(node)?;
        let typed: T = serde_json::from_value(value.clone()).map_err(|e| {
            let what = ref_of(node).unwrap_or("inline value");
            OpenApiToolsError::OpenApi(format!(
                "Failed to deserialize '{what}' as expected type: {e}"
            ))
        })?;
        Ok((value, typed))
    }

    /// Expand nested `$ref`s inside a schema.
    #[must_use]
    pub fn inline_schema(&self, schema: &Value) -> Value {
        let mut state = InlineState::default();
        self.inline(schema, &mut state)
    }

    fn inline(&self, node: &Value, state: &mut InlineState) -> Value {
        state.nodes += 1;
        match node {
            Value::Object(map) => {
                if let Some(reference) = ref_of(node) {
                    return self.inline_ref(node, map, reference, state);
                }
                let out: Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.inline(v, state)))
                    .collect();
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.inline(v, state)).collect())
            }
            other => other.clone(),
        }
    }

    fn inline_ref(
        &self,
        node: &Value,
        map: &Map<String, Value>,
        reference: &str,
        state: &mut InlineState,
    ) -> Value {
        if state.stack.len() >= MAX_INLINE_DEPTH || state.stack.iter().any(|r| r == reference) {
            return node.clone();
        }

        let mut expanded = if let Some((cached, size)) = state.expanded.get(reference) {
            if state.nodes + size > MAX_INLINE_NODES {
                state.over_budget(reference);
                return node.clone();
            }
            state.nodes += size;
            cached.clone()
        } else {
            if state.nodes >= MAX_INLINE_NODES {
                state.over_budget(reference);
                return node.clone();
            }
            let Ok(target) = self.lookup(reference) else {
                tracing::debug!(reference, "Keeping unresolved $ref in schema");
                return node.clone();
            };
            let before = state.nodes;
            state.stack.push(reference.to_string());
            let expanded = self.inline(target, state);
            state.stack.pop();
            state
                .expanded
                .insert(reference.to_string(), (expanded.clone(), state.nodes - before));
            expanded
        };

        // Sibling keywords next to `$ref` (e.g. `description`) win.
        if let Value::Object(out) = &mut expanded {
            for (k, v) in map.iter().filter(|(k, _)| k.as_str() != "$ref") {
                out.insert(k.clone(), self.inline(v, state));
            }
        }
        expanded
    }

    fn lookup(&self, reference: &str) -> Result<&'a Value> {
        let Some(fragment) = reference.strip_prefix('#') else {
            return Err(OpenApiToolsError::UnresolvedRef(reference.to_string()));
        };
        if fragment.is_empty() {
            return Ok(self.root);
        }
        if !fragment.starts_with('/') {
            return Err(OpenApiToolsError::UnresolvedRef(reference.to_string()));
        }
        self.root
            .pointer(&percent_decode(fragment))
            .ok_or_else(|| OpenApiToolsError::UnresolvedRef(reference.to_string()))
    }
}

fn ref_of(node: &Value) -> Option<&str> {
    node.as_object()?.get("$ref")?.as_str()
}

// Pointers in `$ref` URIs may percent-encode characters such as `{` and `}` in path keys.
fn percent_decode(s: &str) -> Cow<'_, str> {
    percent_decode_str(s).decode_utf8_lossy()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "components": {
                "parameters": {
                    "Alias": {"$ref": "#/components/parameters/Limit"},
                    "Limit": {"name": "limit", "in": "query", "schema": {"type": "integer"}},
                    "LoopA": {"$ref": "#/components/parameters/LoopB"},
                    "LoopB": {"$ref": "#/components/parameters/LoopA"}
                },
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {
                            "value": {"type": "string"},
                            "next": {"$ref": "#/components/schemas/Node"}
                        }
                    },
                    "Label": {"type": "string", "maxLength": 50},
                    "Issue": {
                        "type": "object",
                        "required": ["title"],
                        "properties": {
                            "title": {"$ref": "#/components/schemas/Label", "description": "Title"}
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_resolves_ref_chain() {
        let d = doc();
        let r = OpenApiResolver::new(&d);
        let v = r
            .resolve_value(&json!({"$ref": "#/components/parameters/Alias"}))
            .unwrap();
        assert_eq!(v["name"], "limit");
    }

    #[test]
    fn test_cyclic_and_dangling_refs_are_errors() {
        let d = doc();
        let r = OpenApiResolver::new(&d);
        assert!(matches!(
            r.resolve_value(&json!({"$ref": "#/components/parameters/LoopA"})),
            Err(OpenApiToolsError::CyclicRef(_))
        ));
        assert!(matches!(
            r.resolve_value(&json!({"$ref": "#/components/parameters/Missing"})),
            Err(OpenApiToolsError::UnresolvedRef(_))
        ));
        assert!(matches!(
            r.resolve_value(&json!({"$ref": "common.yaml#/Limit"})),
            Err(OpenApiToolsError::UnresolvedRef(_))
        ));
    }

    #[test]
    fn test_inline_keeps_verbatim_keywords_and_siblings() {
        let d = doc();
        let r = OpenApiResolver::new(&d);
        let inlined = r.inline_schema(&json!({"$ref": "#/components/schemas/Issue"}));
        assert_eq!(inlined["required"], json!(["title"]));
        assert_eq!(inlined["properties"]["title"]["maxLength"], 50);
        assert_eq!(inlined["properties"]["title"]["description"], "Title");
    }

    #[test]
    fn test_inline_stops_at_cycles() {
        let d = doc();
        let r = OpenApiResolver::new(&d);
        let inlined = r.inline_schema(&json!({"$ref": "#/components/schemas/Node"}));
        assert_eq!(inlined["properties"]["value"]["type"], "string");
        assert_eq!(
            inlined["properties"]["next"],
            json!({"$ref": "#/components/schemas/Node"})
        );
    }

    // Level N has six properties that all point at level N-1.
    fn layered_doc(levels: usize) -> Value {
        let mut schemas = Map::new();
        schemas.insert(
            "L0".to_string(),
            json!({"type": "object", "properties": {"leaf": {"type": "string"}}}),
        );
        for level in 1..levels {
            let props: Map<String, Value> = ["a", "b", "c", "d", "e", "f"]
                .iter()
                .map(|p| {
                    (
                        (*p).to_string(),
                        json!({"$ref": format!("#/components/schemas/L{}", level - 1)}),
                    )
                })
                .collect();
            schemas.insert(
                format!("L{level}"),
                json!({"type": "object", "properties": props}),
            );
        }
        json!({"components": {"schemas": schemas}})
    }

    #[test]
    fn test_shared_refs_are_expanded_once_and_reused() {
        let d = layered_doc(3);
        let r = OpenApiResolver::new(&d);
        let inlined = r.inline_schema(&json!({"$ref": "#/components/schemas/L2"}));
        assert_eq!(
            inlined["properties"]["a"]["properties"]["f"]["properties"]["leaf"]["type"],
            "string"
        );
        assert_eq!(inlined["properties"]["a"], inlined["properties"]["f"]);
        assert!(!inlined.to_string().contains("$ref"));
    }

    #[test]
    fn test_fan_out_refs_stay_bounded() {
        let d = layered_doc(8);
        let r = OpenApiResolver::new(&d);
        let started = std::time::Instant::now();
        let inlined = r.inline_schema(&json!({"$ref": "#/components/schemas/L7"}));
        let size = serde_json::to_vec(&inlined).unwrap().len();

        assert!(size < 10 * 1024 * 1024, "inlined schema is {size} bytes");
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert!(inlined.to_string().contains("#/components/schemas/L"));
        assert_eq!(inlined["type"], "object");
    }

    #[test]
    fn test_percent_encoded_pointer() {
        let d = json!({"paths": {"/items/{id}": {"get": {"operationId": "x"}}}});
        let r = OpenApiResolver::new(&d);
        let v = r
            .resolve_value(&json!({"$ref": "#/paths/~1items~1%7Bid%7D"}))
            .unwrap();
        assert_eq!(v["get"]["operationId"], "x");
    }
}

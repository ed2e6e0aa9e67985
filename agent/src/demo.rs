//! A deterministic, network-free [`LlmClient`] for the demo binary (§10.5):
//! rather than scripting exact responses in order (as [`crate::testutil`]'s
//! doubles do for tests with a known call count), this synthesizes the
//! smallest value that satisfies the requested JSON schema, so it can answer
//! an open-ended run of unknown length.

use async_trait::async_trait;
use recon_core::prompt::{LlmClient, ModelRole, Usage};
use schemars::Schema;
use serde_json::{Map, Value};

/// Fills in the minimal instance a schema permits: empty arrays, zeroed
/// numbers, blank strings, the first enum/`oneOf` alternative. Good enough to
/// drive the engine through a short, terminating demo run without a live
/// model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaFillLlmClient;

#[async_trait]
impl LlmClient for SchemaFillLlmClient {
    async fn complete(&self, _role: ModelRole, _prompt: &str, schema: &Schema) -> anyhow::Result<(Value, Usage)> {
        Ok((fill(schema.as_value(), schema.as_value()), Usage::default()))
    }
}

fn fill(node: &Value, root: &Value) -> Value {
    let Some(obj) = node.as_object() else {
        return Value::Null;
    };

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        return resolve_ref(reference, root).map_or(Value::Null, |target| fill(target, root));
    }
    if let Some(choices) = obj.get("oneOf").or_else(|| obj.get("anyOf")).and_then(Value::as_array) {
        return choices.first().map_or(Value::Null, |choice| fill(choice, root));
    }
    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        return values.first().cloned().unwrap_or(Value::Null);
    }
    if let Some(constant) = obj.get("const") {
        return constant.clone();
    }

    match obj.get("type").and_then(Value::as_str) {
        Some("object") => fill_object(obj, root),
        Some("array") => Value::Array(Vec::new()),
        Some("string") => Value::String(String::new()),
        Some("integer" | "number") => Value::Number(0.into()),
        Some("boolean") => Value::Bool(false),
        Some("null") => Value::Null,
        _ if obj.contains_key("properties") => fill_object(obj, root),
        _ => Value::Null,
    }
}

fn fill_object(obj: &Map<String, Value>, root: &Value) -> Value {
    let properties = obj.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut result = Map::new();
    if let Some(properties) = properties {
        for (key, schema) in properties {
            if required.contains(&key.as_str()) {
                result.insert(key.clone(), fill(schema, root));
            }
        }
    }
    Value::Object(result)
}

fn resolve_ref<'a>(reference: &str, root: &'a Value) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    root.pointer(pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::SubGoalSpec;
    use recon_core::model::Action;
    use schemars::SchemaGenerator;

    #[tokio::test]
    async fn fills_required_fields_and_defaults_arrays_empty() {
        let schema = SchemaGenerator::default().into_root_schema_for::<Vec<SubGoalSpec>>();
        let client = SchemaFillLlmClient;
        let (value, usage) = client.complete(ModelRole::Scoping, "", &schema).await.unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert!(value.is_array());
        assert_eq!(value.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn fills_tagged_enum_with_first_variant() {
        let schema = SchemaGenerator::default().into_root_schema_for::<Action>();
        let client = SchemaFillLlmClient;
        let (value, _usage) = client.complete(ModelRole::Scoping, "", &schema).await.unwrap();
        assert_eq!(value["kind"], "DECOMPOSE");
    }
}

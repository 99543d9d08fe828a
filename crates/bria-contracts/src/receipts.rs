use std::path::Path;

use serde_json::{Map, Value};

use crate::normalize::{Locator, Normalized};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

const INLINE_PAYLOAD_KEYS: &[&str] = &["file", "mask_file", "image_file", "b64_json", "image", "data"];

pub fn build_receipt(
    operation: &str,
    endpoint: &str,
    request_body: &Map<String, Value>,
    response: &Value,
    normalized: &Normalized,
    result_metadata: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert("operation".to_string(), Value::String(operation.to_string()));
    root.insert("endpoint".to_string(), Value::String(endpoint.to_string()));
    root.insert(
        "request".to_string(),
        sanitize_payload(&Value::Object(request_body.clone())),
    );
    root.insert("response".to_string(), sanitize_payload(response));
    root.insert("result".to_string(), sanitize_payload(&normalized.to_value()));
    root.insert(
        "result_metadata".to_string(),
        sanitize_payload(&Value::Object(result_metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) => match Locator::parse(text) {
            inline @ Locator::Inline { .. } => Value::String(inline.redacted()),
            _ => value.clone(),
        },
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if INLINE_PAYLOAD_KEYS.contains(&lowered.as_str()) && row.is_string() {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bria_contracts::{BriaError, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub mod background;
pub mod client;
pub mod config;
pub mod local;

pub use background::remove_background;
pub use client::{
    BriaClient, EndpointResponse, GenerativeFillOptions, HdGenerationOptions, ImageSource,
    LifestyleShotOptions, PackshotOptions,
};
pub use config::BriaConfig;
pub use local::{
    DiffusionJob, DiffusionMode, DiffusionRuntime, LocalCapability, LocalDiffusion, LocalOptions,
    PythonDiffusers,
};

pub fn ensure_api_key(api_key: Option<&str>) -> Result<&str> {
    api_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| BriaError::config("API key is required for this operation"))
}

pub fn bytes_to_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

fn response_json_or_error(operation: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        BriaError::transport(
            operation,
            Some(code),
            format!("response body read failed: {}", error_chain_text(&err, 512)),
        )
    })?;
    if !status.is_success() {
        return Err(BriaError::transport(
            operation,
            Some(code),
            truncate_text(&body, 512),
        ));
    }
    serde_json::from_str(&body).map_err(|err| BriaError::InvalidResponse {
        operation: operation.to_string(),
        detail: format!("{err}: {}", truncate_text(&body, 256)),
    })
}

fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn short_hash(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{bytes_to_data_uri, ensure_api_key, short_hash, truncate_text};

    #[test]
    fn ensure_api_key_rejects_missing_and_blank() {
        assert!(ensure_api_key(None).is_err_and(|err| err.is_config()));
        assert!(ensure_api_key(Some("  ")).is_err_and(|err| err.is_config()));
        assert_eq!(ensure_api_key(Some(" key ")).ok(), Some("key"));
    }

    #[test]
    fn data_uri_uses_mime_and_standard_base64() {
        assert_eq!(
            bytes_to_data_uri(b"hello", "image/jpeg"),
            "data:image/jpeg;base64,aGVsbG8="
        );
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn short_hash_is_stable() {
        let payload = json!({ "operation": "packshot" });
        assert_eq!(short_hash(&payload), short_hash(&payload));
        assert_eq!(short_hash(&payload).len(), 8);
    }
}

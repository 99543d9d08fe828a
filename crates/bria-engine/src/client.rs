use std::path::PathBuf;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bria_contracts::endpoints::{EndpointCatalogue, DEFAULT_HD_MODEL_VERSION};
use bria_contracts::events::{EventKind, EventPayload, EventWriter};
use bria_contracts::normalize::{normalize_traced, Normalized};
use bria_contracts::prompt::extract_enhanced_prompt;
use bria_contracts::receipts::{build_receipt, write_receipt};
use bria_contracts::{BriaError, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::ACCEPT;
use serde_json::{json, Map, Value};

use crate::config::BriaConfig;
use crate::{
    ensure_api_key, error_chain_text, response_json_or_error, short_hash, timestamp_millis,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

impl ImageSource {
    pub fn from_parts(bytes: Option<Vec<u8>>, url: Option<String>) -> Result<Self> {
        if let Some(url) = url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            return Ok(ImageSource::Url(url));
        }
        match bytes {
            Some(bytes) if !bytes.is_empty() => Ok(ImageSource::Bytes(bytes)),
            _ => Err(BriaError::InvalidInput(
                "either image bytes or an image url must be provided".to_string(),
            )),
        }
    }

    fn insert_into(&self, body: &mut Map<String, Value>, file_key: &str) {
        match self {
            ImageSource::Url(url) => {
                body.insert("image_url".to_string(), Value::String(url.clone()));
            }
            ImageSource::Bytes(bytes) => {
                body.insert(file_key.to_string(), Value::String(BASE64.encode(bytes)));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HdGenerationOptions {
    pub model_version: String,
    pub num_results: u32,
    pub aspect_ratio: String,
    pub sync: bool,
    pub seed: Option<i64>,
    pub negative_prompt: Option<String>,
    pub extra: Map<String, Value>,
}

impl Default for HdGenerationOptions {
    fn default() -> Self {
        Self {
            model_version: DEFAULT_HD_MODEL_VERSION.to_string(),
            num_results: 1,
            aspect_ratio: "1:1".to_string(),
            sync: true,
            seed: None,
            negative_prompt: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerativeFillOptions {
    pub num_results: u32,
    pub sync: bool,
    pub seed: Option<i64>,
    pub negative_prompt: Option<String>,
    pub content_moderation: bool,
    pub extra: Map<String, Value>,
}

impl Default for GenerativeFillOptions {
    fn default() -> Self {
        Self {
            num_results: 1,
            sync: true,
            seed: None,
            negative_prompt: None,
            content_moderation: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifestyleShotOptions {
    pub placement_type: String,
    pub num_results: u32,
    pub sync: bool,
    pub content_moderation: bool,
    pub extra: Map<String, Value>,
}

impl Default for LifestyleShotOptions {
    fn default() -> Self {
        Self {
            placement_type: "original".to_string(),
            num_results: 1,
            sync: true,
            content_moderation: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackshotOptions {
    pub background_color: String,
    pub sku: Option<String>,
    pub force_rmbg: bool,
    pub content_moderation: bool,
    pub extra: Map<String, Value>,
}

impl Default for PackshotOptions {
    fn default() -> Self {
        Self {
            background_color: "#FFFFFF".to_string(),
            sku: None,
            force_rmbg: false,
            content_moderation: false,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub operation: String,
    pub endpoint: String,
    pub status: u16,
    pub raw: Value,
    pub normalized: Normalized,
}

impl EndpointResponse {
    /// Canonical `{"urls": [...]}` when a result shape was recognized,
    /// otherwise the raw body so the caller can inspect it.
    pub fn into_value(self) -> Value {
        match self.normalized {
            Normalized::Urls(result) => result.to_value(),
            Normalized::NoMatch => self.raw,
        }
    }
}

pub struct BriaClient {
    config: BriaConfig,
    http: HttpClient,
    catalogue: EndpointCatalogue,
    events: Option<EventWriter>,
    receipts_dir: Option<PathBuf>,
}

impl BriaClient {
    pub fn new(config: BriaConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| BriaError::config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            config,
            http,
            catalogue: EndpointCatalogue::default(),
            events: None,
            receipts_dir: None,
        })
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_receipts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.receipts_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &BriaConfig {
        &self.config
    }

    pub fn catalogue(&self) -> &EndpointCatalogue {
        &self.catalogue
    }

    pub fn generate_hd_image(
        &self,
        prompt: &str,
        options: &HdGenerationOptions,
    ) -> Result<EndpointResponse> {
        let mut body = options.extra.clone();
        body.insert("prompt".to_string(), json!(prompt));
        body.insert("num_results".to_string(), json!(options.num_results.max(1)));
        body.insert("aspect_ratio".to_string(), json!(options.aspect_ratio));
        body.insert("sync".to_string(), json!(options.sync));
        insert_optional(&mut body, "seed", options.seed.map(|seed| json!(seed)));
        insert_optional(
            &mut body,
            "negative_prompt",
            non_blank(options.negative_prompt.as_deref()).map(|text| json!(text)),
        );
        self.post_json(
            "generate_hd_image",
            "text_to_image_hd",
            &[("model_version", options.model_version.as_str())],
            body,
        )
    }

    pub fn generative_fill(
        &self,
        image: &[u8],
        mask: &[u8],
        prompt: &str,
        options: &GenerativeFillOptions,
    ) -> Result<EndpointResponse> {
        if image.is_empty() || mask.is_empty() {
            return Err(BriaError::InvalidInput(
                "generative fill requires both image and mask bytes".to_string(),
            ));
        }
        let mut body = options.extra.clone();
        body.insert("file".to_string(), json!(BASE64.encode(image)));
        body.insert("mask_file".to_string(), json!(BASE64.encode(mask)));
        body.insert("mask_type".to_string(), json!("manual"));
        body.insert("prompt".to_string(), json!(prompt));
        body.insert("num_results".to_string(), json!(options.num_results.max(1)));
        body.insert("sync".to_string(), json!(options.sync));
        body.insert(
            "content_moderation".to_string(),
            json!(options.content_moderation),
        );
        insert_optional(&mut body, "seed", options.seed.map(|seed| json!(seed)));
        insert_optional(
            &mut body,
            "negative_prompt",
            non_blank(options.negative_prompt.as_deref()).map(|text| json!(text)),
        );
        self.post_json("generative_fill", "gen_fill", &[], body)
    }

    pub fn erase_foreground(
        &self,
        image: &ImageSource,
        content_moderation: bool,
    ) -> Result<EndpointResponse> {
        let mut body = Map::new();
        body.insert("content_moderation".to_string(), json!(content_moderation));
        image.insert_into(&mut body, "file");
        self.post_json("erase_foreground", "erase_foreground", &[], body)
    }

    pub fn lifestyle_shot_by_text(
        &self,
        image: &ImageSource,
        scene_description: &str,
        options: &LifestyleShotOptions,
    ) -> Result<EndpointResponse> {
        if scene_description.trim().is_empty() {
            return Err(BriaError::InvalidInput(
                "scene description must not be empty".to_string(),
            ));
        }
        let mut body = options.extra.clone();
        image.insert_into(&mut body, "file");
        body.insert("scene_description".to_string(), json!(scene_description));
        body.insert("placement_type".to_string(), json!(options.placement_type));
        body.insert("num_results".to_string(), json!(options.num_results.max(1)));
        body.insert("sync".to_string(), json!(options.sync));
        body.insert(
            "content_moderation".to_string(),
            json!(options.content_moderation),
        );
        self.post_json("lifestyle_shot_by_text", "lifestyle_shot_by_text", &[], body)
    }

    pub fn create_packshot(
        &self,
        image: &ImageSource,
        options: &PackshotOptions,
    ) -> Result<EndpointResponse> {
        let mut body = options.extra.clone();
        image.insert_into(&mut body, "file");
        body.insert(
            "background_color".to_string(),
            json!(options.background_color),
        );
        body.insert("force_rmbg".to_string(), json!(options.force_rmbg));
        body.insert(
            "content_moderation".to_string(),
            json!(options.content_moderation),
        );
        insert_optional(
            &mut body,
            "sku",
            non_blank(options.sku.as_deref()).map(|sku| json!(sku)),
        );
        self.post_json("create_packshot", "packshot", &[], body)
    }

    /// Only a missing API key is reported; any other failure returns
    /// `prompt` unchanged.
    pub fn enhance_prompt(&self, prompt: &str, extra: &Map<String, Value>) -> Result<String> {
        ensure_api_key(self.config.api_key.as_deref())?;
        let mut body = extra.clone();
        body.insert("prompt".to_string(), json!(prompt));
        match self.post_json("enhance_prompt", "prompt_enhancer", &[], body) {
            Ok(response) => Ok(extract_enhanced_prompt(&response.raw, prompt)),
            Err(err) if err.is_config() => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "prompt enhancement failed; keeping original prompt");
                Ok(prompt.to_string())
            }
        }
    }

    fn post_json(
        &self,
        operation: &str,
        endpoint_name: &str,
        params: &[(&str, &str)],
        body: Map<String, Value>,
    ) -> Result<EndpointResponse> {
        let api_key = ensure_api_key(self.config.api_key.as_deref())?;
        let spec = self.catalogue.get(endpoint_name).ok_or_else(|| {
            BriaError::config(format!("unknown endpoint '{endpoint_name}'"))
        })?;
        let url = spec.url(&self.config.api_base, params);
        let call_id = uuid::Uuid::new_v4().to_string();

        tracing::debug!(
            operation,
            url = %url,
            fields = ?body.keys().collect::<Vec<_>>(),
            "sending request"
        );
        self.journal(
            EventKind::RequestStarted,
            json!({ "call_id": call_id, "operation": operation, "endpoint": url }),
        );

        let started = Instant::now();
        let result = self
            .http
            .post(&url)
            .header("api_token", api_key)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .map_err(|err| {
                BriaError::transport(operation, None, error_chain_text(&err, 512))
            })
            .and_then(|response| {
                let status = response.status().as_u16();
                response_json_or_error(operation, response).map(|raw| (status, raw))
            });
        let latency_ms = started.elapsed().as_millis() as u64;

        let (status, raw) = match result {
            Ok(parts) => parts,
            Err(err) => {
                tracing::debug!(operation, error = %err, "request failed");
                self.journal(
                    EventKind::RequestFailed,
                    json!({
                        "call_id": call_id,
                        "operation": operation,
                        "status": err.status(),
                        "error": err.to_string(),
                        "latency_ms": latency_ms,
                    }),
                );
                return Err(err);
            }
        };

        let (normalized, rule) = normalize_traced(&raw);
        let (remote, inline) = normalized
            .result()
            .map(|result| {
                result.locators().fold((0u64, 0u64), |(remote, inline), locator| {
                    match locator.kind() {
                        "remote" => (remote + 1, inline),
                        "inline" => (remote, inline + 1),
                        _ => (remote, inline),
                    }
                })
            })
            .unwrap_or((0, 0));
        tracing::info!(
            operation,
            status,
            latency_ms,
            urls = normalized.result().map(|result| result.len()).unwrap_or(0),
            rule = rule.map(|rule| rule.name()).unwrap_or("none"),
            "request finished"
        );
        self.journal(
            EventKind::RequestFinished,
            json!({
                "call_id": call_id,
                "operation": operation,
                "status": status,
                "latency_ms": latency_ms,
                "recognized": normalized.is_match(),
                "rule": rule.map(|rule| rule.name()),
                "remote_urls": remote,
                "inline_urls": inline,
            }),
        );
        self.store_receipt(operation, &url, &body, &raw, &normalized, latency_ms);

        Ok(EndpointResponse {
            operation: operation.to_string(),
            endpoint: url,
            status,
            raw,
            normalized,
        })
    }

    fn journal(&self, kind: EventKind, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = events.record(kind, payload) {
            tracing::warn!(error = %err, path = %events.path().display(), "event journal write failed");
        }
    }

    fn store_receipt(
        &self,
        operation: &str,
        endpoint: &str,
        body: &Map<String, Value>,
        raw: &Value,
        normalized: &Normalized,
        latency_ms: u64,
    ) {
        let Some(dir) = self.receipts_dir.as_ref() else {
            return;
        };
        let mut metadata = Map::new();
        metadata.insert("latency_ms".to_string(), json!(latency_ms));
        let payload = build_receipt(operation, endpoint, body, raw, normalized, &metadata);
        let path = dir.join(format!(
            "receipt-{}-{}.json",
            timestamp_millis(),
            short_hash(&payload)
        ));
        match write_receipt(&path, &payload) {
            Ok(()) => tracing::debug!(path = %path.display(), "receipt written"),
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "receipt write failed")
            }
        }
    }
}

fn insert_optional(body: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value);
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

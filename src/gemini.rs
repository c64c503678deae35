use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::media;
use crate::models::VideoAsset;
use crate::pipeline::{ImageEditRequest, MediaModel, RefineRequest, VideoOperation, VideoRequest};

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" || key == "imageBytes" || key == "bytesBase64Encoded" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(body: &Value) -> String {
    let mut copy = body.clone();
    truncate_base64_in_json(&mut copy);
    serde_json::to_string(&copy).unwrap_or_default()
}

/// Maps a non-success Gemini response onto the pipeline taxonomy.
pub fn classify_status(status: u16, body: &str) -> PipelineError {
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        return PipelineError::RateLimited(format!("status={} body={}", status, body));
    }
    if status == 401 || status == 403 || body.contains("API_KEY_INVALID") {
        return PipelineError::Configuration(format!("Gemini rejected the API key (status {})", status));
    }
    PipelineError::Upstream { status, message: body.to_string() }
}

/// Appends the access credential to a download URI the way the file service expects.
pub fn with_key(uri: &str, api_key: &str) -> String {
    let sep = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{sep}key={api_key}")
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Expects a config that already passed `PipelineConfig::validate`.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn redact(&self, url: &str) -> String {
        url.replace(&self.api_key, "***")
    }

    async fn read_success(&self, response: Response) -> Result<String, PipelineError> {
        let status = response.status();
        info!("📥 Response status: {}", status);
        let body = response.text().await.map_err(|e| PipelineError::Transport(e.to_string()))?;
        if !status.is_success() {
            error!("❌ API Error response: {}", body);
            return Err(classify_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<String, PipelineError> {
        info!("🔗 Making request to: {}", self.redact(url));
        debug!("📤 Request body: {}", loggable(body));

        let response = self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(self.redact(&e.to_string())))?;

        self.read_success(response).await
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<GeminiResponse, PipelineError> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, model, self.api_key);
        let text = self.post_json(&url, body).await?;

        if let Ok(mut value) = serde_json::from_str::<Value>(&text) {
            truncate_base64_in_json(&mut value);
            debug!("📥 Raw Gemini API response: {}", value);
        }

        serde_json::from_str(&text).map_err(|e| PipelineError::Parse(format!("{}: {}", e, text)))
    }
}

#[async_trait]
impl MediaModel for GeminiClient {
    async fn refine_copy(&self, request: &RefineRequest) -> Result<Option<String>, PipelineError> {
        let body = json!({
            "contents": [{
                "parts": [
                    {"inlineData": {"mimeType": request.mime_type, "data": request.image_base64}},
                    {"text": request.prompt}
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": refine_schema(),
                "temperature": 0.7
            }
        });
        let parsed = self.generate_content(&request.model, &body).await?;
        Ok(extract_first_text(&parsed))
    }

    async fn edit_image(&self, request: &ImageEditRequest) -> Result<Option<String>, PipelineError> {
        let body = json!({
            "contents": [{
                "parts": [
                    {"inlineData": {"mimeType": request.mime_type, "data": request.image_base64}},
                    {"text": request.identity_instruction},
                    {"text": request.prompt}
                ]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 64,
                "candidateCount": 1
            }
        });
        let parsed = self.generate_content(&request.model, &body).await?;
        let image = extract_first_image_b64(&parsed);
        match &image {
            Some(data) => info!("🖼️ Extracted {} image from API response: {}", media::sniff_base64_mime(data), media::preview(data)),
            None => info!("⚠️ No image data found in API response"),
        }
        Ok(image)
    }

    async fn submit_video(&self, request: &VideoRequest) -> Result<VideoOperation, PipelineError> {
        let url = format!("{}/models/{}:predictLongRunning?key={}", self.base_url, request.model, self.api_key);
        let body = json!({
            "instances": [{
                "prompt": request.prompt,
                "image": {"bytesBase64Encoded": request.image_base64, "mimeType": request.mime_type}
            }],
            "parameters": {
                "sampleCount": 1,
                "resolution": request.resolution,
                "aspectRatio": request.aspect_ratio
            }
        });
        let text = self.post_json(&url, &body).await?;
        parse_operation(&text)
    }

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, PipelineError> {
        let url = format!("{}/{}?key={}", self.base_url, operation.name, self.api_key);
        debug!("🔁 Polling operation {}", operation.name);
        let response = self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(self.redact(&e.to_string())))?;
        let text = self.read_success(response).await?;
        parse_operation(&text)
    }

    async fn fetch_video(&self, uri: &str) -> Result<VideoAsset, PipelineError> {
        let url = with_key(uri, &self.api_key);
        info!("⬇️ Downloading video asset from {}", self.redact(&url));
        let response = self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::Transport(self.redact(&e.to_string())))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "video/mp4".to_string());
        let bytes = response.bytes().await.map_err(|e| PipelineError::Transport(e.to_string()))?;
        info!("✅ Downloaded {} bytes of {}", bytes.len(), mime_type);
        Ok(VideoAsset { source_uri: uri.to_string(), mime_type, bytes })
    }
}

fn refine_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": {"type": "STRING"},
            "description": {"type": "STRING"},
            "category": {"type": "STRING"},
            "tags": {"type": "ARRAY", "items": {"type": "STRING"}, "minItems": 5, "maxItems": 5}
        },
        "required": ["title", "description", "category", "tags"]
    })
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData
    },
    Text { text: String },
    Other(Value)
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
}

fn extract_first_image_b64(resp: &GeminiResponse) -> Option<String> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                if inline_data.data.is_empty() {
                    continue;
                }
                debug!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                return Some(inline_data.data.clone());
            }
        }
    }
    None
}

fn extract_first_text(resp: &GeminiResponse) -> Option<String> {
    resp.candidates
        .iter()
        .flat_map(|c| c.content.parts.iter())
        .find_map(|p| match p {
            Part::Text { text } if !text.trim().is_empty() => Some(text.trim().to_string()),
            _ => None,
        })
}

#[derive(Debug, Deserialize)]
struct OperationError {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LongRunningOperation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    error: Option<OperationError>,
}

fn parse_operation(text: &str) -> Result<VideoOperation, PipelineError> {
    let op: LongRunningOperation = serde_json::from_str(text)
        .map_err(|e| PipelineError::Parse(format!("operation: {}: {}", e, text)))?;
    let video_uri = op.response.as_ref().and_then(|r| {
        ["/generateVideoResponse/generatedSamples/0/video/uri", "/generatedVideos/0/video/uri"]
            .iter()
            .find_map(|path| r.pointer(path).and_then(|v| v.as_str()).map(str::to_string))
    });
    let error = op.error.map(|e| {
        format!("{} (code {})", e.message.unwrap_or_else(|| "unknown error".into()), e.code.unwrap_or(-1))
    });
    Ok(VideoOperation { name: op.name, done: op.done, video_uri, error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_inline_image_and_skips_text() {
        let resp: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"text": "here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgoAAAA"}}
            ]}}]
        }))
        .unwrap();
        assert_eq!(extract_first_image_b64(&resp), Some("iVBORw0KGgoAAAA".to_string()));
        assert_eq!(extract_first_text(&resp), Some("here you go".to_string()));
    }

    #[test]
    fn empty_candidates_yield_nothing() {
        let resp: GeminiResponse = serde_json::from_str(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#).unwrap();
        assert_eq!(extract_first_image_b64(&resp), None);
        assert_eq!(extract_first_text(&resp), None);
    }

    #[test]
    fn classifies_statuses() {
        assert!(matches!(classify_status(429, "slow"), PipelineError::RateLimited(_)));
        assert!(matches!(classify_status(400, "{\"status\":\"RESOURCE_EXHAUSTED\"}"), PipelineError::RateLimited(_)));
        assert!(matches!(classify_status(400, "API_KEY_INVALID"), PipelineError::Configuration(_)));
        assert!(matches!(classify_status(403, ""), PipelineError::Configuration(_)));
        assert!(matches!(classify_status(500, "oops"), PipelineError::Upstream { status: 500, .. }));
    }

    #[test]
    fn parses_pending_and_finished_operations() {
        let pending = parse_operation(r#"{"name": "models/veo/operations/abc"}"#).unwrap();
        assert_eq!(pending, VideoOperation { name: "models/veo/operations/abc".into(), done: false, video_uri: None, error: None });

        let finished = parse_operation(
            r#"{"name": "operations/abc", "done": true, "response": {"generateVideoResponse": {"generatedSamples": [{"video": {"uri": "https://files/v1?alt=media"}}]}}}"#,
        )
        .unwrap();
        assert!(finished.done);
        assert_eq!(finished.video_uri.as_deref(), Some("https://files/v1?alt=media"));

        let failed = parse_operation(r#"{"name": "operations/x", "done": true, "error": {"code": 3, "message": "bad image"}}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("bad image (code 3)"));
    }

    #[test]
    fn appends_key_to_download_uri() {
        assert_eq!(with_key("https://f/v1:download?alt=media", "K"), "https://f/v1:download?alt=media&key=K");
        assert_eq!(with_key("https://f/v1/file", "K"), "https://f/v1/file?key=K");
    }

    #[test]
    fn truncates_large_payloads_for_logs() {
        let big = "A".repeat(400);
        let logged = loggable(&json!({"contents": [{"parts": [{"inlineData": {"data": big}}]}]}));
        assert!(logged.contains("[truncated 350 chars]"));
    }
}

//! Gemini API client
//!
//! Stages files through the Files API (resumable protocol), runs
//! `generateContent` against a named model and deletes staged files.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::models::ContentPart;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error returned by the remote generative service
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct GeminiError {
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    pub message: String,
}

impl GeminiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Whether the error signals temporary overload of this model
    pub fn is_transient(&self) -> bool {
        if self.status == Some(503) {
            return true;
        }
        let lowered = self.message.to_lowercase();
        TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m))
    }
}

const TRANSIENT_MARKERS: &[&str] = &["overload", "unavailable", "503"];

/// Request URLs are stripped so no endpoint detail reaches callers or storage
impl From<reqwest::Error> for GeminiError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        Self::new(status, e.without_url().to_string())
    }
}

/// A file staged on the remote service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Resource name, e.g. `files/abc123`
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// Fixed sampling configuration sent with every generation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: i32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 8192,
        }
    }
}

/// Remote generative service, injectable for tests
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Upload a local file and return its remote handle
    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError>;

    async fn delete_file(&self, name: &str) -> Result<(), GeminiError>;

    async fn generate(
        &self,
        model: &str,
        parts: &[ContentPart],
        config: &GenerationConfig,
    ) -> Result<String, GeminiError>;
}

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: String) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(180))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: Response) -> Result<Response, GeminiError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => format!(
                "{} {}: {}",
                envelope.error.code.unwrap_or(status),
                envelope.error.status.unwrap_or_default(),
                envelope.error.message
            ),
            Err(_) => format!("{}: {}", status, body),
        };

        error!(status, "Gemini API error response: {}", message);
        Err(GeminiError::new(Some(status), message))
    }

    /// Poll a freshly uploaded file until the service reports it usable
    async fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile, GeminiError> {
        for _ in 0..FILE_POLL_ATTEMPTS {
            let state = file.state.clone();
            match state.as_deref() {
                Some("PROCESSING") => {
                    tokio::time::sleep(FILE_POLL_INTERVAL).await;
                    let url = format!("{}/v1beta/{}", self.base_url, file.name);
                    let response = self
                        .client
                        .get(&url)
                        .header(API_KEY_HEADER, &self.api_key)
                        .send()
                        .await?;
                    let response = Self::check(response).await?;
                    file = response.json().await?;
                }
                Some("FAILED") => {
                    return Err(GeminiError::new(
                        None,
                        format!("Remote processing failed for {}", file.name),
                    ))
                }
                _ => return Ok(file),
            }
        }

        warn!(file = %file.name, "File still processing after polling, continuing anyway");
        Ok(file)
    }
}

const API_KEY_HEADER: &str = "x-goog-api-key";
const FILE_POLL_ATTEMPTS: usize = 10;
const FILE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| GeminiError::new(None, format!("Cannot read {}: {}", path.display(), e)))?;

        let start_url = format!("{}/upload/v1beta/files", self.base_url);
        let start = self
            .client
            .post(&start_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", data.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = Self::check(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| GeminiError::new(None, "Upload session URL missing from response"))?;

        let finalize = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data)
            .send()
            .await?;
        let uploaded: UploadResponse = Self::check(finalize).await?.json().await?;

        info!(file = %uploaded.file.name, display_name, "File staged on Gemini");
        self.wait_until_active(uploaded.file).await
    }

    async fn delete_file(&self, name: &str) -> Result<(), GeminiError> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::check(response).await?;
        debug!(file = name, "Gemini file deleted");
        Ok(())
    }

    async fn generate(
        &self,
        model: &str,
        parts: &[ContentPart],
        config: &GenerationConfig,
    ) -> Result<String, GeminiError> {
        if self.api_key.is_empty() {
            return Err(GeminiError::new(None, "GEMINI_API_KEY not configured"));
        }

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);

        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: parts.iter().map(RequestPart::from).collect(),
            }],
            generation_config: *config,
        };

        info!(model, parts = parts.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let e = GeminiError::from(e);
                error!("Gemini API request failed: {}", e);
                e
            })?;

        let gemini_response: GenerateResponse =
            Self::check(response).await?.json().await.map_err(|e| {
                let e = e.without_url();
                error!("Failed to parse Gemini response: {}", e);
                GeminiError::new(None, format!("Gemini parse error: {}", e))
            })?;

        extract_text(gemini_response)
    }
}

/// Concatenate the text parts of the first candidate
fn extract_text(response: GenerateResponse) -> Result<String, GeminiError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GeminiError::new(None, format!("Prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GeminiError::new(None, "No response from Gemini API"))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GeminiError::new(
            None,
            format!(
                "Empty response from Gemini (finish reason: {})",
                candidate.finish_reason.unwrap_or_else(|| "unknown".to_string())
            ),
        ));
    }

    Ok(text)
}

/// Best-effort MIME type for an uploaded file name
pub fn guess_mime_type(file_name: &str, declared: Option<&str>) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let guessed = match extension.as_str() {
        "csv" => Some("text/csv"),
        "txt" => Some("text/plain"),
        "json" => Some("application/json"),
        "pdf" => Some("application/pdf"),
        "xls" => Some("application/vnd.ms-excel"),
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "pptx" => Some("application/vnd.openxmlformats-officedocument.presentationml.presentation"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    };

    guessed
        .or(declared.filter(|d| !d.is_empty()))
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

impl From<&ContentPart> for RequestPart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => Self {
                text: Some(text.clone()),
                file_data: None,
            },
            ContentPart::File { uri, mime_type } => Self {
                text: None,
                file_data: Some(FileData {
                    mime_type: mime_type.clone(),
                    file_uri: uri.clone(),
                }),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let parts = vec![
            ContentPart::File {
                uri: "https://generativelanguage.googleapis.com/v1beta/files/abc".to_string(),
                mime_type: "text/csv".to_string(),
            },
            ContentPart::Text("Analyse les fichiers".to_string()),
        ];
        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: parts.iter().map(RequestPart::from).collect(),
            }],
            generation_config: GenerationConfig::default(),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["fileData"]["mimeType"], "text/csv");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "Analyse les fichiers");
        assert!(json["contents"][0]["parts"][1].get("fileData").is_none());
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Bonjour " }, { "text": "monde" }] },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        assert_eq!(extract_text(response).unwrap(), "Bonjour monde");
    }

    #[test]
    fn test_extract_text_rejects_empty_candidates() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [],
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();

        let err = extract_text(response).unwrap_err();
        assert!(err.message.contains("SAFETY"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(GeminiError::new(Some(503), "Service Unavailable").is_transient());
        assert!(GeminiError::new(None, "The model is overloaded. Please try again later.").is_transient());
        assert!(GeminiError::new(Some(500), "503 UNAVAILABLE").is_transient());
        assert!(!GeminiError::new(Some(400), "API key not valid").is_transient());
        assert!(!GeminiError::new(Some(403), "PERMISSION_DENIED").is_transient());
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("Ventes.CSV", None), "text/csv");
        assert_eq!(guess_mime_type("rapport.pdf", Some("application/x-whatever")), "application/pdf");
        assert_eq!(guess_mime_type("blob", Some("image/webp")), "image/webp");
        assert_eq!(guess_mime_type("blob", None), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_transport_errors_omit_api_key() {
        const SECRET: &str = "AIzaSECRET_TEST_KEY";
        let client = GeminiClient::new(SECRET.to_string(), "http://127.0.0.1:1".to_string()).unwrap();
        let path = std::env::temp_dir().join(format!("gemini-client-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"sku,qty\nA,3\n").unwrap();

        let upload = client.upload_file(&path, "stock.csv", "text/csv").await.unwrap_err();
        let generate = client
            .generate("flash", &[ContentPart::Text("Analyse".to_string())], &GenerationConfig::default())
            .await
            .unwrap_err();
        let delete = client.delete_file("files/abc").await.unwrap_err();
        std::fs::remove_file(&path).unwrap();

        for err in [upload, generate, delete] {
            assert!(!err.message.contains(SECRET), "{}", err.message);
            assert!(!err.message.contains("key="), "{}", err.message);
        }
    }
}

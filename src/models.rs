//! Core data models for the anomaly analysis service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Analysis Request =================
//

/// One part of a multimodal generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentPart {
    /// A file already staged on the remote service
    File { uri: String, mime_type: String },
    Text(String),
}

/// Ordered content parts: file references first, instruction prompt last
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    parts: Vec<ContentPart>,
}

impl AnalysisRequest {
    pub fn new(files: Vec<ContentPart>, instruction: impl Into<String>) -> Self {
        let mut parts: Vec<ContentPart> = files
            .into_iter()
            .filter(|p| matches!(p, ContentPart::File { .. }))
            .collect();
        parts.push(ContentPart::Text(instruction.into()));
        Self { parts }
    }

    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }
}

//
// ================= Dispatch =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RetryableOverload,
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Success { text: String, model: String },
    Failure { kind: FailureKind, message: String },
}

//
// ================= Findings =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnomalyCategory {
    Financial,
    Stock,
    Pricing,
    Other,
}

impl AnomalyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyCategory::Financial => "Financial",
            AnomalyCategory::Stock => "Stock",
            AnomalyCategory::Pricing => "Pricing",
            AnomalyCategory::Other => "Other",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "Financial" => AnomalyCategory::Financial,
            "Stock" => AnomalyCategory::Stock,
            "Pricing" => AnomalyCategory::Pricing,
            _ => AnomalyCategory::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "High" => Severity::High,
            "Low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

/// Currency-tagged amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub value: f64,
    pub currency: String,
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.currency)
    }
}

/// One structured finding parsed from a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub source_file: String,
    pub category: AnomalyCategory,
    pub description: String,
    pub location: String,
    /// Impact line as written in the report
    pub impact_text: String,
    pub estimated_impact: Amount,
    pub severity: Severity,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total_anomalies: usize,
    pub financial_anomalies: usize,
    pub stock_anomalies: usize,
    pub pricing_anomalies: usize,
    pub total_impact: f64,
    pub impact_currency: String,
    pub has_critical_issues: bool,
}

impl Default for AnomalySummary {
    fn default() -> Self {
        Self {
            total_anomalies: 0,
            financial_anomalies: 0,
            stock_anomalies: 0,
            pricing_anomalies: 0,
            total_impact: 0.0,
            impact_currency: DEFAULT_CURRENCY.to_string(),
            has_critical_issues: false,
        }
    }
}

pub const DEFAULT_CURRENCY: &str = "MGA";

//
// ================= Uploads =================
//

/// A file received from the inbound request
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default()
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Extensions handled as structured office documents
pub const COMPLEX_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv", "pdf", "docx", "pptx"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileStatistics {
    pub file_count: usize,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub complex_file_count: usize,
    pub files: Vec<FileStat>,
}

impl FileStatistics {
    pub fn from_uploads(files: &[UploadedFile]) -> Self {
        let files: Vec<FileStat> = files
            .iter()
            .map(|f| FileStat {
                name: f.file_name.clone(),
                extension: f.extension(),
                size_bytes: f.size(),
                mime_type: f.content_type.clone(),
            })
            .collect();

        let total_size_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
        let complex_file_count = files
            .iter()
            .filter(|f| COMPLEX_EXTENSIONS.contains(&f.extension.as_str()))
            .count();

        Self {
            file_count: files.len(),
            total_size_bytes,
            total_size_mb: ((total_size_bytes as f64 / 1024.0 / 1024.0) * 100.0).round() / 100.0,
            complex_file_count,
            files,
        }
    }
}

//
// ================= Persistence =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "assistant" => Sender::Assistant,
            _ => Sender::User,
        }
    }
}

/// Processing status shared by messages and API responses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageStatus {
    Success,
    Processing,
    #[serde(rename = "File Error")]
    FileError,
    #[serde(rename = "API Error")]
    ApiError,
    #[serde(rename = "Internal Error")]
    InternalError,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Success => "Success",
            MessageStatus::Processing => "Processing",
            MessageStatus::FileError => "File Error",
            MessageStatus::ApiError => "API Error",
            MessageStatus::InternalError => "Internal Error",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of a file attached to a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFile {
    pub file_name: String,
    pub size_kb: f64,
    pub mime_type: Option<String>,
    pub remote_file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: i64,
    pub title: String,
    pub date: DateTime<Utc>,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub sender: Sender,
    pub content: String,
    pub date: DateTime<Utc>,
    pub status: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDetail {
    pub id: i64,
    pub title: String,
    pub messages: Vec<StoredMessage>,
    pub anomalies: Vec<AnomalyRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub history: Vec<ThreadSummary>,
    pub pagination: Pagination,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub thread_id: i64,
    pub response: String,
    pub status: MessageStatus,
    pub model_used: Option<String>,
    pub anomaly_summary: AnomalySummary,
    pub anomalies: Vec<AnomalyRecord>,
    pub file_statistics: FileStatistics,
}

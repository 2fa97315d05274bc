//! Anomaly Analysis Service
//!
//! A web backend that:
//! - Accepts uploaded business files (spreadsheets, CSV, PDF, ...)
//! - Sends them to Gemini with a fixed analysis instruction
//! - Falls back across candidate models when the service is overloaded
//! - Extracts structured findings from the free-text report
//! - Persists threads, messages and findings in SQLite
//!
//! REQUEST FLOW:
//! VALIDATE → STAGE → DISPATCH → PARSE → PERSIST → CLEANUP

pub mod analysis;
pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gemini;
pub mod models;
pub mod report;
pub mod store;

pub use error::{AnalysisError, Result};

// Re-export common types
pub use models::*;
pub use analysis::{AnalysisService, AnalysisUpload};
pub use report::{ParsedReport, RegexReportParser, ReportParser};

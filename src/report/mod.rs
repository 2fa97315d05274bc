//! Report parsing
//!
//! Turns the free-text analysis returned by the model into a summary and a
//! list of structured findings. The parsing strategy sits behind
//! [`ReportParser`] so the pipeline does not depend on how findings are
//! recovered.

use crate::models::{AnomalyRecord, AnomalySummary};
use serde::{Deserialize, Serialize};

pub mod amount;
pub mod extractor;

pub use extractor::{extract_records, extract_summary};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub summary: AnomalySummary,
    pub records: Vec<AnomalyRecord>,
}

/// Strategy for recovering findings from a model response
pub trait ReportParser: Send + Sync {
    /// Must be pure and must not fail; unusable text yields an empty report
    fn parse(&self, text: &str, source_files: &[String]) -> ParsedReport;
}

/// Marker and label driven parser for the prompt's report template
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexReportParser;

impl ReportParser for RegexReportParser {
    fn parse(&self, text: &str, source_files: &[String]) -> ParsedReport {
        ParsedReport {
            summary: extract_summary(text),
            records: extract_records(text, source_files),
        }
    }
}

//! Offline report extraction
//!
//! Usage: `analyze <report.txt> [source file name]...`
//!
//! Runs the report parser over a saved model response and prints the summary
//! and findings as JSON.

use anomaly_analysis_service::report::{ReportParser, RegexReportParser};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(report_path) = args.next() else {
        eprintln!("Usage: analyze <report.txt> [source file name]...");
        std::process::exit(2);
    };
    let source_files: Vec<String> = args.collect();

    let text = tokio::fs::read_to_string(&report_path).await?;
    info!(path = %report_path, chars = text.len(), "Parsing saved report");

    let report = RegexReportParser.parse(&text, &source_files);

    info!(
        anomalies = report.summary.total_anomalies,
        records = report.records.len(),
        "Report parsed"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

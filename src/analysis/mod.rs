//! Analysis pipeline
//!
//! One request: VALIDATE → THREAD → STAGE FILES → DISPATCH → PARSE → PERSIST → CLEANUP
//!
//! Staged files are always released, and the final save is best-effort:
//! a storage failure at that point is logged without changing the outcome
//! already decided by the analysis.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::AnalysisError;
use crate::gemini::{guess_mime_type, GenerativeBackend};
use crate::models::{
    AnalysisRequest, AnalysisResponse, ContentPart, DispatchOutcome, FailureKind, FileStatistics,
    MessageFile, MessageStatus, Sender, UploadedFile,
};
use crate::report::{ParsedReport, ReportParser};
use crate::store::{AnalysisOutcome, AnalysisStore};
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod prompt;
pub mod staging;

use staging::StagedFiles;

/// Inbound analysis request, already decoded from the transport
#[derive(Debug, Clone, Default)]
pub struct AnalysisUpload {
    pub prompt: String,
    /// `None` or `Some(0)` opens a new thread
    pub thread_id: Option<i64>,
    pub files: Vec<UploadedFile>,
}

const DEFAULT_USER_MESSAGE: &str = "Automatic analysis of the uploaded files";

struct AnalysisRun {
    text: String,
    model: String,
    report: ParsedReport,
}

pub struct AnalysisService {
    backend: Arc<dyn GenerativeBackend>,
    dispatcher: Dispatcher,
    parser: Arc<dyn ReportParser>,
    store: Arc<dyn AnalysisStore>,
    max_upload_bytes: u64,
    temp_dir: PathBuf,
}

impl AnalysisService {
    pub fn new(
        config: &Config,
        backend: Arc<dyn GenerativeBackend>,
        parser: Arc<dyn ReportParser>,
        store: Arc<dyn AnalysisStore>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::from_config(backend.clone(), config),
            backend,
            parser,
            store,
            max_upload_bytes: config.max_upload_bytes,
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    /// Run the full pipeline for one upload
    pub async fn process(&self, upload: AnalysisUpload) -> Result<AnalysisResponse> {
        let files: Vec<UploadedFile> = upload
            .files
            .into_iter()
            .filter(|f| !f.file_name.trim().is_empty())
            .collect();

        validate_files(&files, self.max_upload_bytes)?;

        let file_statistics = FileStatistics::from_uploads(&files);
        info!(
            files = file_statistics.file_count,
            total_bytes = file_statistics.total_size_bytes,
            complex = file_statistics.complex_file_count,
            "Received analysis request"
        );

        let thread_id = match upload.thread_id {
            None | Some(0) => self.store.create_thread(&prompt::thread_title(&files)).await?,
            Some(id) => {
                if !self.store.touch_thread(id).await? {
                    return Err(AnalysisError::NotFound("Thread not found.".to_string()));
                }
                id
            }
        };

        let user_content = match upload.prompt.trim() {
            "" => DEFAULT_USER_MESSAGE,
            prompt => prompt,
        };
        let user_message_id = self
            .store
            .save_message(thread_id, Sender::User, user_content, MessageStatus::Processing)
            .await?;

        let mut staged = StagedFiles::new(self.backend.clone(), self.temp_dir.clone());
        let result = self
            .run(&files, &upload.prompt, user_message_id, &mut staged)
            .await;
        staged.cleanup().await;

        let outcome = match &result {
            Ok(run) => AnalysisOutcome {
                thread_id,
                user_message_id: Some(user_message_id),
                content: run.text.clone(),
                status: MessageStatus::Success,
                records: run.report.records.clone(),
            },
            Err(e) => {
                error!(thread_id, "Analysis failed: {}", e);
                AnalysisOutcome {
                    thread_id,
                    user_message_id: Some(user_message_id),
                    content: e.public_message(),
                    status: failure_status(e),
                    records: Vec::new(),
                }
            }
        };

        match self.store.save_outcome(&outcome).await {
            Ok(message_id) => {
                info!(thread_id, message_id, status = %outcome.status, "Analysis finished")
            }
            Err(e) => error!(thread_id, "Failed to persist analysis outcome: {}", e),
        }

        let run = result?;
        Ok(AnalysisResponse {
            thread_id,
            response: run.text,
            status: MessageStatus::Success,
            model_used: Some(run.model),
            anomaly_summary: run.report.summary,
            anomalies: run.report.records,
            file_statistics,
        })
    }

    async fn run(
        &self,
        files: &[UploadedFile],
        user_prompt: &str,
        user_message_id: i64,
        staged: &mut StagedFiles,
    ) -> Result<AnalysisRun> {
        let mut parts = Vec::with_capacity(files.len());
        let mut attachments = Vec::with_capacity(files.len());

        for file in files {
            let mime_type = guess_mime_type(&file.file_name, file.content_type.as_deref());
            let remote = staged.stage(file, &mime_type).await?;

            let remote_mime = if remote.mime_type.is_empty() {
                mime_type
            } else {
                remote.mime_type.clone()
            };

            attachments.push(MessageFile {
                file_name: file.file_name.clone(),
                size_kb: file.size() as f64 / 1024.0,
                mime_type: Some(remote_mime.clone()),
                remote_file_name: remote.name.clone(),
            });
            parts.push(ContentPart::File {
                uri: remote.uri,
                mime_type: remote_mime,
            });
        }

        self.store
            .save_message_files(user_message_id, &attachments)
            .await?;

        let request = AnalysisRequest::new(parts, prompt::build_analysis_prompt(files, user_prompt));

        match self.dispatcher.dispatch(&request).await {
            DispatchOutcome::Success { text, model } => {
                let source_files: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();
                let report = self.parser.parse(&text, &source_files);
                info!(
                    model = %model,
                    anomalies = report.summary.total_anomalies,
                    total_impact = report.summary.total_impact,
                    "Report parsed"
                );
                Ok(AnalysisRun { text, model, report })
            }
            DispatchOutcome::Failure {
                kind: FailureKind::RetryableOverload,
                message,
            } => Err(AnalysisError::RemoteTransient(message)),
            DispatchOutcome::Failure {
                kind: FailureKind::Fatal,
                message,
            } => Err(AnalysisError::RemoteFatal(message)),
        }
    }
}

fn validate_files(files: &[UploadedFile], max_upload_bytes: u64) -> Result<()> {
    if files.is_empty() {
        return Err(AnalysisError::InputValidation(
            "Please provide files to analyze.".to_string(),
        ));
    }

    let total: u64 = files.iter().map(|f| f.size()).sum();
    if total > max_upload_bytes {
        warn!(total, limit = max_upload_bytes, "Upload rejected: too large");
        return Err(AnalysisError::InputValidation(format!(
            "Total file size too large ({:.1} MB). Maximum: {:.0} MB",
            total as f64 / 1024.0 / 1024.0,
            max_upload_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

fn failure_status(error: &AnalysisError) -> MessageStatus {
    match error {
        AnalysisError::Upload(_) => MessageStatus::FileError,
        AnalysisError::RemoteTransient(_) | AnalysisError::RemoteFatal(_) => MessageStatus::ApiError,
        _ => MessageStatus::InternalError,
    }
}

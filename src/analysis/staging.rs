//! Per-request file staging
//!
//! Uploads are copied to a local temp file, then pushed to the remote
//! service. Both copies are tracked so they can be released once the
//! request finishes, whatever its outcome. A request future dropped before
//! [`StagedFiles::cleanup`] runs releases them from `Drop` instead.

use crate::error::AnalysisError;
use crate::gemini::{GenerativeBackend, RemoteFile};
use crate::models::UploadedFile;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct StagedFiles {
    backend: Arc<dyn GenerativeBackend>,
    temp_dir: PathBuf,
    local: Vec<PathBuf>,
    remote: Vec<String>,
}

impl StagedFiles {
    pub fn new(backend: Arc<dyn GenerativeBackend>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            temp_dir: temp_dir.into(),
            local: Vec::new(),
            remote: Vec::new(),
        }
    }

    /// Write the file locally and upload it
    pub async fn stage(&mut self, file: &UploadedFile, mime_type: &str) -> Result<RemoteFile> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        let extension = file.extension();
        let local_name = if extension.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            format!("{}.{}", Uuid::new_v4(), extension)
        };
        let path = self.temp_dir.join(local_name);

        // Tracked first so a failed or partial write is still removed
        self.local.push(path.clone());
        tokio::fs::write(&path, &file.data).await?;

        let remote = self
            .backend
            .upload_file(&path, &file.file_name, mime_type)
            .await
            .map_err(|e| AnalysisError::Upload(format!("{}: {}", file.file_name, e)))?;

        self.remote.push(remote.name.clone());
        Ok(remote)
    }

    /// Best-effort release of every staged copy; failures are only logged
    pub async fn cleanup(mut self) {
        let remote = std::mem::take(&mut self.remote);
        let local = std::mem::take(&mut self.local);

        delete_remote(self.backend.as_ref(), &remote).await;
        for path in &local {
            remove_local(path).await;
        }
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        if self.local.is_empty() && self.remote.is_empty() {
            return;
        }
        warn!(
            local = self.local.len(),
            remote = self.remote.len(),
            "Request dropped before cleanup, releasing staged files"
        );

        for path in self.local.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Temporary file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to remove temporary file: {}", e),
            }
        }

        let remote = std::mem::take(&mut self.remote);
        if remote.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = self.backend.clone();
                handle.spawn(async move { delete_remote(backend.as_ref(), &remote).await });
            }
            Err(_) => warn!(files = ?remote, "No runtime left to delete remote files"),
        }
    }
}

async fn delete_remote(backend: &dyn GenerativeBackend, names: &[String]) {
    for name in names {
        match backend.delete_file(name).await {
            Ok(()) => debug!(file = %name, "Remote file deleted"),
            Err(e) => warn!(file = %name, "Failed to delete remote file: {}", e),
        }
    }
}

async fn remove_local(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Temporary file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove temporary file: {}", e),
    }
}

//! Content ingestion pipeline
//!
//! Uploads stream into a staging file and only move into the content
//! library and the registry once addressing succeeds. Validation happens
//! before any bytes are accepted, and a staged upload that never finishes
//! cleans itself up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{IngestConfig, ShoalConfig, StorageConfig};
use crate::content::{
    ContentAddressor, ContentDescriptor, ContentError, ContentRegistry, Locator, RegistryError,
};

/// Errors from the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid upload: {reason}")]
    Validation { reason: String },

    #[error("Content addressing failed: {0}")]
    Content(#[from] ContentError),

    #[error("Registry rejected content: {0}")]
    Registry(#[from] RegistryError),

    #[error("Ingest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a caller declares about an upload before streaming it.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// File name as provided by the uploader
    pub file_name: String,
    /// Expected total size, when the uploader knows it
    pub declared_size: Option<u64>,
    /// Declared media type, when the uploader sends one
    pub media_type: Option<String>,
}

/// Result of a finished ingest.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The registered entry, existing or new
    pub descriptor: ContentDescriptor,
    /// True when the bytes matched already registered content
    pub deduplicated: bool,
}

/// Ingestion pipeline: validate, stage, address, store, register.
pub struct IngestPipeline {
    ingest: IngestConfig,
    storage: StorageConfig,
    addressor: ContentAddressor,
    registry: Arc<ContentRegistry>,
    announce_hints: Vec<String>,
}

impl IngestPipeline {
    pub fn new(config: &ShoalConfig, registry: Arc<ContentRegistry>) -> Self {
        Self {
            ingest: config.ingest.clone(),
            storage: config.storage.clone(),
            addressor: ContentAddressor::with_chunk_size(config.ingest.chunk_size),
            registry,
            announce_hints: config.discovery.announce_urls.clone(),
        }
    }

    /// Validates an upload request and opens a staging file for it.
    ///
    /// # Errors
    ///
    /// - `IngestError::Validation` - Bad name, media type, or declared size
    /// - `IngestError::Io` - Staging file cannot be created
    pub async fn begin(&self, request: IngestRequest) -> Result<StagedUpload<'_>, IngestError> {
        let file_name = sanitize_file_name(&request.file_name);
        let media_type = self.resolve_media_type(&file_name, request.media_type.as_deref())?;

        if let Some(declared) = request.declared_size {
            if declared == 0 {
                return Err(IngestError::Validation {
                    reason: "upload is empty".to_string(),
                });
            }
            if declared > self.ingest.max_upload_bytes {
                return Err(IngestError::Validation {
                    reason: format!(
                        "declared size {declared} exceeds the {} byte upload limit",
                        self.ingest.max_upload_bytes
                    ),
                });
            }
        }

        let staging_dir = self.storage.staging_dir();
        tokio::fs::create_dir_all(&staging_dir).await?;
        let staged_path = staging_dir.join(format!("{}.part", Uuid::new_v4()));
        let file = tokio::fs::File::create(&staged_path).await?;

        debug!(
            file_name,
            media_type,
            staged = %staged_path.display(),
            "Staging upload"
        );

        Ok(StagedUpload {
            pipeline: self,
            file,
            staged_path,
            file_name,
            media_type,
            declared_size: request.declared_size,
            written: 0,
            finished: false,
        })
    }

    /// Ingests a file already on disk.
    ///
    /// # Errors
    ///
    /// Same failures as [`begin`](Self::begin) plus read errors on `path`.
    pub async fn ingest_path(
        &self,
        path: &Path,
        media_type: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let declared_size = Some(tokio::fs::metadata(path).await?.len());

        let mut staged = self
            .begin(IngestRequest {
                file_name,
                declared_size,
                media_type,
            })
            .await?;

        let mut source = tokio::fs::File::open(path).await?;
        let mut buffer = vec![0u8; self.storage.file_buffer_size];
        loop {
            let read = source.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            staged.write_chunk(&buffer[..read]).await?;
        }

        staged.finish().await
    }

    fn resolve_media_type(
        &self,
        file_name: &str,
        declared: Option<&str>,
    ) -> Result<String, IngestError> {
        let declared = declared
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "application/octet-stream");

        let resolved = match declared {
            Some(media_type) => media_type.to_string(),
            None => mime_guess::from_path(file_name)
                .first_raw()
                .ok_or_else(|| IngestError::Validation {
                    reason: format!("cannot determine media type for {file_name}"),
                })?
                .to_string(),
        };

        if !self
            .ingest
            .allowed_media_types
            .iter()
            .any(|allowed| allowed == &resolved)
        {
            return Err(IngestError::Validation {
                reason: format!("unsupported media type: {resolved}"),
            });
        }

        Ok(resolved)
    }
}

/// An upload being streamed into staging.
///
/// Dropping a staged upload without finishing removes the staging file.
pub struct StagedUpload<'a> {
    pipeline: &'a IngestPipeline,
    file: tokio::fs::File,
    staged_path: PathBuf,
    file_name: String,
    media_type: String,
    declared_size: Option<u64>,
    written: u64,
    finished: bool,
}

impl StagedUpload<'_> {
    /// Appends bytes to the staging file.
    ///
    /// # Errors
    ///
    /// - `IngestError::Validation` - Stream exceeds the declared size or the upload limit
    /// - `IngestError::Io` - Write failure
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), IngestError> {
        let new_total = self.written + data.len() as u64;

        if let Some(declared) = self.declared_size {
            if new_total > declared {
                return Err(IngestError::Validation {
                    reason: format!("upload exceeds its declared size of {declared} bytes"),
                });
            }
        }
        if new_total > self.pipeline.ingest.max_upload_bytes {
            return Err(IngestError::Validation {
                reason: format!(
                    "upload exceeds the {} byte limit",
                    self.pipeline.ingest.max_upload_bytes
                ),
            });
        }

        self.file.write_all(data).await?;
        self.written = new_total;
        Ok(())
    }

    /// Bytes staged so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Addresses the staged bytes, stores them, and registers the content.
    ///
    /// Bytes matching an existing registry entry do not create a second
    /// copy; the existing entry comes back with `deduplicated` set.
    ///
    /// # Errors
    ///
    /// - `IngestError::Validation` - Empty upload or declared size mismatch
    /// - `IngestError::Registry` - Same content registered with a different media type
    /// - `IngestError::Content` / `IngestError::Io` - Addressing or storage failure
    pub async fn finish(mut self) -> Result<IngestOutcome, IngestError> {
        self.file.flush().await?;

        if self.written == 0 {
            return Err(IngestError::Validation {
                reason: "upload is empty".to_string(),
            });
        }
        if let Some(declared) = self.declared_size {
            if declared != self.written {
                return Err(IngestError::Validation {
                    reason: format!(
                        "received {} bytes, expected {declared}",
                        self.written
                    ),
                });
            }
        }

        let manifest = self.pipeline.addressor.address_file(&self.staged_path).await?;
        let content_id = manifest.content_id;

        match self.pipeline.registry.lookup(content_id).await {
            Ok(existing) => {
                if existing.media_type != self.media_type {
                    return Err(IngestError::Registry(RegistryError::Conflict {
                        content_id,
                        reason: format!(
                            "already registered as {}, upload declared {}",
                            existing.media_type, self.media_type
                        ),
                    }));
                }
                debug!(%content_id, "Upload matches registered content");
                self.discard().await;
                return Ok(IngestOutcome {
                    descriptor: existing,
                    deduplicated: true,
                });
            }
            Err(RegistryError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let content_dir = self.pipeline.storage.library_dir.join(content_id.to_string());
        tokio::fs::create_dir_all(&content_dir).await?;
        let stored_path = content_dir.join(&self.file_name);
        tokio::fs::rename(&self.staged_path, &stored_path).await?;

        let descriptor = ContentDescriptor {
            content_id,
            file_name: self.file_name.clone(),
            stored_path: stored_path.clone(),
            size: manifest.total_length,
            media_type: self.media_type.clone(),
            chunk_size: manifest.chunk_size,
            chunk_hashes: manifest.chunk_hashes.iter().map(hex::encode).collect(),
            locator: Locator::build(&manifest, &self.file_name, &self.pipeline.announce_hints),
            created_at: Utc::now(),
        };

        let registered = match self.pipeline.registry.register(descriptor.clone()).await {
            Ok(registered) => registered,
            Err(e) => {
                let _ = tokio::fs::remove_file(&stored_path).await;
                return Err(e.into());
            }
        };

        self.finished = true;

        // A racing ingest of the same bytes can register first; keep its copy
        if registered.stored_path != stored_path {
            let _ = tokio::fs::remove_file(&stored_path).await;
            return Ok(IngestOutcome {
                descriptor: registered,
                deduplicated: true,
            });
        }

        debug!(
            %content_id,
            size = manifest.total_length,
            chunks = manifest.chunk_count(),
            "Content ingested"
        );

        Ok(IngestOutcome {
            descriptor: registered,
            deduplicated: false,
        })
    }

    /// Abandons the upload and removes the staging file.
    pub async fn abort(mut self) {
        self.discard().await;
    }

    async fn discard(&mut self) {
        self.finished = true;
        if let Err(e) = tokio::fs::remove_file(&self.staged_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    staged = %self.staged_path.display(),
                    "Failed to remove staging file: {e}"
                );
            }
        }
    }
}

impl Drop for StagedUpload<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.staged_path);
        }
    }
}

/// Strips path components and shell-hostile characters from an uploaded name.
fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "uploaded_file".to_string()
    } else {
        trimmed.to_string()
    }
}

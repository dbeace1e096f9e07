#![forbid(unsafe_code)]

//! Materialization: turn a resolved source into a stored artifact, then
//! retire older artifacts of the same title in the background.

use std::{path::Path, sync::Arc};

use chrono::Utc;
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt, task::JoinHandle};
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::error::MediaError;
use crate::extract::{Extractor, MediaStream};
use crate::fetch::{FetchConstraints, MediaRequest, ResolvedSource, fetch};
use crate::sanitize::title_key;
use crate::storage::{MediaKind, PurgeReport, StorageLayout, StoredArtifact, purge_superseded};
use crate::transcode::{Ffmpeg, Transcoder};
use crate::ytdlp::YtDlp;

pub const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// Writes `source` to its final location and returns the artifact record.
///
/// Video bytes are copied straight to disk. Audio goes through `transcoder`,
/// which writes the destination itself. A failed transfer may leave a partial
/// file behind; it is superseded by the next successful download of the title.
pub async fn materialize(
    source: ResolvedSource,
    kind: MediaKind,
    layout: &StorageLayout,
    transcoder: &dyn Transcoder,
    audio_format: &str,
) -> Result<StoredArtifact, MediaError> {
    let unique_suffix = Utc::now().timestamp_millis();
    let artifact = layout.artifact(kind, &title_key(&source.title), unique_suffix);
    debug!(path = %artifact.absolute_path.display(), "materializing");

    match kind {
        MediaKind::Video => {
            let bytes = store_stream(source.stream, &artifact.absolute_path).await?;
            info!(path = %artifact.absolute_path.display(), bytes, "video stored");
        }
        MediaKind::Audio => {
            transcoder
                .transcode(source.stream, audio_format, &artifact.absolute_path)
                .await?;
            info!(path = %artifact.absolute_path.display(), "audio stored");
        }
    }
    Ok(artifact)
}

/// Copies `stream` into a new file at `path` and returns the byte count.
///
/// A failed write wins over whatever the producer reports afterwards: once the
/// reader is gone the producer only dies of the closed pipe.
async fn store_stream(stream: MediaStream, path: &Path) -> Result<u64, MediaError> {
    let (mut reader, completion) = stream.into_parts();
    let mut file = File::create(path)
        .await
        .map_err(|err| MediaError::io("creating", path, err))?;
    let copied = tokio::io::copy(&mut reader, &mut file).await;
    drop(reader);
    let bytes = copied.map_err(|err| MediaError::io("writing", path, err))?;
    completion.await?;
    file.flush()
        .await
        .map_err(|err| MediaError::io("flushing", path, err))?;
    Ok(bytes)
}

/// Which half of a request failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Validation, metadata and format checks, up to opening the stream.
    Resolve,
    /// Moving bytes: streaming, transcoding and writing to disk.
    Transfer,
}

/// A failed download together with the stage it failed in.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DownloadError {
    pub stage: Stage,
    #[source]
    pub error: MediaError,
}

impl DownloadError {
    fn at(stage: Stage) -> impl FnOnce(MediaError) -> Self {
        move |error| Self { stage, error }
    }
}

/// Result of a successful request: the metadata shown to the caller plus the
/// artifact on disk.
#[derive(Debug, Clone)]
pub struct Download {
    pub title: String,
    pub thumbnail_url: String,
    pub artifact: StoredArtifact,
}

impl Download {
    /// Starts the sibling cleanup as a detached task. Callers that do not care
    /// about the outcome can drop the handle.
    pub fn spawn_cleanup(&self) -> JoinHandle<PurgeReport> {
        let artifact = self.artifact.clone();
        tokio::spawn(async move {
            let report = purge_superseded(&artifact).await;
            if !report.removed.is_empty() {
                info!(
                    title = %artifact.sanitized_title,
                    removed = report.removed.len(),
                    "superseded artifacts removed"
                );
            }
            report
        })
    }
}

struct DownloaderInner {
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    layout: StorageLayout,
    constraints: FetchConstraints,
    audio_format: String,
}

/// Runs the fetch and materialize stages for either media kind. Cheap to
/// clone; every clone shares the same collaborators.
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<DownloaderInner>,
}

impl Downloader {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        layout: StorageLayout,
        constraints: FetchConstraints,
        audio_format: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(DownloaderInner {
                extractor,
                transcoder,
                layout,
                constraints,
                audio_format: audio_format.into(),
            }),
        }
    }

    /// Wires yt-dlp and ffmpeg from the resolved configuration.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            Arc::new(YtDlp::new(&config.yt_dlp)),
            Arc::new(Ffmpeg::new(&config.ffmpeg)),
            config.storage_layout(),
            config.fetch_constraints(),
            config.audio_format.clone(),
        )
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    pub async fn download(&self, request: MediaRequest) -> Result<Download, DownloadError> {
        let inner = &self.inner;
        info!(url = %request.source_url, kind = request.kind.label(), "download requested");
        let source = fetch(inner.extractor.as_ref(), &request, &inner.constraints)
            .await
            .map_err(DownloadError::at(Stage::Resolve))?;
        let title = source.title.clone();
        let thumbnail_url = source.thumbnail_url.clone();
        let artifact = materialize(
            source,
            request.kind,
            &inner.layout,
            inner.transcoder.as_ref(),
            &inner.audio_format,
        )
        .await
        .map_err(DownloadError::at(Stage::Transfer))?;
        Ok(Download {
            title,
            thumbnail_url,
            artifact,
        })
    }
}

#![forbid(unsafe_code)]

//! [`Extractor`] backed by the `yt-dlp` executable.
//!
//! Metadata comes from `--dump-single-json`; the media itself is streamed from
//! yt-dlp's stdout (`-o -`) so nothing touches the disk until the pipeline
//! decides where the bytes go.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{io::AsyncReadExt, process::Command};
use tracing::{debug, info};

use crate::error::MediaError;
use crate::extract::{Extractor, MediaStream, SourceFormat, SourceInfo, validate_youtube_url};

/// Keeps error messages readable when yt-dlp dumps a traceback.
const STDERR_TAIL_CHARS: usize = 400;

/// Subset of yt-dlp's `--dump-single-json` payload. Everything is optional
/// because older uploads routinely miss fields.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<ThumbnailInfo>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailInfo {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FormatInfo {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    tbr: Option<f64>,
    abr: Option<f64>,
    filesize: Option<u64>,
    filesize_approx: Option<u64>,
}

impl VideoInfo {
    fn into_source_info(self) -> SourceInfo {
        let title = self.title.or(self.fulltitle).unwrap_or_default();
        // yt-dlp lists thumbnails from worst to best; `thumbnail` is its pick.
        let thumbnail_url = self
            .thumbnail
            .or_else(|| self.thumbnails.into_iter().rev().find_map(|thumb| thumb.url));
        let formats = self
            .formats
            .into_iter()
            .filter_map(FormatInfo::into_source_format)
            .collect();
        SourceInfo {
            title,
            thumbnail_url,
            formats,
        }
    }
}

impl FormatInfo {
    fn into_source_format(self) -> Option<SourceFormat> {
        let format_id = self.format_id?.trim().to_string();
        if format_id.is_empty() {
            return None;
        }
        Some(SourceFormat {
            format_id,
            container: self.ext.unwrap_or_default(),
            has_video: codec_present(self.vcodec.as_deref()),
            has_audio: codec_present(self.acodec.as_deref()),
            height: self.height,
            bitrate: self.tbr,
            audio_bitrate: self.abr,
            content_length: self.filesize.or(self.filesize_approx),
        })
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && codec != "none")
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    trimmed.chars().skip(skip).collect()
}

/// Runs `<program> <version_flag>` to fail loudly when an external tool is
/// missing.
pub async fn ensure_program_available(
    program: &Path,
    version_flag: &str,
) -> Result<(), MediaError> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(MediaError::UpstreamFetch(format!(
            "{} is installed but returned {status}",
            program.display()
        ))),
        Err(err) => Err(MediaError::UpstreamFetch(format!(
            "{} is not installed or not in PATH: {err}",
            program.display()
        ))),
    }
}

/// yt-dlp driven extractor.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Extractor for YtDlp {
    fn validate_url(&self, url: &str) -> bool {
        validate_youtube_url(url)
    }

    async fn get_info(&self, url: &str) -> Result<SourceInfo, MediaError> {
        debug!(%url, "fetching metadata");
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg(url)
            .output()
            .await
            .map_err(|err| MediaError::UpstreamFetch(format!("launching yt-dlp: {err}")))?;

        if !output.status.success() {
            return Err(MediaError::UpstreamFetch(format!(
                "metadata command failed for {url} ({}): {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)
            .map_err(|err| MediaError::UpstreamFetch(format!("parsing yt-dlp metadata: {err}")))?;
        Ok(info.into_source_info())
    }

    async fn open_stream(
        &self,
        url: &str,
        format: &SourceFormat,
    ) -> Result<MediaStream, MediaError> {
        info!(%url, format = %format.format_id, "opening stream");
        let mut child = self
            .command()
            .arg("--format")
            .arg(&format.format_id)
            .arg("--output")
            .arg("-")
            .arg("--no-playlist")
            .arg("--no-part")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| MediaError::UpstreamFetch(format!("launching yt-dlp: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::UpstreamFetch("yt-dlp stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::UpstreamFetch("yt-dlp stderr unavailable".into()))?;

        // Drain stderr in the background so a chatty yt-dlp never blocks on a
        // full pipe while we are still reading stdout.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let url = url.to_string();
        let completion = async move {
            let status = child
                .wait()
                .await
                .map_err(|err| MediaError::UpstreamFetch(format!("waiting for yt-dlp: {err}")))?;
            let stderr = stderr_task.await.unwrap_or_default();
            if status.success() {
                Ok(())
            } else {
                Err(MediaError::UpstreamFetch(format!(
                    "stream for {url} ended with {status}: {}",
                    stderr_tail(&stderr)
                )))
            }
        };

        Ok(MediaStream::new(stdout, completion))
    }
}

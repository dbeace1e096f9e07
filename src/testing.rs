//! Test doubles shared by the unit tests of several modules.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::error::MediaError;
use crate::extract::{Extractor, MediaStream, SourceFormat, SourceInfo, validate_youtube_url};
use crate::transcode::Transcoder;

pub(crate) const SAMPLE_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Writes an executable script into `dir` and returns its path.
pub(crate) fn install_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }
    path
}

pub(crate) fn mp4_format(content_length: Option<u64>) -> SourceFormat {
    SourceFormat {
        format_id: "18".into(),
        container: "mp4".into(),
        has_video: true,
        has_audio: true,
        height: Some(360),
        bitrate: Some(500.0),
        audio_bitrate: Some(96.0),
        content_length,
    }
}

pub(crate) fn webm_format() -> SourceFormat {
    SourceFormat {
        format_id: "43".into(),
        container: "webm".into(),
        has_video: true,
        has_audio: true,
        height: Some(720),
        bitrate: Some(900.0),
        audio_bitrate: Some(128.0),
        content_length: Some(1024),
    }
}

pub(crate) fn audio_only_format() -> SourceFormat {
    SourceFormat {
        format_id: "251".into(),
        container: "webm".into(),
        has_video: false,
        has_audio: true,
        height: None,
        bitrate: Some(160.0),
        audio_bitrate: Some(160.0),
        content_length: Some(4 * 1024 * 1024 * 1024),
    }
}

pub(crate) fn sample_info(title: &str, formats: Vec<SourceFormat>) -> SourceInfo {
    SourceInfo {
        title: title.into(),
        thumbnail_url: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".into()),
        formats,
    }
}

/// In-memory extractor. Serves a fixed [`SourceInfo`] and payload and counts
/// how many streams were opened.
pub(crate) struct FakeExtractor {
    info: Mutex<SourceInfo>,
    payload: Vec<u8>,
    upstream_failure: Option<String>,
    opened: AtomicUsize,
}

impl FakeExtractor {
    pub(crate) fn new(info: SourceInfo, payload: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(info),
            payload: payload.to_vec(),
            upstream_failure: None,
            opened: AtomicUsize::new(0),
        })
    }

    /// Streams the payload, then fails the transfer with `message`.
    pub(crate) fn failing(info: SourceInfo, payload: &[u8], message: &str) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(info),
            payload: payload.to_vec(),
            upstream_failure: Some(message.to_string()),
            opened: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_title(&self, title: &str) {
        self.info.lock().unwrap().title = title.to_string();
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn validate_url(&self, url: &str) -> bool {
        validate_youtube_url(url)
    }

    async fn get_info(&self, _url: &str) -> Result<SourceInfo, MediaError> {
        Ok(self.info.lock().unwrap().clone())
    }

    async fn open_stream(
        &self,
        _url: &str,
        _format: &SourceFormat,
    ) -> Result<MediaStream, MediaError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let reader = std::io::Cursor::new(self.payload.clone());
        let failure = self.upstream_failure.clone();
        Ok(MediaStream::new(reader, async move {
            match failure {
                Some(message) => Err(MediaError::UpstreamFetch(message)),
                None => Ok(()),
            }
        }))
    }
}

/// Transcoder that copies its input verbatim, or always fails.
pub(crate) struct FakeTranscoder {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeTranscoder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        input: MediaStream,
        _target_format: &str,
        destination: &Path,
    ) -> Result<(), MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (mut reader, completion) = input.into_parts();
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| MediaError::Transcode(err.to_string()))?;
        completion.await?;
        if self.fail {
            return Err(MediaError::Transcode("fake transcoder refused".into()));
        }
        tokio::fs::write(destination, bytes)
            .await
            .map_err(|err| MediaError::io("writing", destination, err))
    }
}

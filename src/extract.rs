#![forbid(unsafe_code)]

//! Extraction capability: resolves a source URL into metadata, a list of
//! formats, and an openable byte stream. The production implementation shells
//! out to yt-dlp (see [`crate::ytdlp`]); tests swap in an in-memory fake.

use std::{fmt, future::Future, pin::Pin};

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use tokio::io::AsyncRead;
use url::Url;

use crate::error::MediaError;

/// Metadata for a remote video as reported by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub formats: Vec<SourceFormat>,
}

/// One downloadable rendition of a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFormat {
    pub format_id: String,
    /// Container extension, e.g. `mp4` or `webm`.
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub height: Option<u32>,
    /// Total bitrate in kbit/s.
    pub bitrate: Option<f64>,
    /// Audio bitrate in kbit/s.
    pub audio_bitrate: Option<f64>,
    pub content_length: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityPreference {
    /// Best overall rendition, preferring formats that carry both tracks.
    Highest,
    /// Best audio track, preferring the smallest video payload on ties.
    HighestAudio,
}

/// Picks a single format according to `preference`. Returns `None` when no
/// format qualifies.
pub fn choose_format(
    formats: &[SourceFormat],
    preference: QualityPreference,
) -> Option<&SourceFormat> {
    match preference {
        QualityPreference::Highest => formats
            .iter()
            .filter(|format| format.has_video || format.has_audio)
            .max_by(|a, b| {
                let muxed = |f: &SourceFormat| f.has_video && f.has_audio;
                muxed(a)
                    .cmp(&muxed(b))
                    .then(a.height.unwrap_or(0).cmp(&b.height.unwrap_or(0)))
                    .then(rate(a.bitrate).total_cmp(&rate(b.bitrate)))
                    .then(rate(a.audio_bitrate).total_cmp(&rate(b.audio_bitrate)))
            }),
        QualityPreference::HighestAudio => formats
            .iter()
            .filter(|format| format.has_audio)
            .max_by(|a, b| {
                let video_weight = |f: &SourceFormat| {
                    if f.has_video { f.height.unwrap_or(1) } else { 0 }
                };
                rate(a.audio_bitrate)
                    .total_cmp(&rate(b.audio_bitrate))
                    .then(video_weight(b).cmp(&video_weight(a)))
            }),
    }
}

fn rate(value: Option<f64>) -> f64 {
    value.unwrap_or(0.0)
}

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

const ID_PATH_PREFIXES: &[&str] = &["embed", "v", "shorts", "live", "e"];

/// Accepts YouTube watch/short/embed links and `youtu.be` short links whose
/// video id is well formed.
pub fn validate_youtube_url(raw: &str) -> bool {
    extract_video_id(raw).is_some()
}

/// Pulls the 11-character video id out of a YouTube URL.
pub fn extract_video_id(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let mut segments = url.path_segments()?.filter(|segment| !segment.is_empty());

    let candidate: Option<String> = if host == "youtu.be" {
        segments.next().map(str::to_string)
    } else if YOUTUBE_HOSTS.contains(&host.as_str()) {
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some(prefix) if ID_PATH_PREFIXES.contains(&prefix) => {
                segments.next().map(str::to_string)
            }
            _ => None,
        }
    } else {
        None
    };

    let candidate = candidate?;
    is_valid_video_id(&candidate).then_some(candidate)
}

fn is_valid_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Boxed reader half of a [`MediaStream`].
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// An opened byte stream plus a future that settles once the producer is
/// done. Upstream failures that happen mid-transfer surface through the
/// completion future rather than the reader.
pub struct MediaStream {
    reader: ByteReader,
    completion: BoxFuture<'static, Result<(), MediaError>>,
}

impl MediaStream {
    pub fn new<R, F>(reader: R, completion: F) -> Self
    where
        R: AsyncRead + Send + 'static,
        F: Future<Output = Result<(), MediaError>> + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            completion: completion.boxed(),
        }
    }

    /// Stream whose producer can never fail on its own.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::new(reader, futures::future::ready(Ok(())))
    }

    pub fn into_parts(self) -> (ByteReader, BoxFuture<'static, Result<(), MediaError>>) {
        (self.reader, self.completion)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Cheap syntactic check; never touches the network.
    fn validate_url(&self, url: &str) -> bool;

    async fn get_info(&self, url: &str) -> Result<SourceInfo, MediaError>;

    fn choose_format<'a>(
        &self,
        info: &'a SourceInfo,
        preference: QualityPreference,
    ) -> Option<&'a SourceFormat> {
        choose_format(&info.formats, preference)
    }

    /// Starts streaming the given format.
    async fn open_stream(
        &self,
        url: &str,
        format: &SourceFormat,
    ) -> Result<MediaStream, MediaError>;
}

#![forbid(unsafe_code)]

//! Resource fetch workflow: validate, pick a format, enforce constraints,
//! and only then open the byte stream.

use tracing::{debug, info};

use crate::error::MediaError;
use crate::extract::{Extractor, MediaStream, QualityPreference};
use crate::storage::MediaKind;

pub const DEFAULT_VIDEO_CONTAINER: &str = "mp4";
pub const DEFAULT_MAX_VIDEO_BYTES: u64 = 1000 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub source_url: String,
    pub kind: MediaKind,
}

impl MediaRequest {
    pub fn new(source_url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            source_url: source_url.into(),
            kind,
        }
    }
}

/// Limits applied to video downloads. Audio is unconstrained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConstraints {
    pub video_container: String,
    pub max_video_bytes: u64,
}

impl Default for FetchConstraints {
    fn default() -> Self {
        Self {
            video_container: DEFAULT_VIDEO_CONTAINER.to_string(),
            max_video_bytes: DEFAULT_MAX_VIDEO_BYTES,
        }
    }
}

/// A source that passed every check, with its stream already opened.
#[derive(Debug)]
pub struct ResolvedSource {
    pub title: String,
    pub thumbnail_url: String,
    pub container: String,
    pub declared_size: Option<u64>,
    pub stream: MediaStream,
}

pub async fn fetch(
    extractor: &dyn Extractor,
    request: &MediaRequest,
    constraints: &FetchConstraints,
) -> Result<ResolvedSource, MediaError> {
    let url = request.source_url.trim();
    if !extractor.validate_url(url) {
        return Err(MediaError::InvalidSource {
            url: request.source_url.clone(),
        });
    }

    let info = extractor.get_info(url).await?;
    let preference = match request.kind {
        MediaKind::Video => QualityPreference::Highest,
        MediaKind::Audio => QualityPreference::HighestAudio,
    };
    let Some(format) = extractor.choose_format(&info, preference) else {
        return Err(MediaError::UnsupportedFormat {
            expected: match request.kind {
                MediaKind::Video => constraints.video_container.clone(),
                MediaKind::Audio => "audio".to_string(),
            },
            found: "none".to_string(),
        });
    };
    debug!(
        format_id = %format.format_id,
        container = %format.container,
        kind = request.kind.label(),
        "selected format"
    );

    if request.kind == MediaKind::Video {
        if !format
            .container
            .eq_ignore_ascii_case(&constraints.video_container)
        {
            return Err(MediaError::UnsupportedFormat {
                expected: constraints.video_container.clone(),
                found: format.container.clone(),
            });
        }
        match format.content_length {
            Some(declared) if declared > constraints.max_video_bytes => {
                return Err(MediaError::SizeLimitExceeded {
                    declared,
                    limit: constraints.max_video_bytes,
                });
            }
            _ => {}
        }
    }

    let stream = extractor.open_stream(url, format).await?;
    info!(title = %info.title, kind = request.kind.label(), "source resolved");
    Ok(ResolvedSource {
        thumbnail_url: info.thumbnail_url.clone().unwrap_or_default(),
        container: format.container.clone(),
        declared_size: format.content_length,
        title: info.title,
        stream,
    })
}

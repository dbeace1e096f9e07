#![forbid(unsafe_code)]

//! HTTP surface: the two download entry points plus static retrieval of the
//! files they produce.
//!
//! Both download routes answer 200 with a kind-specific JSON body or 500 with
//! `{ "error": message }`. Video validation failures keep their own message.
//! Everything else gets a generic message chosen by kind and stage, and the
//! cause only goes to the log.

use std::path::{Component, Path, PathBuf};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::error::MediaError;
use crate::fetch::MediaRequest;
use crate::pipeline::{DownloadError, Downloader, Stage};
use crate::storage::MediaKind;

const VIDEO_TRANSFER_FAILED: &str = "An error occurred while downloading the video.";
const AUDIO_RESOLVE_FAILED: &str = "Error fetching YouTube Audio";
const AUDIO_FETCH_FAILED: &str = "Error fetching audio";
const AUDIO_CONVERT_FAILED: &str = "Error converting audio";

#[derive(Clone)]
pub struct AppState {
    pub downloader: Downloader,
}

impl AppState {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/download", get(download_video))
        .route("/downloadmp3", get(download_audio))
        .route("/getvideo/{file}", get(get_video_file))
        .route("/getaudio/{file}", get(get_audio_file))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Maps a failed download to the message the caller sees. The full cause
    /// is logged here.
    fn from_download(kind: MediaKind, failure: DownloadError) -> Self {
        let DownloadError { stage, error } = failure;
        error!(kind = kind.label(), ?stage, error = %error, "download failed");
        let message = match (kind, stage) {
            (MediaKind::Video, _) if error.is_validation() => error.to_string(),
            (MediaKind::Video, _) => VIDEO_TRANSFER_FAILED.to_string(),
            (MediaKind::Audio, Stage::Resolve) => AUDIO_RESOLVE_FAILED.to_string(),
            (MediaKind::Audio, Stage::Transfer) => match error {
                MediaError::Transcode(_) => AUDIO_CONVERT_FAILED.to_string(),
                _ => AUDIO_FETCH_FAILED.to_string(),
            },
        };
        Self::internal(message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct VideoQuery {
    #[serde(default, rename = "videoURL")]
    video_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct AudioQuery {
    #[serde(default, rename = "AudioURL")]
    audio_url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    pub video_title: String,
    pub video_thumbnail: String,
    pub video_url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioResponse {
    pub title: String,
    pub thumbnail: String,
    pub unique_file_name: String,
}

async fn download_video(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> ApiResult<Json<VideoResponse>> {
    let download = state
        .downloader
        .download(MediaRequest::new(query.video_url, MediaKind::Video))
        .await
        .map_err(|err| ApiError::from_download(MediaKind::Video, err))?;
    let body = VideoResponse {
        video_title: download.title.clone(),
        video_thumbnail: download.thumbnail_url.clone(),
        video_url: download.artifact.relative_name.clone(),
    };
    // Cleanup may start before the body is written. The new file is never a
    // purge candidate, so the response cannot point at a deleted file.
    download.spawn_cleanup();
    Ok(Json(body))
}

async fn download_audio(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
) -> ApiResult<Json<AudioResponse>> {
    let download = state
        .downloader
        .download(MediaRequest::new(query.audio_url, MediaKind::Audio))
        .await
        .map_err(|err| ApiError::from_download(MediaKind::Audio, err))?;
    let body = AudioResponse {
        title: download.title.clone(),
        thumbnail: download.thumbnail_url.clone(),
        unique_file_name: download.artifact.relative_name.clone(),
    };
    // Same ordering as the video route.
    download.spawn_cleanup();
    Ok(Json(body))
}

async fn get_video_file(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_artifact(&state, MediaKind::Video, &file, &headers).await
}

async fn get_audio_file(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_artifact(&state, MediaKind::Audio, &file, &headers).await
}

async fn serve_artifact(
    state: &AppState,
    kind: MediaKind,
    file: &str,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    ensure_safe_path_segment(file)?;
    let path = state.downloader.layout().dir_for(kind).join(file);
    stream_file(path, headers).await
}

/// Rejects anything that is not a single plain file name.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    let mut components = Path::new(value).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if value.is_empty() || !single_normal {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(())
}

async fn stream_file(path: PathBuf, headers: &HeaderMap) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("file not found"));
    }
    let size = metadata.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            let mut response = body.into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// Parses a single `bytes=` range. Returns inclusive offsets; the end may
/// exceed the file and is clamped by the caller.
fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let range = value.strip_prefix("bytes=")?.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // "-N" is the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    (end >= start).then_some((start, end))
}

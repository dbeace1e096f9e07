#![forbid(unsafe_code)]

//! Failure taxonomy shared by the fetch and materialization stages.

use std::path::PathBuf;

use thiserror::Error;

/// Every way a single download request can fail. None of these are retried;
/// the request is aborted and the message is handed back to the caller.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid YouTube URL")]
    InvalidSource { url: String },

    #[error(
        "Invalid video format. Only {container} format is supported.",
        container = .expected.to_ascii_uppercase()
    )]
    UnsupportedFormat { expected: String, found: String },

    #[error("The video size exceeds {} MB.", .limit / (1024 * 1024))]
    SizeLimitExceeded { declared: u64, limit: u64 },

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoding failed: {0}")]
    Transcode(String),
}

impl MediaError {
    pub(crate) fn io(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// True for errors raised before any byte was streamed: bad URLs and
    /// rejected formats. Their message is safe to show verbatim.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidSource { .. }
                | Self::UnsupportedFormat { .. }
                | Self::SizeLimitExceeded { .. }
        )
    }
}

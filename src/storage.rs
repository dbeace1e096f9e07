#![forbid(unsafe_code)]

//! On-disk layout for downloaded artifacts.
//!
//! Everything lives below a single storage root:
//!
//! ```text
//! <root>/videos/<title>-<timestamp_ms>.mp4
//! <root>/audios/<timestamp_ms>-<title>.mp3
//! ```
//!
//! The directory listing is the only record of what exists. Nothing here keeps
//! an index in memory, so every lookup reads the directory again.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::MediaError;

pub const VIDEOS_SUBDIR: &str = "videos";
pub const AUDIOS_SUBDIR: &str = "audios";

/// The two kinds of artifact the service produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn subdir(self) -> &'static str {
        match self {
            Self::Video => VIDEOS_SUBDIR,
            Self::Audio => AUDIOS_SUBDIR,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "mp3",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// A single stored media file produced by one successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub kind: MediaKind,
    pub sanitized_title: String,
    pub unique_suffix: i64,
    pub absolute_path: PathBuf,
    pub relative_name: String,
}

/// Outcome of a best-effort purge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Storage root plus the per-kind directories below it.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds artifacts of `kind`.
    pub fn dir_for(&self, kind: MediaKind) -> PathBuf {
        self.root.join(kind.subdir())
    }

    /// Creates the storage root and both kind directories.
    pub async fn prepare(&self) -> Result<(), MediaError> {
        for kind in [MediaKind::Video, MediaKind::Audio] {
            ensure_directories(&self.root, &[kind.subdir()]).await?;
        }
        Ok(())
    }

    /// Builds the artifact record for a new file. Pure; nothing is created.
    pub fn artifact(
        &self,
        kind: MediaKind,
        sanitized_title: &str,
        unique_suffix: i64,
    ) -> StoredArtifact {
        StoredArtifact {
            kind,
            sanitized_title: sanitized_title.to_string(),
            unique_suffix,
            absolute_path: build_path(&self.dir_for(kind), kind, sanitized_title, unique_suffix),
            relative_name: artifact_file_name(kind, sanitized_title, unique_suffix),
        }
    }
}

/// Creates `root` and each nested `subpaths` component when missing. Calling it
/// again on an existing tree is a no-op.
pub async fn ensure_directories(root: &Path, subpaths: &[&str]) -> Result<PathBuf, MediaError> {
    let target = subpaths
        .iter()
        .fold(root.to_path_buf(), |path, segment| path.join(segment));
    tokio::fs::create_dir_all(&target)
        .await
        .map_err(|err| MediaError::io("creating", &target, err))?;
    Ok(target)
}

/// File name for a new artifact. Videos lead with the title, audio files lead
/// with the timestamp.
pub fn artifact_file_name(kind: MediaKind, sanitized_title: &str, unique_suffix: i64) -> String {
    let ext = kind.extension();
    match kind {
        MediaKind::Video => format!("{sanitized_title}-{unique_suffix}.{ext}"),
        MediaKind::Audio => format!("{unique_suffix}-{sanitized_title}.{ext}"),
    }
}

pub fn build_path(
    dir: &Path,
    kind: MediaKind,
    sanitized_title: &str,
    unique_suffix: i64,
) -> PathBuf {
    dir.join(artifact_file_name(kind, sanitized_title, unique_suffix))
}

/// Whether `file_name` is an artifact of `kind` for the given title.
pub fn is_sibling_name(kind: MediaKind, file_name: &str, sanitized_title: &str) -> bool {
    let ext = kind.extension();
    match kind {
        MediaKind::Video => {
            file_name.starts_with(&format!("{sanitized_title}-"))
                && file_name.ends_with(&format!(".{ext}"))
        }
        MediaKind::Audio => {
            let Some(stamp) = file_name.strip_suffix(&format!("-{sanitized_title}.{ext}")) else {
                return false;
            };
            !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit())
        }
    }
}

/// Lists older artifacts that share `sanitized_title`, skipping `exclude`.
/// Order follows the directory listing.
pub async fn list_sibling_artifacts(
    dir: &Path,
    kind: MediaKind,
    sanitized_title: &str,
    exclude: &Path,
) -> Result<Vec<PathBuf>, MediaError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| MediaError::io("listing", dir, err))?;
    let mut siblings = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| MediaError::io("listing", dir, err))?
    {
        let path = entry.path();
        if path == exclude {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_sibling_name(kind, name, sanitized_title) {
            siblings.push(path);
        }
    }
    Ok(siblings)
}

/// Deletes every path. A failure is logged and recorded but never stops the
/// remaining deletions.
pub async fn purge(paths: &[PathBuf]) -> PurgeReport {
    let mut report = PurgeReport::default();
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed superseded artifact");
                report.removed.push(path.clone());
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to remove superseded artifact");
                report.failed.push(path.clone());
            }
        }
    }
    report
}

/// Removes every older artifact that shares the title of `artifact`.
pub async fn purge_superseded(artifact: &StoredArtifact) -> PurgeReport {
    let Some(dir) = artifact.absolute_path.parent() else {
        return PurgeReport::default();
    };
    match list_sibling_artifacts(
        dir,
        artifact.kind,
        &artifact.sanitized_title,
        &artifact.absolute_path,
    )
    .await
    {
        Ok(siblings) => purge(&siblings).await,
        Err(err) => {
            warn!(error = %err, "could not list artifacts for cleanup");
            PurgeReport::default()
        }
    }
}

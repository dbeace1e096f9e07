#![forbid(unsafe_code)]

//! Download-and-materialize service for remote media.
//!
//! A request names a source URL. The [`fetch`] stage validates it and picks a
//! format, the [`pipeline`] stage writes it below the storage root (through
//! ffmpeg for audio), and older files with the same title are purged in the
//! background. [`http`] exposes that workflow plus static retrieval.

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod http;
pub mod pipeline;
pub mod sanitize;
pub mod storage;
pub mod transcode;
pub mod ytdlp;

#[cfg(test)]
pub(crate) mod testing;

pub use error::MediaError;

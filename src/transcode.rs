#![forbid(unsafe_code)]

//! Transcoding capability. The ffmpeg implementation reads the source from
//! stdin and writes the converted file straight to its destination.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};
use tracing::{debug, info};

use crate::error::MediaError;
use crate::extract::MediaStream;

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Converts `input` into `target_format` and writes the result to
    /// `destination`. Upstream failures of `input` are reported as
    /// [`MediaError::UpstreamFetch`]; conversion failures as
    /// [`MediaError::Transcode`].
    async fn transcode(
        &self,
        input: MediaStream,
        target_format: &str,
        destination: &Path,
    ) -> Result<(), MediaError>;
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn transcode(
        &self,
        input: MediaStream,
        target_format: &str,
        destination: &Path,
    ) -> Result<(), MediaError> {
        info!(destination = %destination.display(), target_format, "transcoding");
        let mut child = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg("pipe:0")
            .arg("-vn")
            .arg("-f")
            .arg(target_format)
            .arg(destination)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| MediaError::Transcode(format!("launching ffmpeg: {err}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Transcode("ffmpeg stdin unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::Transcode("ffmpeg stderr unavailable".into()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let (mut reader, completion) = input.into_parts();
        let fed = tokio::io::copy(&mut reader, &mut stdin).await;
        // A producer blocked on a full pipe only exits once nobody reads it.
        drop(reader);
        // Closing stdin is what tells ffmpeg the input is over.
        let _ = stdin.shutdown().await;
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|err| MediaError::Transcode(format!("waiting for ffmpeg: {err}")))?;
        let stderr = stderr_task.await.unwrap_or_default();
        let ffmpeg_failed = || {
            MediaError::Transcode(format!("ffmpeg exited with {status}: {}", stderr.trim()))
        };

        match fed {
            Ok(bytes) => {
                // The whole input arrived, so a producer error is the real cause.
                completion.await?;
                if !status.success() {
                    return Err(ffmpeg_failed());
                }
                debug!(bytes, "transcode input consumed");
                Ok(())
            }
            Err(err) => {
                // ffmpeg stopped reading early. The producer is dropped unawaited:
                // it dies of the closed pipe, which says nothing about the source.
                if !status.success() {
                    return Err(ffmpeg_failed());
                }
                Err(MediaError::Transcode(format!("feeding ffmpeg: {err}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Extractor;
    use crate::testing::{SAMPLE_URL, install_stub, mp4_format};
    use crate::ytdlp::YtDlp;
    use std::{fs, time::Duration};
    use tempfile::tempdir;

    /// Stand-in ffmpeg: copies stdin to the last argument, upper-cased so the
    /// test can tell the file went through the transcoder.
    fn install_ffmpeg_stub(dir: &Path) -> PathBuf {
        let script = r#"#!/usr/bin/env bash
set -eu
for last; do :; done
tr '[:lower:]' '[:upper:]' > "$last"
"#;
        install_stub(dir, "ffmpeg", script)
    }

    fn install_failing_ffmpeg(dir: &Path) -> PathBuf {
        let script = r#"#!/usr/bin/env bash
cat > /dev/null
echo "pipe:0: Invalid data found when processing input" >&2
exit 1
"#;
        install_stub(dir, "ffmpeg-broken", script)
    }

    #[tokio::test]
    async fn writes_converted_output_to_destination() {
        let temp = tempdir().unwrap();
        let ffmpeg = Ffmpeg::new(install_ffmpeg_stub(temp.path()));
        let destination = temp.path().join("out.mp3");
        let input = MediaStream::from_reader(std::io::Cursor::new(b"audio".to_vec()));

        ffmpeg.transcode(input, "mp3", &destination).await.unwrap();
        assert_eq!(fs::read_to_string(&destination).unwrap(), "AUDIO");
    }

    #[tokio::test]
    async fn conversion_failure_is_a_transcode_error() {
        let temp = tempdir().unwrap();
        let ffmpeg = Ffmpeg::new(install_failing_ffmpeg(temp.path()));
        let destination = temp.path().join("out.mp3");
        let input = MediaStream::from_reader(std::io::Cursor::new(b"garbage".to_vec()));

        let err = ffmpeg.transcode(input, "mp3", &destination).await.unwrap_err();
        assert!(matches!(err, MediaError::Transcode(_)));
        assert!(err.to_string().contains("Invalid data"));
    }

    #[tokio::test]
    async fn upstream_failure_wins_over_conversion_success() {
        let temp = tempdir().unwrap();
        let ffmpeg = Ffmpeg::new(install_ffmpeg_stub(temp.path()));
        let destination = temp.path().join("out.mp3");
        let input = MediaStream::new(std::io::Cursor::new(b"half".to_vec()), async {
            Err(MediaError::UpstreamFetch("connection reset".into()))
        });

        let err = ffmpeg.transcode(input, "mp3", &destination).await.unwrap_err();
        assert!(matches!(err, MediaError::UpstreamFetch(_)));
    }

    #[tokio::test]
    async fn early_ffmpeg_exit_does_not_wait_on_a_blocked_producer() {
        let temp = tempdir().unwrap();
        let yt_dlp = YtDlp::new(install_stub(
            temp.path(),
            "yt-dlp",
            "#!/usr/bin/env bash\nhead -c 20000000 /dev/zero\n",
        ));
        let ffmpeg = Ffmpeg::new(install_stub(
            temp.path(),
            "ffmpeg-quits",
            "#!/usr/bin/env bash\necho 'pipe:0: Invalid data' >&2\nexit 1\n",
        ));
        let input = yt_dlp
            .open_stream(SAMPLE_URL, &mp4_format(None))
            .await
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            ffmpeg.transcode(input, "mp3", &temp.path().join("out.mp3")),
        )
        .await
        .expect("transcode finished after ffmpeg exited");
        let err = result.unwrap_err();
        assert!(matches!(err, MediaError::Transcode(_)), "{err}");
        assert!(err.to_string().contains("Invalid data"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_transcode_error() {
        let temp = tempdir().unwrap();
        let ffmpeg = Ffmpeg::new(temp.path().join("no-ffmpeg"));
        let input = MediaStream::from_reader(std::io::Cursor::new(Vec::new()));
        let err = ffmpeg
            .transcode(input, "mp3", &temp.path().join("out.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Transcode(_)));
    }
}

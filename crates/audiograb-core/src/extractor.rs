//! Audio extraction using FFmpeg

use crate::error::ExtractError;
use crate::format::AudioFormat;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Transcode the first audio track of `input` into `output_dir`, returning the written file.
    ///
    /// Any process or handle opened here is released before the future resolves,
    /// or when the future is dropped.
    async fn extract_audio(
        &self,
        input: &Path,
        output_dir: &Path,
        format: AudioFormat,
        bitrate_kbps: u32,
    ) -> Result<PathBuf, ExtractError>;
}

#[derive(Debug)]
pub struct FfmpegExtractor {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
}

impl FfmpegExtractor {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    /// Count audio streams in the container
    pub async fn audio_track_count(&self, input: &Path) -> Result<usize, ExtractError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| tool_error(e, "ffprobe"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("ffprobe stderr: {}", stderr);
            return Err(ExtractError::DecodeError(format!(
                "ffprobe could not read input (exit code {:?}): {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let probe = parse_probe_output(&output.stdout)?;
        for stream in &probe.streams {
            debug!(
                "Stream: {} ({})",
                stream.codec_type.as_deref().unwrap_or("?"),
                stream.codec_name.as_deref().unwrap_or("?")
            );
        }
        Ok(count_audio_streams(&probe))
    }
}

#[async_trait]
impl MediaExtractor for FfmpegExtractor {
    async fn extract_audio(
        &self,
        input: &Path,
        output_dir: &Path,
        format: AudioFormat,
        bitrate_kbps: u32,
    ) -> Result<PathBuf, ExtractError> {
        if self.audio_track_count(input).await? == 0 {
            return Err(ExtractError::NoAudioTrack);
        }

        info!("Extracting audio to {} format", format);
        let output = output_dir.join(format!("audio.{}", format.extension()));

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        cmd.arg("-i").arg(input);
        // Drop video, take the first audio track only
        cmd.args(["-vn", "-map", "0:a:0"]);
        cmd.args(format.codec_args(bitrate_kbps));
        cmd.arg("-y").arg(&output);

        let result = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| tool_error(e, "ffmpeg"))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            debug!("ffmpeg stderr: {}", stderr);
            return Err(ExtractError::DecodeError(format!(
                "ffmpeg failed with exit code {:?}: {}",
                result.status.code(),
                stderr.trim()
            )));
        }

        if !tokio::fs::try_exists(&output).await? {
            return Err(ExtractError::DecodeError(format!(
                "ffmpeg reported success but {} is missing",
                output.display()
            )));
        }

        debug!("Extracted to: {}", output.display());
        Ok(output)
    }
}

fn tool_error(e: std::io::Error, tool: &'static str) -> ExtractError {
    match e.kind() {
        std::io::ErrorKind::NotFound => ExtractError::ToolNotFound(tool),
        _ => ExtractError::Io(e),
    }
}

fn parse_probe_output(stdout: &[u8]) -> Result<ProbeOutput, ExtractError> {
    serde_json::from_slice(stdout)
        .map_err(|e| ExtractError::DecodeError(format!("unreadable ffprobe output: {}", e)))
}

fn count_audio_streams(probe: &ProbeOutput) -> usize {
    probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_audio_streams() {
        let json = br#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264"},
                {"index": 1, "codec_type": "audio", "codec_name": "aac"},
                {"index": 2, "codec_type": "subtitle"}
            ]
        }"#;
        let probe = parse_probe_output(json).unwrap();
        assert_eq!(count_audio_streams(&probe), 1);
    }

    #[test]
    fn test_video_only_has_no_audio() {
        let json = br#"{"streams": [{"codec_type": "video", "codec_name": "vp9"}]}"#;
        let probe = parse_probe_output(json).unwrap();
        assert_eq!(count_audio_streams(&probe), 0);

        let empty = parse_probe_output(b"{}").unwrap();
        assert_eq!(count_audio_streams(&empty), 0);
    }

    #[test]
    fn test_garbage_probe_output_is_decode_error() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(ExtractError::DecodeError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_reported() {
        let extractor = FfmpegExtractor::new(
            PathBuf::from("/nonexistent/ffmpeg"),
            PathBuf::from("/nonexistent/ffprobe"),
        );
        let dir = tempfile::tempdir().unwrap();
        let err = extractor
            .extract_audio(&dir.path().join("in.mp4"), dir.path(), AudioFormat::Mp3, 192)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ToolNotFound("ffprobe")));
    }
}

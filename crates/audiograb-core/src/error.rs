//! Error types for audiograb-core

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Acquire,
    Extract,
    Stage,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Acquire => "acquire",
            Stage::Extract => "extract",
            Stage::Stage => "stage",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing classification of a conversion failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    SourceUnavailable,
    SourceForbidden,
    SourceIsLiveStream,
    SourceTooSmall,
    NoAudioTrack,
    ExtractionFailed,
    Cancelled,
    Internal,
    /// Never returned from a conversion, only logged
    CleanupWarning,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::SourceForbidden => "source_forbidden",
            ErrorKind::SourceIsLiveStream => "source_is_live_stream",
            ErrorKind::SourceTooSmall => "source_too_small",
            ErrorKind::NoAudioTrack => "no_audio_track",
            ErrorKind::ExtractionFailed => "extraction_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
            ErrorKind::CleanupWarning => "cleanup_warning",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a single conversion request
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[source] DownloadError),

    #[error("Source forbidden: {0}")]
    SourceForbidden(#[source] DownloadError),

    #[error("Live streams are not supported")]
    SourceIsLiveStream,

    #[error("Downloaded file is too small ({size} bytes, minimum {minimum})")]
    SourceTooSmall { size: u64, minimum: u64 },

    #[error("Source contains no audio track")]
    NoAudioTrack,

    #[error("Audio extraction failed: {0}")]
    ExtractionFailed(#[source] ExtractError),

    #[error("Conversion cancelled during {0}")]
    Cancelled(Stage),

    #[error("Failed to prepare request workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to hand off output: {0}")]
    Staging(#[source] std::io::Error),
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ConversionError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            ConversionError::SourceForbidden(_) => ErrorKind::SourceForbidden,
            ConversionError::SourceIsLiveStream => ErrorKind::SourceIsLiveStream,
            ConversionError::SourceTooSmall { .. } => ErrorKind::SourceTooSmall,
            ConversionError::NoAudioTrack => ErrorKind::NoAudioTrack,
            ConversionError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            ConversionError::Cancelled(_) => ErrorKind::Cancelled,
            ConversionError::Workspace(_) | ConversionError::Staging(_) => ErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            ConversionError::InvalidRequest(_) => Stage::Validate,
            ConversionError::SourceUnavailable(_)
            | ConversionError::SourceForbidden(_)
            | ConversionError::SourceIsLiveStream
            | ConversionError::SourceTooSmall { .. }
            | ConversionError::Workspace(_) => Stage::Acquire,
            ConversionError::NoAudioTrack | ConversionError::ExtractionFailed(_) => Stage::Extract,
            ConversionError::Staging(_) => Stage::Stage,
            ConversionError::Cancelled(stage) => *stage,
        }
    }

    /// Message safe to show to end users; never includes tool output
    pub fn user_message(&self) -> String {
        match self {
            // Validation messages are produced by us and describe the caller's input
            ConversionError::InvalidRequest(reason) => format!("Invalid request: {}", reason),
            ConversionError::SourceUnavailable(_) => {
                "The source could not be downloaded. Check the URL and try again.".to_string()
            }
            ConversionError::SourceForbidden(_) => {
                "The source is private, restricted, or requires sign-in.".to_string()
            }
            ConversionError::SourceIsLiveStream => "Live streams are not supported.".to_string(),
            ConversionError::SourceTooSmall { .. } => {
                "The downloaded file was incomplete or is not valid media.".to_string()
            }
            ConversionError::NoAudioTrack => "The source contains no audio track.".to_string(),
            ConversionError::ExtractionFailed(_) => "Audio extraction failed.".to_string(),
            ConversionError::Cancelled(_) => "The conversion was cancelled.".to_string(),
            ConversionError::Workspace(_) | ConversionError::Staging(_) => {
                "Internal error while processing the request.".to_string()
            }
        }
    }
}

impl From<DownloadError> for ConversionError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::LiveStreamUnsupported => ConversionError::SourceIsLiveStream,
            DownloadError::Forbidden(_) | DownloadError::AgeRestricted(_) => {
                ConversionError::SourceForbidden(err)
            }
            _ => ConversionError::SourceUnavailable(err),
        }
    }
}

impl From<ExtractError> for ConversionError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoAudioTrack => ConversionError::NoAudioTrack,
            other => ConversionError::ExtractionFailed(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("{0} not found. Install it or set its path in the config")]
    ToolNotFound(&'static str),

    #[error("Video unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Download timed out after {0:?}")]
    Timeout(Duration),

    #[error("Access restricted: {0}")]
    Forbidden(String),

    #[error("Age-restricted content: {0}")]
    AgeRestricted(String),

    #[error("Live streams are not supported")]
    LiveStreamUnsupported,

    #[error("Failed to parse metadata: {0}")]
    MetadataParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether another attempt has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Network(_) | DownloadError::Timeout(_))
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("{0} not found. Install it or set its path in the config")]
    ToolNotFound(&'static str),

    #[error("No audio track in input")]
    NoAudioTrack,

    #[error("Decode failed: {0}")]
    DecodeError(String),

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_errors_map_to_taxonomy() {
        let forbidden: ConversionError = DownloadError::AgeRestricted("sign in".into()).into();
        assert_eq!(forbidden.kind(), ErrorKind::SourceForbidden);

        let live: ConversionError = DownloadError::LiveStreamUnsupported.into();
        assert_eq!(live.kind(), ErrorKind::SourceIsLiveStream);

        let timeout: ConversionError = DownloadError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(timeout.kind(), ErrorKind::SourceUnavailable);
        assert_eq!(timeout.stage(), Stage::Acquire);
    }

    #[test]
    fn test_user_message_hides_tool_output() {
        let err: ConversionError =
            ExtractError::DecodeError("[mov,mp4] moov atom not found /tmp/x".into()).into();
        assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
        assert!(!err.user_message().contains("moov"));
        assert!(err.to_string().contains("moov"));
    }

    #[test]
    fn test_no_audio_track_is_its_own_kind() {
        let err: ConversionError = ExtractError::NoAudioTrack.into();
        assert_eq!(err.kind(), ErrorKind::NoAudioTrack);
        assert_eq!(err.stage(), Stage::Extract);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Acquire.to_string(), "acquire");
        assert_eq!(Stage::Cleanup.to_string(), "cleanup");
        assert_eq!(ErrorKind::CleanupWarning.to_string(), "cleanup_warning");
    }
}

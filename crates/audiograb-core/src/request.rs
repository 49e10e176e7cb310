//! Conversion requests and stage-one validation

use crate::error::ConversionError;
use crate::format::{self, AudioFormat, MAX_BITRATE_KBPS, MIN_BITRATE_KBPS};
use std::fmt;
use url::Url;

/// Where the media comes from
#[derive(Clone)]
pub enum MediaSource {
    RemoteUrl(String),
    UploadedFile {
        bytes: Vec<u8>,
        original_filename: String,
    },
}

// Upload bytes can be hundreds of megabytes; keep them out of logs
impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::RemoteUrl(url) => f.debug_tuple("RemoteUrl").field(url).finish(),
            MediaSource::UploadedFile {
                bytes,
                original_filename,
            } => f
                .debug_struct("UploadedFile")
                .field("len", &bytes.len())
                .field("original_filename", original_filename)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: MediaSource,
    pub format: AudioFormat,
    pub bitrate_kbps: Option<u32>,
}

impl ConversionRequest {
    pub fn remote(url: impl Into<String>, format: AudioFormat) -> Self {
        Self {
            source: MediaSource::RemoteUrl(url.into()),
            format,
            bitrate_kbps: None,
        }
    }

    pub fn upload(
        bytes: Vec<u8>,
        original_filename: impl Into<String>,
        format: AudioFormat,
    ) -> Self {
        Self {
            source: MediaSource::UploadedFile {
                bytes,
                original_filename: original_filename.into(),
            },
            format,
            bitrate_kbps: None,
        }
    }

    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.bitrate_kbps = Some(kbps);
        self
    }

    /// Check the request without touching the filesystem
    pub fn validate(self, default_bitrate_kbps: u32) -> Result<ValidatedRequest, ConversionError> {
        let bitrate_kbps = self.bitrate_kbps.unwrap_or(default_bitrate_kbps);
        if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&bitrate_kbps) {
            return Err(ConversionError::InvalidRequest(format!(
                "bitrate must be between {} and {} kbps, got {}",
                MIN_BITRATE_KBPS, MAX_BITRATE_KBPS, bitrate_kbps
            )));
        }

        let source = match self.source {
            MediaSource::RemoteUrl(raw) => ValidatedSource::Remote(parse_remote_url(&raw)?),
            MediaSource::UploadedFile {
                bytes,
                original_filename,
            } => {
                let original_filename = original_filename.trim().to_string();
                if original_filename.is_empty() {
                    return Err(ConversionError::InvalidRequest(
                        "uploaded file has no filename".to_string(),
                    ));
                }
                let extension = format::input_extension(&original_filename).ok_or_else(|| {
                    ConversionError::InvalidRequest(format!(
                        "unsupported file type '{}' (allowed: {})",
                        original_filename,
                        format::ALLOWED_INPUT_EXTENSIONS.join(", ")
                    ))
                })?;
                if bytes.is_empty() {
                    return Err(ConversionError::InvalidRequest(
                        "uploaded file is empty".to_string(),
                    ));
                }
                ValidatedSource::Upload {
                    bytes,
                    original_filename,
                    extension,
                }
            }
        };

        Ok(ValidatedRequest {
            source,
            format: self.format,
            bitrate_kbps,
        })
    }
}

/// Transport-facing request where the source fields are independent options
#[derive(Debug, Clone, Default)]
pub struct RawConversionRequest {
    pub video_url: Option<String>,
    pub upload: Option<(Vec<u8>, String)>,
    pub format: Option<String>,
    pub bitrate_kbps: Option<u32>,
}

impl RawConversionRequest {
    /// Resolve into a typed request, requiring exactly one source
    pub fn into_request(
        self,
        default_format: AudioFormat,
    ) -> Result<ConversionRequest, ConversionError> {
        let video_url = self.video_url.filter(|u| !u.trim().is_empty());
        let source = match (video_url, self.upload) {
            (Some(url), None) => MediaSource::RemoteUrl(url),
            (None, Some((bytes, original_filename))) => MediaSource::UploadedFile {
                bytes,
                original_filename,
            },
            (None, None) => {
                return Err(ConversionError::InvalidRequest(
                    "provide either a video URL or a file".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ConversionError::InvalidRequest(
                    "provide a video URL or a file, not both".to_string(),
                ))
            }
        };

        let format = match self.format.as_deref().map(str::trim) {
            None | Some("") => default_format,
            Some(raw) => raw.parse().map_err(|e: format::UnsupportedFormat| {
                ConversionError::InvalidRequest(e.to_string())
            })?,
        };

        Ok(ConversionRequest {
            source,
            format,
            bitrate_kbps: self.bitrate_kbps,
        })
    }
}

#[derive(Debug)]
pub struct ValidatedRequest {
    pub source: ValidatedSource,
    pub format: AudioFormat,
    pub bitrate_kbps: u32,
}

pub enum ValidatedSource {
    Remote(Url),
    Upload {
        bytes: Vec<u8>,
        original_filename: String,
        extension: String,
    },
}

impl fmt::Debug for ValidatedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatedSource::Remote(url) => f.debug_tuple("Remote").field(&url.as_str()).finish(),
            ValidatedSource::Upload {
                bytes,
                original_filename,
                extension,
            } => f
                .debug_struct("Upload")
                .field("len", &bytes.len())
                .field("original_filename", original_filename)
                .field("extension", extension)
                .finish(),
        }
    }
}

/// Parse an absolute http(s) URL with a host
pub fn parse_remote_url(raw: &str) -> Result<Url, ConversionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConversionError::InvalidRequest("URL is empty".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| {
        ConversionError::InvalidRequest(format!("'{}' is not a valid URL: {}", raw, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConversionError::InvalidRequest(format!(
            "URL must use http or https, got '{}'",
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(ConversionError::InvalidRequest(format!("URL '{}' has no host", raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kind(result: Result<ValidatedRequest, ConversionError>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[test]
    fn test_rejects_empty_and_schemeless_urls() {
        for url in [
            "",
            "   ",
            "example.com/v/abc",
            "www.youtube.com/watch?v=x",
            "/local/path.mp4",
        ] {
            let req = ConversionRequest::remote(url, AudioFormat::Mp3);
            assert_eq!(kind(req.validate(192)), ErrorKind::InvalidRequest, "{url:?}");
        }
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        let req = ConversionRequest::remote("ftp://example.com/clip.mp4", AudioFormat::Mp3);
        assert_eq!(kind(req.validate(192)), ErrorKind::InvalidRequest);
        let req = ConversionRequest::remote("file:///etc/passwd", AudioFormat::Mp3);
        assert_eq!(kind(req.validate(192)), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_accepts_absolute_url() {
        let req = ConversionRequest::remote("https://example.com/v/abc123", AudioFormat::Mp3);
        let validated = req.validate(192).unwrap();
        assert_eq!(validated.bitrate_kbps, 192);
        match validated.source {
            ValidatedSource::Remote(url) => assert_eq!(url.host_str(), Some("example.com")),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_upload_extension_rules() {
        let ok = ConversionRequest::upload(vec![0; 10], "Clip.MOV", AudioFormat::Wav)
            .validate(192)
            .unwrap();
        match ok.source {
            ValidatedSource::Upload { extension, .. } => assert_eq!(extension, "mov"),
            other => panic!("unexpected source {other:?}"),
        }

        let bad = ConversionRequest::upload(vec![0; 10], "clip.exe", AudioFormat::Wav);
        assert_eq!(kind(bad.validate(192)), ErrorKind::InvalidRequest);

        let unnamed = ConversionRequest::upload(vec![0; 10], "  ", AudioFormat::Wav);
        assert_eq!(kind(unnamed.validate(192)), ErrorKind::InvalidRequest);

        let empty = ConversionRequest::upload(Vec::new(), "clip.mp4", AudioFormat::Wav);
        assert_eq!(kind(empty.validate(192)), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_bitrate_bounds() {
        let remote = || ConversionRequest::remote("https://example.com/a", AudioFormat::Mp3);
        let req = remote().with_bitrate(8);
        assert_eq!(kind(req.validate(192)), ErrorKind::InvalidRequest);
        let req = remote().with_bitrate(320);
        assert_eq!(req.validate(192).unwrap().bitrate_kbps, 320);
    }

    #[test]
    fn test_raw_request_requires_exactly_one_source() {
        let neither = RawConversionRequest::default();
        assert_eq!(
            neither.into_request(AudioFormat::Mp3).unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        let both = RawConversionRequest {
            video_url: Some("https://example.com/v".into()),
            upload: Some((vec![1, 2, 3], "clip.mp4".into())),
            ..Default::default()
        };
        assert_eq!(
            both.into_request(AudioFormat::Mp3).unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        // A blank URL field next to a file counts as "no URL"
        let upload = RawConversionRequest {
            video_url: Some("".into()),
            upload: Some((vec![1, 2, 3], "clip.mp4".into())),
            format: Some("ogg".into()),
            bitrate_kbps: None,
        };
        let req = upload.into_request(AudioFormat::Mp3).unwrap();
        assert_eq!(req.format, AudioFormat::Ogg);
        assert!(matches!(req.source, MediaSource::UploadedFile { .. }));
    }

    #[test]
    fn test_raw_request_format_handling() {
        let raw = RawConversionRequest {
            video_url: Some("https://example.com/v".into()),
            format: Some("flac".into()),
            ..Default::default()
        };
        assert_eq!(
            raw.into_request(AudioFormat::Mp3).unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        let raw = RawConversionRequest {
            video_url: Some("https://example.com/v".into()),
            ..Default::default()
        };
        assert_eq!(raw.into_request(AudioFormat::M4a).unwrap().format, AudioFormat::M4a);
    }
}

//! audiograb-core: video-to-audio conversion pipeline
//!
//! A request is validated, its media acquired into a request-scoped temporary
//! directory (via yt-dlp, a direct HTTP download, or an uploaded file), the
//! audio track extracted with FFmpeg, and the result handed off before the
//! directory is removed.

pub mod config;
pub mod direct;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod format;
pub mod naming;
pub mod pipeline;
pub mod request;
pub mod workspace;

pub use config::Config;
pub use downloader::{Downloader, FetchedMedia};
pub use error::{ConversionError, DownloadError, ErrorKind, ExtractError, Stage};
pub use extractor::MediaExtractor;
pub use format::AudioFormat;
pub use pipeline::{Artifact, ConversionResult, Handoff, Pipeline, PipelineSettings, PipelineStage};
pub use request::{ConversionRequest, MediaSource, RawConversionRequest};

pub use tokio_util::sync::CancellationToken;

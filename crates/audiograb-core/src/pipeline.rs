//! Pipeline orchestration: validate, acquire, extract, stage, clean up

use crate::config::Config;
use crate::direct::DirectDownloader;
use crate::downloader::{Downloader, RoutingDownloader, YtDlpDownloader, RETRY_BACKOFF};
use crate::error::{ConfigError, ConversionError, Stage};
use crate::extractor::{FfmpegExtractor, MediaExtractor};
use crate::format::AudioFormat;
use crate::naming::{output_filename, upload_stem};
use crate::request::{ConversionRequest, ValidatedRequest, ValidatedSource};
use crate::workspace::{candidate_path, remove_if_exists, RequestWorkspace};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Knobs the pipeline needs, resolved from [`Config`] by the process entry point
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent directory for request workspaces
    pub temp_root: PathBuf,
    pub download_timeout: Duration,
    pub max_retries: u32,
    pub min_source_bytes: u64,
    /// Simultaneous downloads across all requests (0 = unlimited)
    pub max_concurrent_downloads: usize,
    pub extract_timeout: Duration,
    pub default_format: AudioFormat,
    pub default_bitrate_kbps: u32,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_root: config.temp_dir(),
            download_timeout: config.download_timeout(),
            max_retries: config.download.max_retries,
            min_source_bytes: config.download.min_size_bytes,
            max_concurrent_downloads: config.download.max_concurrent,
            extract_timeout: config.extract_timeout(),
            default_format: config.output.default_format,
            default_bitrate_kbps: config.output.default_bitrate_kbps,
        }
    }

    /// Upper bound for a whole acquisition including retries and backoff
    fn acquire_deadline(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        let backoff = (1..=self.max_retries)
            .map(|n| RETRY_BACKOFF.saturating_mul(n))
            .fold(Duration::ZERO, Duration::saturating_add);
        // yt-dlp probes and downloads in two bounded steps
        self.download_timeout
            .saturating_mul(attempts)
            .saturating_add(backoff)
            .saturating_mul(2)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Where the finished artifact goes before the workspace is removed
#[derive(Debug, Clone)]
pub enum Handoff {
    /// Copy into this directory, never overwriting an existing file
    CopyToDir(PathBuf),
    /// Read into memory for the transport to send
    InMemory,
}

#[derive(Debug)]
pub enum Artifact {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug)]
pub struct ConversionResult {
    pub artifact: Artifact,
    /// Human-readable name ending in the format's extension
    pub filename: String,
    pub format: AudioFormat,
    pub size_bytes: u64,
    pub source_title: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// Pipeline progress stages
#[derive(Debug, Clone)]
pub enum PipelineStage {
    Validating,
    Acquiring { source: String },
    Acquired { title: Option<String>, duration_seconds: Option<f64> },
    Extracting { format: AudioFormat },
    Staging { filename: String },
    Complete { filename: String, elapsed: Duration },
    Failed { stage: Stage, error: String },
}

/// Media acquired in stage two
struct Acquired {
    path: PathBuf,
    title: Option<String>,
    duration_seconds: Option<f64>,
    display_name: Option<String>,
}

/// Main processing pipeline, shared across concurrent requests
pub struct Pipeline {
    downloader: Arc<dyn Downloader>,
    extractor: Arc<dyn MediaExtractor>,
    settings: PipelineSettings,
    download_slots: Option<Arc<Semaphore>>,
}

impl Pipeline {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn MediaExtractor>,
        settings: PipelineSettings,
    ) -> Self {
        let download_slots = (settings.max_concurrent_downloads > 0)
            .then(|| Arc::new(Semaphore::new(settings.max_concurrent_downloads)));
        Self {
            downloader,
            extractor,
            settings,
            download_slots,
        }
    }

    /// Build the production pipeline (yt-dlp, HTTP, FFmpeg) from configuration
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let yt_dlp = YtDlpDownloader::new(config.yt_dlp_path()?);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("audiograb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("HTTP client: {}", e)))?;
        let downloader = RoutingDownloader::new(DirectDownloader::new(client), yt_dlp);
        let extractor = FfmpegExtractor::new(config.ffmpeg_path()?, config.ffprobe_path()?);

        Ok(Self::new(
            Arc::new(downloader),
            Arc::new(extractor),
            PipelineSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn convert(
        &self,
        request: ConversionRequest,
        handoff: Handoff,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, ConversionError> {
        self.run(request, handoff, cancel, None).await
    }

    pub async fn convert_with_progress(
        &self,
        request: ConversionRequest,
        handoff: Handoff,
        cancel: &CancellationToken,
        progress_tx: mpsc::Sender<PipelineStage>,
    ) -> Result<ConversionResult, ConversionError> {
        self.run(request, handoff, cancel, Some(&progress_tx)).await
    }

    async fn run(
        &self,
        request: ConversionRequest,
        handoff: Handoff,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<PipelineStage>>,
    ) -> Result<ConversionResult, ConversionError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("convert", request_id = %request_id);

        async move {
            let start_time = Instant::now();
            let result = self
                .run_stages(request_id, request, handoff, cancel, progress)
                .await;

            match &result {
                Ok(done) => {
                    info!(
                        "Conversion complete: {} ({} bytes, {:.1}s)",
                        done.filename,
                        done.size_bytes,
                        start_time.elapsed().as_secs_f32()
                    );
                    emit(
                        progress,
                        PipelineStage::Complete {
                            filename: done.filename.clone(),
                            elapsed: start_time.elapsed(),
                        },
                    )
                    .await;
                }
                Err(e) => {
                    warn!(stage = %e.stage(), kind = %e.kind(), error = %e, "Conversion failed");
                    emit(
                        progress,
                        PipelineStage::Failed {
                            stage: e.stage(),
                            error: e.user_message(),
                        },
                    )
                    .await;
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        request_id: Uuid,
        request: ConversionRequest,
        handoff: Handoff,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<PipelineStage>>,
    ) -> Result<ConversionResult, ConversionError> {
        // 1. Validate (no I/O)
        emit(progress, PipelineStage::Validating).await;
        let request = request.validate(self.settings.default_bitrate_kbps)?;
        debug!("Validated request: {:?}", request);

        checkpoint(cancel, Stage::Acquire)?;
        let workspace = RequestWorkspace::create(&self.settings.temp_root, request_id)
            .await
            .map_err(ConversionError::Workspace)?;

        let outcome = self
            .process(&workspace, request, handoff, cancel, progress)
            .await;

        // 5. Cleanup, after any handoff has completed
        workspace.close().await;
        outcome
    }

    async fn process(
        &self,
        workspace: &RequestWorkspace,
        request: ValidatedRequest,
        handoff: Handoff,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<PipelineStage>>,
    ) -> Result<ConversionResult, ConversionError> {
        let ValidatedRequest {
            source,
            format,
            bitrate_kbps,
        } = request;

        // 2. Acquire
        let acquired = self.acquire(workspace, source, cancel, progress).await?;
        emit(
            progress,
            PipelineStage::Acquired {
                title: acquired.title.clone(),
                duration_seconds: acquired.duration_seconds,
            },
        )
        .await;

        // 3. Extract
        checkpoint(cancel, Stage::Extract)?;
        emit(progress, PipelineStage::Extracting { format }).await;
        if !format.is_lossy() {
            debug!("{} output ignores the {} kbps bitrate", format, bitrate_kbps);
        }
        let audio_path = guarded(
            Stage::Extract,
            self.settings.extract_timeout,
            cancel,
            self.extractor
                .extract_audio(&acquired.path, workspace.path(), format, bitrate_kbps),
        )
        .await
        .map_err(|e| match e {
            Guarded::TimedOut(after) => {
                ConversionError::ExtractionFailed(crate::error::ExtractError::Timeout(after))
            }
            Guarded::Cancelled(stage) => ConversionError::Cancelled(stage),
        })??;

        // 4. Stage
        checkpoint(cancel, Stage::Stage)?;
        let filename = output_filename(acquired.display_name.as_deref(), format);
        emit(
            progress,
            PipelineStage::Staging {
                filename: filename.clone(),
            },
        )
        .await;
        let (artifact, size_bytes) = hand_off(&audio_path, &filename, handoff)
            .await
            .map_err(ConversionError::Staging)?;

        Ok(ConversionResult {
            artifact,
            filename,
            format,
            size_bytes,
            source_title: acquired.title,
            duration_seconds: acquired.duration_seconds,
        })
    }

    async fn acquire(
        &self,
        workspace: &RequestWorkspace,
        source: ValidatedSource,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<PipelineStage>>,
    ) -> Result<Acquired, ConversionError> {
        match source {
            ValidatedSource::Remote(url) => {
                emit(
                    progress,
                    PipelineStage::Acquiring {
                        source: url.to_string(),
                    },
                )
                .await;

                let _slot = match &self.download_slots {
                    Some(slots) => Some(
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return Err(ConversionError::Cancelled(Stage::Acquire));
                            }
                            permit = slots.clone().acquire_owned() => permit.ok(),
                        },
                    ),
                    None => None,
                };

                let deadline = self.settings.acquire_deadline();
                let media = guarded(
                    Stage::Acquire,
                    deadline,
                    cancel,
                    self.downloader.fetch(
                        &url,
                        workspace.path(),
                        self.settings.download_timeout,
                        self.settings.max_retries,
                    ),
                )
                .await
                .map_err(|e| match e {
                    Guarded::TimedOut(after) => {
                        ConversionError::from(crate::error::DownloadError::Timeout(after))
                    }
                    Guarded::Cancelled(stage) => ConversionError::Cancelled(stage),
                })??;

                if media.is_live {
                    remove_if_exists(&media.local_path).await.ok();
                    return Err(ConversionError::SourceIsLiveStream);
                }

                let size = match tokio::fs::metadata(&media.local_path).await {
                    Ok(meta) if meta.is_file() => meta.len(),
                    _ => {
                        return Err(ConversionError::SourceUnavailable(
                            crate::error::DownloadError::MetadataParse(format!(
                                "downloaded file {} does not exist",
                                media.local_path.display()
                            )),
                        ))
                    }
                };
                if size < self.settings.min_source_bytes {
                    if let Err(e) = remove_if_exists(&media.local_path).await {
                        warn!("Failed to remove truncated download: {}", e);
                    }
                    return Err(ConversionError::SourceTooSmall {
                        size,
                        minimum: self.settings.min_source_bytes,
                    });
                }

                info!(
                    "Acquired {} ({} bytes)",
                    media.title.as_deref().unwrap_or("(untitled)"),
                    size
                );
                Ok(Acquired {
                    path: media.local_path,
                    display_name: media.title.clone(),
                    title: media.title,
                    duration_seconds: media.duration_seconds,
                })
            }
            ValidatedSource::Upload {
                bytes,
                original_filename,
                extension,
            } => {
                emit(
                    progress,
                    PipelineStage::Acquiring {
                        source: original_filename.clone(),
                    },
                )
                .await;

                let path = workspace.path().join(format!("source.{}", extension));
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(ConversionError::Workspace)?;
                info!("Stored upload {} ({} bytes)", original_filename, bytes.len());

                Ok(Acquired {
                    path,
                    title: None,
                    duration_seconds: None,
                    display_name: Some(upload_stem(&original_filename).to_string()),
                })
            }
        }
    }
}

enum Guarded {
    TimedOut(Duration),
    Cancelled(Stage),
}

/// Race `fut` against a deadline and the cancellation token.
/// Losing futures are dropped, which kills any child process they own.
async fn guarded<F: Future>(
    stage: Stage,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, Guarded> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Guarded::Cancelled(stage)),
        res = tokio::time::timeout(limit, fut) => res.map_err(|_| Guarded::TimedOut(limit)),
    }
}

fn checkpoint(cancel: &CancellationToken, next: Stage) -> Result<(), ConversionError> {
    if cancel.is_cancelled() {
        info!("Cancelled before {}", next);
        return Err(ConversionError::Cancelled(next));
    }
    Ok(())
}

async fn emit(progress: Option<&mpsc::Sender<PipelineStage>>, stage: PipelineStage) {
    if let Some(tx) = progress {
        // A dropped receiver only means nobody is watching
        let _ = tx.send(stage).await;
    }
}

async fn hand_off(
    audio_path: &Path,
    filename: &str,
    handoff: Handoff,
) -> std::io::Result<(Artifact, u64)> {
    match handoff {
        Handoff::InMemory => {
            let bytes = tokio::fs::read(audio_path).await?;
            let size = bytes.len() as u64;
            Ok((Artifact::Bytes(bytes), size))
        }
        Handoff::CopyToDir(dir) => {
            let mut source = tokio::fs::File::open(audio_path).await?;
            tokio::fs::create_dir_all(&dir).await?;
            let (target, mut file) = create_unique(&dir, filename).await?;
            let copied = async {
                let n = tokio::io::copy(&mut source, &mut file).await?;
                file.flush().await?;
                Ok::<_, std::io::Error>(n)
            }
            .await;
            match copied {
                Ok(n) => {
                    debug!("Copied output to {}", target.display());
                    Ok((Artifact::File(target), n))
                }
                Err(e) => {
                    drop(file);
                    remove_if_exists(&target).await.ok();
                    Err(e)
                }
            }
        }
    }
}

/// Create `filename` in `dir` without clobbering, trying numbered variants
async fn create_unique(
    dir: &Path,
    filename: &str,
) -> std::io::Result<(PathBuf, tokio::fs::File)> {
    const MAX_ATTEMPTS: u32 = 1000;
    for attempt in 1..=MAX_ATTEMPTS {
        let candidate = candidate_path(dir, filename, attempt);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", filename, dir.display()),
    ))
}

//! Source downloaders: yt-dlp for sites, plain HTTP for direct media links

use crate::direct::DirectDownloader;
use crate::error::DownloadError;
use crate::format::ALLOWED_INPUT_EXTENSIONS;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Delay before retry `n` is `RETRY_BACKOFF * n`
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// A media file fetched into the request workspace
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub local_path: PathBuf,
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
    pub is_live: bool,
}

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch `url` into `output_dir`.
    ///
    /// `timeout` bounds each attempt; transient failures are retried up to
    /// `max_retries` more times. Live streams fail with
    /// [`DownloadError::LiveStreamUnsupported`] before any media is downloaded.
    async fn fetch(
        &self,
        url: &Url,
        output_dir: &Path,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<FetchedMedia, DownloadError>;
}

/// Run `attempt` until it succeeds, fails permanently, or retries run out
pub async fn with_retries<T, F, Fut>(max_retries: u32, mut attempt: F) -> Result<T, DownloadError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let mut n = 0;
    loop {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && n < max_retries => {
                n += 1;
                warn!("Attempt {} failed ({}), retrying", n, e);
                tokio::time::sleep(RETRY_BACKOFF * n).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether the URL path points straight at a media container
pub fn is_direct_media_url(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    path.rsplit_once('.')
        .map(|(_, ext)| ALLOWED_INPUT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Direct media links go over plain HTTP, everything else through yt-dlp
pub struct RoutingDownloader {
    direct: DirectDownloader,
    site: YtDlpDownloader,
}

impl RoutingDownloader {
    pub fn new(direct: DirectDownloader, site: YtDlpDownloader) -> Self {
        Self { direct, site }
    }
}

#[async_trait]
impl Downloader for RoutingDownloader {
    async fn fetch(
        &self,
        url: &Url,
        output_dir: &Path,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<FetchedMedia, DownloadError> {
        if is_direct_media_url(url) {
            debug!("Routing {} to direct HTTP download", url);
            self.direct.fetch(url, output_dir, timeout, max_retries).await
        } else {
            debug!("Routing {} to yt-dlp", url);
            self.site.fetch(url, output_dir, timeout, max_retries).await
        }
    }
}

/// Downloader backed by the yt-dlp executable
#[derive(Debug)]
pub struct YtDlpDownloader {
    yt_dlp_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub live_status: Option<String>,
}

impl VideoInfo {
    pub fn is_live(&self) -> bool {
        self.is_live.unwrap_or(false)
            || matches!(self.live_status.as_deref(), Some("is_live" | "is_upcoming"))
    }
}

impl YtDlpDownloader {
    pub fn new(yt_dlp_path: PathBuf) -> Self {
        Self { yt_dlp_path }
    }

    async fn probe(&self, url: &Url, timeout: Duration) -> Result<VideoInfo, DownloadError> {
        let socket_timeout = socket_timeout(timeout);
        let mut cmd = Command::new(&self.yt_dlp_path);
        cmd.args([
            "--dump-single-json",
            "--no-playlist",
            "--no-warnings",
            "--socket-timeout",
            socket_timeout.as_str(),
        ])
        .arg(url.as_str());

        let stdout = run_yt_dlp(cmd, timeout).await?;
        let info: VideoInfo = serde_json::from_str(stdout.trim())
            .map_err(|e| DownloadError::MetadataParse(e.to_string()))?;
        debug!(
            "Probed {}: {:?} ({:?})",
            info.id.as_deref().unwrap_or("?"),
            info.title,
            info.live_status
        );
        Ok(info)
    }

    async fn download(
        &self,
        url: &Url,
        output_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, DownloadError> {
        let socket_timeout = socket_timeout(timeout);
        let output_template = output_dir.join("source.%(ext)s");

        let mut cmd = Command::new(&self.yt_dlp_path);
        cmd.args([
            // Format selection: best audio, fall back to a progressive stream
            "-f",
            "bestaudio/best",
            "--no-playlist",
            "--no-progress",
            "--no-warnings",
            "--no-mtime",
            "--socket-timeout",
            socket_timeout.as_str(),
            // Print the final location instead of making us look for it
            "--print",
            "after_move:filepath",
            "-o",
        ])
        .arg(&output_template)
        .arg(url.as_str());

        let stdout = run_yt_dlp(cmd, timeout).await?;
        let path = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| {
                DownloadError::MetadataParse("yt-dlp did not report an output file".to_string())
            })?;
        debug!("yt-dlp wrote {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn fetch(
        &self,
        url: &Url,
        output_dir: &Path,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<FetchedMedia, DownloadError> {
        info!("Fetching metadata for: {}", url);
        let info = with_retries(max_retries, |_| self.probe(url, timeout)).await?;
        if info.is_live() {
            return Err(DownloadError::LiveStreamUnsupported);
        }

        info!(
            "Downloading: {}",
            info.title.as_deref().unwrap_or("(untitled)")
        );
        let local_path =
            with_retries(max_retries, |_| self.download(url, output_dir, timeout)).await?;

        Ok(FetchedMedia {
            local_path,
            title: info.title,
            duration_seconds: info.duration,
            is_live: false,
        })
    }
}

fn socket_timeout(timeout: Duration) -> String {
    timeout.as_secs().clamp(1, 30).to_string()
}

/// Run a yt-dlp invocation, killing it if it outlives `timeout`
async fn run_yt_dlp(mut cmd: Command, timeout: Duration) -> Result<String, DownloadError> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DownloadError::ToolNotFound("yt-dlp"),
        _ => DownloadError::Io(e),
    })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| DownloadError::Timeout(timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("yt-dlp stderr: {}", stderr);
        return Err(classify_yt_dlp_error(&stderr, output.status.code()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

static LIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(is a live stream|this live event|premieres in|live event will begin)")
        .expect("valid regex")
});

static AGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(confirm your age|age-restricted|inappropriate for some users)")
        .expect("valid regex")
});

static FORBIDDEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(private video|members-only|join this channel|HTTP Error 40[13]|not available in your country|sign in to)",
    )
    .expect("valid regex")
});

static UNAVAILABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(video unavailable|unsupported url|is not a valid url|HTTP Error 404|has been removed|does not exist)",
    )
    .expect("valid regex")
});

/// Map yt-dlp's stderr to a download error kind
pub fn classify_yt_dlp_error(stderr: &str, code: Option<i32>) -> DownloadError {
    let detail = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .unwrap_or_else(|| stderr.trim())
        .trim()
        .to_string();

    // Order matters: age gates also say "sign in to"
    if LIVE_PATTERN.is_match(stderr) {
        DownloadError::LiveStreamUnsupported
    } else if AGE_PATTERN.is_match(stderr) {
        DownloadError::AgeRestricted(detail)
    } else if FORBIDDEN_PATTERN.is_match(stderr) {
        DownloadError::Forbidden(detail)
    } else if UNAVAILABLE_PATTERN.is_match(stderr) {
        DownloadError::Unavailable(detail)
    } else if detail.is_empty() {
        DownloadError::Network(format!("yt-dlp failed with exit code: {:?}", code))
    } else {
        DownloadError::Network(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_classify_yt_dlp_errors() {
        assert!(matches!(
            classify_yt_dlp_error(
                "ERROR: [youtube] abc: Private video. Sign in if you've been granted access",
                Some(1)
            ),
            DownloadError::Forbidden(_)
        ));
        assert!(matches!(
            classify_yt_dlp_error("ERROR: [youtube] abc: Sign in to confirm your age.", Some(1)),
            DownloadError::AgeRestricted(_)
        ));
        assert!(matches!(
            classify_yt_dlp_error("ERROR: [youtube] abc: Video unavailable", Some(1)),
            DownloadError::Unavailable(_)
        ));
        assert!(matches!(
            classify_yt_dlp_error(
                "ERROR: [youtube] abc: This live event will begin in 3 hours.",
                Some(1)
            ),
            DownloadError::LiveStreamUnsupported
        ));
        let other = classify_yt_dlp_error("ERROR: Unable to download webpage: timed out", Some(1));
        assert!(other.is_transient());
    }

    #[test]
    fn test_video_info_live_detection() {
        let live: VideoInfo =
            serde_json::from_str(r#"{"id":"x","title":"Radio","is_live":true}"#).unwrap();
        assert!(live.is_live());

        let upcoming: VideoInfo =
            serde_json::from_str(r#"{"id":"x","live_status":"is_upcoming"}"#).unwrap();
        assert!(upcoming.is_live());

        let vod: VideoInfo = serde_json::from_str(
            r#"{"id":"x","title":"Talk","duration":212.0,"is_live":false,"live_status":"was_live"}"#,
        )
        .unwrap();
        assert!(!vod.is_live());
        assert_eq!(vod.duration, Some(212.0));
    }

    #[test]
    fn test_is_direct_media_url() {
        let direct = Url::parse("https://cdn.example.com/media/Clip.MP4?sig=1").unwrap();
        assert!(is_direct_media_url(&direct));
        let page = Url::parse("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert!(!is_direct_media_url(&page));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_retries_transient_errors() {
        let calls = &AtomicU32::new(0);
        let result = with_retries(2, |_| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(DownloadError::Network("reset".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_gives_up() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retries(2, |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DownloadError::Timeout(Duration::from_secs(1)))
        })
        .await;
        assert!(matches!(result, Err(DownloadError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_does_not_retry_permanent_errors() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retries(5, |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DownloadError::Forbidden("private".into()))
        })
        .await;
        assert!(matches!(result, Err(DownloadError::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Direct media link downloads over HTTP

use crate::downloader::{with_retries, Downloader, FetchedMedia};
use crate::error::DownloadError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

/// Streams a plain media URL (e.g. `https://host/video.mp4`) to disk
#[derive(Debug, Clone, Default)]
pub struct DirectDownloader {
    client: reqwest::Client,
}

impl DirectDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download_once(&self, url: &Url, target: &Path) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url));
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Network(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Downloader for DirectDownloader {
    async fn fetch(
        &self,
        url: &Url,
        output_dir: &Path,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<FetchedMedia, DownloadError> {
        info!("Downloading media from: {}", url);
        let target = output_dir.join(target_filename(url));
        let target_ref = &target;

        let written = with_retries(max_retries, |_| async move {
            tokio::time::timeout(timeout, self.download_once(url, target_ref))
                .await
                .map_err(|_| DownloadError::Timeout(timeout))?
        })
        .await?;
        debug!("Downloaded {} bytes to {}", written, target.display());

        Ok(FetchedMedia {
            local_path: target,
            title: title_from_url(url),
            duration_seconds: None,
            is_live: false,
        })
    }
}

fn classify_status(status: StatusCode, url: &Url) -> DownloadError {
    let detail = format!("{} returned {}", url, status);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DownloadError::Forbidden(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE => DownloadError::Unavailable(detail),
        _ => DownloadError::Network(detail),
    }
}

/// `source.<ext>` keeping the link's container extension for the extractor
fn target_filename(url: &Url) -> PathBuf {
    let ext = url
        .path()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    PathBuf::from(format!("source.{}", ext))
}

/// Last path segment without its extension, percent-decoded
fn title_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    let stem = match decoded.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => decoded,
    };
    (!stem.trim().is_empty()).then_some(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let url = Url::parse("https://example.com/a.mp4").unwrap();
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &url),
            DownloadError::Forbidden(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, &url),
            DownloadError::Unavailable(_)
        ));
        assert!(classify_status(StatusCode::BAD_GATEWAY, &url).is_transient());
    }

    #[test]
    fn test_target_filename_keeps_extension() {
        let url = Url::parse("https://cdn.example.com/v/Clip.MKV?token=abc").unwrap();
        assert_eq!(target_filename(&url), PathBuf::from("source.mkv"));
        let url = Url::parse("https://cdn.example.com/stream").unwrap();
        assert_eq!(target_filename(&url), PathBuf::from("source.bin"));
    }

    #[test]
    fn test_title_from_url() {
        let url = Url::parse("https://cdn.example.com/v/My%20Holiday.mp4").unwrap();
        assert_eq!(title_from_url(&url).as_deref(), Some("My Holiday"));
        let url = Url::parse("https://cdn.example.com/").unwrap();
        assert_eq!(title_from_url(&url), None);
    }
}

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use super::{cancel_on_ctrl_c, truncate};
use crate::args::ConvertOptions;
use audiograb_core::{
    Artifact, AudioFormat, CancellationToken, Config, ConversionError, ConversionRequest,
    ConversionResult, ErrorKind, Handoff, Pipeline,
};

/// How one URL of a batch ended
#[derive(Debug)]
enum Outcome {
    Done(ConversionResult),
    Failed(ConversionError),
    /// Never started, or interrupted by Ctrl-C
    Skipped,
}

pub async fn run(
    input: &Path,
    parallel: Option<usize>,
    fail_fast: bool,
    options: &ConvertOptions,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = Config::load(config_path)?;
    let pipeline = Arc::new(Pipeline::from_config(&config)?);

    let content = fs::read_to_string(input)
        .await
        .context("Failed to read input file")?;
    let urls = parse_url_list(&content);

    if urls.is_empty() {
        println!("No URLs found in input file");
        return Ok(());
    }

    let parallel = parallel.unwrap_or(config.batch.max_parallel).max(1);
    let stop_on_error = fail_fast || !config.batch.continue_on_error;
    let total_urls = urls.len();
    println!("Processing {} URLs with {} parallel workers\n", total_urls, parallel);

    let format = options
        .format
        .map(AudioFormat::from)
        .unwrap_or(config.output.default_format);
    let output_dir = options
        .output
        .clone()
        .unwrap_or_else(|| config.output.default_directory.clone());

    // Ctrl-C aborts everything, a failure under fail-fast only stops scheduling
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let stop = CancellationToken::new();

    let multi = MultiProgress::new();
    let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {msg}")?;

    let results: Vec<_> = stream::iter(urls.into_iter().enumerate())
        .map(|(idx, url)| {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            let stop = stop.clone();
            let handoff = Handoff::CopyToDir(output_dir.clone());
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(spinner_style.clone());
            let bitrate = options.bitrate;

            async move {
                let label = format!("[{}/{}]", idx + 1, total_urls);
                pb.set_message(format!("{} {}", label, truncate(&url, 50)));
                pb.enable_steady_tick(std::time::Duration::from_millis(100));

                let mut request = ConversionRequest::remote(url.clone(), format);
                if let Some(kbps) = bitrate {
                    request = request.with_bitrate(kbps);
                }
                let outcome =
                    convert_one(&pipeline, request, handoff, &cancel, &stop, stop_on_error).await;

                match &outcome {
                    Outcome::Done(done) => {
                        let name = match &done.artifact {
                            Artifact::File(path) => path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_else(|| done.filename.clone()),
                            Artifact::Bytes(_) => done.filename.clone(),
                        };
                        pb.finish_with_message(format!("{} Done: {}", label, name));
                    }
                    Outcome::Failed(e) => {
                        pb.finish_with_message(format!("{} Failed: {}", label, e.user_message()));
                    }
                    Outcome::Skipped => pb.finish_with_message(format!("{} Skipped", label)),
                }

                (url, outcome)
            }
        })
        .buffer_unordered(parallel)
        .collect()
        .await;

    let succeeded = results
        .iter()
        .filter(|(_, o)| matches!(o, Outcome::Done(_)))
        .count();
    let failed: Vec<_> = results
        .iter()
        .filter_map(|(url, o)| match o {
            Outcome::Failed(e) => Some((url, e)),
            _ => None,
        })
        .collect();
    let skipped = results.len() - succeeded - failed.len();

    println!("\n=== Batch Complete ===");
    println!("Succeeded: {}", succeeded);
    println!("Failed: {}", failed.len());
    if skipped > 0 {
        println!("Skipped: {}", skipped);
    }

    if !failed.is_empty() {
        println!("\nFailed URLs:");
        for (url, e) in &failed {
            println!("  {} - {}", url, e.user_message());
        }
        bail!("{} of {} conversions failed", failed.len(), total_urls);
    }

    Ok(())
}

/// Run one conversion unless scheduling has stopped.
///
/// With `stop_on_error`, a failure cancels `stop` so later URLs are skipped
/// while conversions already running finish normally.
async fn convert_one(
    pipeline: &Pipeline,
    request: ConversionRequest,
    handoff: Handoff,
    cancel: &CancellationToken,
    stop: &CancellationToken,
    stop_on_error: bool,
) -> Outcome {
    if stop.is_cancelled() {
        return Outcome::Skipped;
    }
    match pipeline.convert(request, handoff, cancel).await {
        Ok(done) => Outcome::Done(done),
        Err(e) if e.kind() == ErrorKind::Cancelled => Outcome::Skipped,
        Err(e) => {
            if stop_on_error && !stop.is_cancelled() {
                info!("Not starting further conversions after failure: {}", e);
                stop.cancel();
            }
            Outcome::Failed(e)
        }
    }
}

/// One URL per line; blank lines and `#` comments are skipped
fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audiograb_core::{
        DownloadError, Downloader, ExtractError, FetchedMedia, MediaExtractor, PipelineSettings,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use url::Url;

    /// Fails `/bad`, holds `/slow` until `gate` is cancelled, succeeds otherwise
    struct GatedDownloader {
        gate: CancellationToken,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Downloader for GatedDownloader {
        async fn fetch(
            &self,
            url: &Url,
            output_dir: &Path,
            _timeout: Duration,
            _max_retries: u32,
        ) -> Result<FetchedMedia, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match url.path() {
                "/bad" => return Err(DownloadError::Forbidden("Private video".into())),
                "/slow" => self.gate.cancelled().await,
                _ => {}
            }
            let path = output_dir.join("source.webm");
            std::fs::write(&path, vec![0u8; 4096])?;
            Ok(FetchedMedia {
                local_path: path,
                title: Some(url.path().trim_start_matches('/').to_string()),
                duration_seconds: None,
                is_live: false,
            })
        }
    }

    struct CopyExtractor;

    #[async_trait]
    impl MediaExtractor for CopyExtractor {
        async fn extract_audio(
            &self,
            _input: &Path,
            output_dir: &Path,
            format: AudioFormat,
            _bitrate_kbps: u32,
        ) -> Result<PathBuf, ExtractError> {
            let output = output_dir.join(format!("audio.{}", format.extension()));
            std::fs::write(&output, b"audio")?;
            Ok(output)
        }
    }

    fn gated_pipeline(root: &Path, gate: &CancellationToken) -> (Pipeline, Arc<GatedDownloader>) {
        let downloader = Arc::new(GatedDownloader {
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let settings = PipelineSettings {
            temp_root: root.to_path_buf(),
            max_retries: 0,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(downloader.clone(), Arc::new(CopyExtractor), settings);
        (pipeline, downloader)
    }

    fn request(path: &str) -> ConversionRequest {
        ConversionRequest::remote(format!("https://example.com{}", path), AudioFormat::Mp3)
    }

    #[tokio::test]
    async fn test_fail_fast_lets_running_conversions_finish() {
        let root = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();
        let (pipeline, downloader) = gated_pipeline(root.path(), &stop);

        let (slow, bad) = tokio::join!(
            convert_one(&pipeline, request("/slow"), Handoff::InMemory, &cancel, &stop, true),
            convert_one(&pipeline, request("/bad"), Handoff::InMemory, &cancel, &stop, true),
        );

        assert!(matches!(slow, Outcome::Done(ref done) if done.filename == "slow.mp3"));
        assert!(matches!(bad, Outcome::Failed(ref e) if e.kind() == ErrorKind::SourceForbidden));
        assert!(stop.is_cancelled());
        assert!(!cancel.is_cancelled());

        let later =
            convert_one(&pipeline, request("/next"), Handoff::InMemory, &cancel, &stop, true).await;
        assert!(matches!(later, Outcome::Skipped));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_scheduling_without_fail_fast() {
        let root = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();
        let (pipeline, _) = gated_pipeline(root.path(), &CancellationToken::new());

        let bad =
            convert_one(&pipeline, request("/bad"), Handoff::InMemory, &cancel, &stop, false).await;
        assert!(matches!(bad, Outcome::Failed(_)));
        assert!(!stop.is_cancelled());

        let next = convert_one(
            &pipeline,
            request("/next"),
            Handoff::InMemory,
            &cancel,
            &stop,
            false,
        )
        .await;
        assert!(matches!(next, Outcome::Done(_)));
    }

    #[tokio::test]
    async fn test_interrupted_conversions_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stop = CancellationToken::new();
        let (pipeline, downloader) = gated_pipeline(root.path(), &stop);

        let outcome =
            convert_one(&pipeline, request("/ok"), Handoff::InMemory, &cancel, &stop, true).await;
        assert!(matches!(outcome, Outcome::Skipped));
        assert!(!stop.is_cancelled());
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_url_list_skips_comments_and_blanks() {
        let content =
            "# favourites\nhttps://a.test/1\n\n   \n  https://b.test/2  \n#https://c.test/3\n";
        assert_eq!(
            parse_url_list(content),
            vec!["https://a.test/1".to_string(), "https://b.test/2".to_string()]
        );
    }
}

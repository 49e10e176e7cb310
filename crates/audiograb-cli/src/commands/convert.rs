use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{cancel_on_ctrl_c, truncate};
use crate::args::ConvertOptions;
use audiograb_core::{
    naming::format_duration, request::parse_remote_url, Artifact, AudioFormat, CancellationToken,
    Config, ConversionRequest, ConversionResult, Handoff, Pipeline, PipelineStage,
};

/// What the user asked to convert
#[derive(Debug)]
pub enum Input {
    Url(String),
    File(PathBuf),
    Prompt,
}

impl Input {
    pub fn from_args(url: Option<String>, file: Option<PathBuf>) -> Self {
        match (url, file) {
            (_, Some(path)) => Input::File(path),
            (Some(url), None) => Input::Url(url),
            (None, None) => Input::Prompt,
        }
    }
}

pub async fn run(input: Input, options: &ConvertOptions, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let pipeline = Pipeline::from_config(&config)?;

    let format = options
        .format
        .map(AudioFormat::from)
        .unwrap_or(config.output.default_format);
    let output_dir = options
        .output
        .clone()
        .unwrap_or_else(|| config.output.default_directory.clone());

    let request = match input {
        Input::Url(url) => ConversionRequest::remote(url, format),
        Input::Prompt => ConversionRequest::remote(prompt_for_url().await?, format),
        Input::File(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            ConversionRequest::upload(bytes, name, format)
        }
    };
    let request = match options.bitrate {
        Some(kbps) => request.with_bitrate(kbps),
        None => request,
    };

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let (tx, mut rx) = mpsc::channel(32);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.cyan} [{elapsed_precise}] {msg}",
    )?);
    pb.enable_steady_tick(Duration::from_millis(100));

    let progress_handle = tokio::spawn(async move {
        while let Some(stage) = rx.recv().await {
            match stage {
                PipelineStage::Validating => pb.set_message("Validating request..."),
                PipelineStage::Acquiring { source } => {
                    pb.set_message(format!("Fetching {}", truncate(&source, 50)))
                }
                PipelineStage::Acquired { title, .. } => {
                    if let Some(title) = title {
                        pb.println(format!("Title:    {}", title));
                    }
                }
                PipelineStage::Extracting { format } => {
                    pb.set_message(format!("Extracting {} audio...", format))
                }
                PipelineStage::Staging { filename } => {
                    pb.set_message(format!("Saving {}", truncate(&filename, 50)))
                }
                PipelineStage::Complete { elapsed, .. } => {
                    pb.finish_with_message(format!("Done ({:.1}s)", elapsed.as_secs_f32()))
                }
                PipelineStage::Failed { stage, error } => {
                    pb.abandon_with_message(format!("Failed at {}: {}", stage, error))
                }
            }
        }
    });

    let result = pipeline
        .convert_with_progress(request, Handoff::CopyToDir(output_dir), &cancel, tx)
        .await;

    // The sender was moved into the pipeline, so the handler ends once it returns
    progress_handle.await?;

    match result {
        Ok(done) => {
            print_summary(&done);
            Ok(())
        }
        Err(e) => {
            tracing::debug!("conversion error detail: {:?}", e);
            bail!("{}", e.user_message())
        }
    }
}

fn print_summary(done: &ConversionResult) {
    if let Some(seconds) = done.duration_seconds {
        println!("Duration: {}", format_duration(seconds));
    }
    if let Artifact::File(path) = &done.artifact {
        println!("Output:   {}", path.display());
    }
    println!("Size:     {}", format_size_mb(done.size_bytes));
}

/// Ask for a URL on stdin until a syntactically valid one is entered
async fn prompt_for_url() -> Result<String> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"Enter the video URL: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            bail!("No URL provided");
        };
        match check_prompt_input(&line) {
            Ok(url) => return Ok(url),
            Err(reason) => eprintln!("{}", reason),
        }
    }
}

fn check_prompt_input(line: &str) -> std::result::Result<String, String> {
    let line = line.trim();
    if line.is_empty() {
        return Err("Please enter a URL.".to_string());
    }
    parse_remote_url(line)
        .map(|_| line.to_string())
        .map_err(|e| e.user_message())
}

fn format_size_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_prefers_file() {
        assert!(matches!(
            Input::from_args(None, Some(PathBuf::from("a.mp4"))),
            Input::File(_)
        ));
        assert!(matches!(
            Input::from_args(Some("https://x.test/v".into()), None),
            Input::Url(_)
        ));
        assert!(matches!(Input::from_args(None, None), Input::Prompt));
    }

    #[test]
    fn test_prompt_input_validation() {
        assert!(check_prompt_input("   ").is_err());
        assert!(check_prompt_input("example.com/watch").is_err());
        assert_eq!(
            check_prompt_input("  https://example.com/watch?v=1 \n").unwrap(),
            "https://example.com/watch?v=1"
        );
    }

    #[test]
    fn test_format_size_mb() {
        assert_eq!(format_size_mb(0), "0.00 MB");
        assert_eq!(format_size_mb(5 * 1024 * 1024 + 512 * 1024), "5.50 MB");
    }
}

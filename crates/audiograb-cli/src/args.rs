use audiograb_core::AudioFormat;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "audiograb")]
#[command(author, version, about = "Extract the audio track from online videos and local files")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Video URL to convert (shorthand for `convert <URL>`)
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    /// Convert a local video file instead of a URL
    #[arg(long, value_name = "PATH", conflicts_with = "url")]
    pub file: Option<PathBuf>,

    #[command(flatten)]
    pub options: ConvertOptions,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert a single URL or local file (prompts for a URL when neither is given)
    Convert {
        /// Video URL
        url: Option<String>,

        /// Local video file
        #[arg(long, value_name = "PATH", conflicts_with = "url")]
        file: Option<PathBuf>,

        #[command(flatten)]
        options: ConvertOptions,
    },

    /// Convert every URL listed in a file
    Batch {
        /// File containing URLs (one per line, `#` starts a comment)
        #[arg(short, long)]
        input: PathBuf,

        /// Maximum parallel conversions (defaults to batch.max_parallel)
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Start no new conversions after the first failure (running ones finish)
        #[arg(long)]
        fail_fast: bool,

        #[command(flatten)]
        options: ConvertOptions,
    },

    /// Check that yt-dlp, ffmpeg and ffprobe are available
    Doctor,

    /// Show the effective configuration
    Config,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct ConvertOptions {
    /// Output format (defaults to output.default_format)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Bitrate in kbps for lossy formats
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(32..=320))]
    pub bitrate: Option<u32>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// MP3 - Lossy, widely compatible (default)
    Mp3,
    /// WAV - Uncompressed PCM
    Wav,
    /// M4A - AAC in an MP4 container
    M4a,
    /// AAC - Raw ADTS stream
    Aac,
    /// OGG - Vorbis
    Ogg,
}

impl From<OutputFormat> for AudioFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Mp3 => AudioFormat::Mp3,
            OutputFormat::Wav => AudioFormat::Wav,
            OutputFormat::M4a => AudioFormat::M4a,
            OutputFormat::Aac => AudioFormat::Aac,
            OutputFormat::Ogg => AudioFormat::Ogg,
        }
    }
}

//! Output audio formats and accepted input containers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Container extensions accepted for uploaded files
pub const ALLOWED_INPUT_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "mkv", "m4a"];

pub const DEFAULT_BITRATE_KBPS: u32 = 192;
pub const MIN_BITRATE_KBPS: u32 = 32;
pub const MAX_BITRATE_KBPS: u32 = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    M4a,
    Aac,
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 5] = [
        AudioFormat::Mp3,
        AudioFormat::Wav,
        AudioFormat::M4a,
        AudioFormat::Aac,
        AudioFormat::Ogg,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::M4a => "m4a",
            AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "ogg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Ogg => "audio/ogg",
        }
    }

    /// Whether the encoder honours a target bitrate
    pub fn is_lossy(&self) -> bool {
        !matches!(self, AudioFormat::Wav)
    }

    /// FFmpeg codec arguments for this format
    pub(crate) fn codec_args(&self, bitrate_kbps: u32) -> Vec<String> {
        let bitrate = format!("{}k", bitrate_kbps);
        match self {
            AudioFormat::Mp3 => vec!["-c:a".into(), "libmp3lame".into(), "-b:a".into(), bitrate],
            AudioFormat::Wav => vec!["-c:a".into(), "pcm_s16le".into()],
            AudioFormat::M4a => vec![
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                bitrate,
                "-movflags".into(),
                "+faststart".into(),
            ],
            // Raw ADTS stream
            AudioFormat::Aac => vec![
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                bitrate,
                "-f".into(),
                "adts".into(),
            ],
            AudioFormat::Ogg => vec!["-c:a".into(), "libvorbis".into(), "-b:a".into(), bitrate],
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Mp3 => write!(f, "MP3"),
            AudioFormat::Wav => write!(f, "WAV"),
            AudioFormat::M4a => write!(f, "M4A"),
            AudioFormat::Aac => write!(f, "AAC"),
            AudioFormat::Ogg => write!(f, "Ogg Vorbis"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedFormat(pub String);

impl fmt::Display for UnsupportedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported output format '{}' (expected one of mp3, wav, m4a, aac, ogg)",
            self.0
        )
    }
}

impl std::error::Error for UnsupportedFormat {}

impl FromStr for AudioFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            "m4a" => Ok(AudioFormat::M4a),
            "aac" => Ok(AudioFormat::Aac),
            "ogg" => Ok(AudioFormat::Ogg),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}

/// Lowercased extension of `filename` if it is an accepted input container
pub fn input_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    ALLOWED_INPUT_EXTENSIONS
        .contains(&ext.as_str())
        .then_some(ext)
}

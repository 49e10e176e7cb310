//! Output filename derivation

use crate::format::AudioFormat;

const FALLBACK_NAME: &str = "audio";
/// Leaves room for " (NNN).ext" under the usual 255-byte name limit
const MAX_STEM_BYTES: usize = 200;

/// Sanitize filename for filesystem
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();
    // Leading dots would produce hidden files, trailing dots are invalid on Windows
    let trimmed = cleaned.trim().trim_matches('.').trim();
    truncate_bytes(trimmed, MAX_STEM_BYTES)
        .trim_end()
        .trim_end_matches('.')
        .to_string()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `<sanitized base>.<format extension>`, falling back to "audio" when nothing usable is left
pub fn output_filename(base: Option<&str>, format: AudioFormat) -> String {
    let stem = base
        .map(sanitize_filename)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    format!("{}.{}", stem, format.extension())
}

/// Original upload name without its extension
pub fn upload_stem(original_filename: &str) -> &str {
    // Browsers on Windows may send full client paths
    let name = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_filename);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Format seconds as `m:ss` (or `h:mm:ss` past an hour)
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Normal Title"), "Normal Title");
        assert_eq!(sanitize_filename("Title/With:Special*Chars"), "Title_With_Special_Chars");
        assert_eq!(sanitize_filename("  Spaces  "), "Spaces");
        assert_eq!(sanitize_filename("..hidden."), "hidden");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(output_filename(Some("My Video"), AudioFormat::Mp3), "My Video.mp3");
        assert_eq!(output_filename(Some("..."), AudioFormat::Wav), "audio.wav");
        assert_eq!(output_filename(None, AudioFormat::Ogg), "audio.ogg");
    }

    #[test]
    fn test_output_filename_truncates_long_titles() {
        let title = "x".repeat(400);
        let name = output_filename(Some(&title), AudioFormat::Aac);
        assert_eq!(name.len(), MAX_STEM_BYTES + ".aac".len());
    }

    #[test]
    fn test_multibyte_titles_are_cut_by_bytes() {
        // Three bytes per character
        let title = "あ".repeat(100);
        let stem = sanitize_filename(&title);
        assert!(stem.len() <= MAX_STEM_BYTES);
        assert_eq!(stem, "あ".repeat(MAX_STEM_BYTES / 3));

        let name = output_filename(Some(&title), AudioFormat::Mp3);
        assert!(name.len() + " (999)".len() <= 255);
    }

    #[test]
    fn test_truncate_bytes_respects_char_boundaries() {
        assert_eq!(truncate_bytes("héllo", 2), "h");
        assert_eq!(truncate_bytes("héllo", 3), "hé");
        assert_eq!(truncate_bytes("abc", 10), "abc");
    }

    #[test]
    fn test_upload_stem() {
        assert_eq!(upload_stem("clip.mp4"), "clip");
        assert_eq!(upload_stem("my.holiday.mkv"), "my.holiday");
        assert_eq!(upload_stem("C:\\Users\\me\\clip.avi"), "clip");
        assert_eq!(upload_stem(".mp4"), ".mp4");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(213.4), "3:33");
        assert_eq!(format_duration(3725.0), "1:02:05");
    }
}

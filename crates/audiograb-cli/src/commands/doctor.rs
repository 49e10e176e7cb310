use anyhow::{bail, Result};
use audiograb_core::{error::ConfigError, Config};
use std::path::{Path, PathBuf};
use std::process::Command;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    println!("audiograb dependency check\n");

    let mut all_ok = true;

    all_ok &= check_tool(
        "yt-dlp",
        config.yt_dlp_path(),
        "--version",
        |out| out.trim().to_string(),
        "Install with: pip install yt-dlp (or brew install yt-dlp)",
    );
    all_ok &= check_tool(
        "ffmpeg",
        config.ffmpeg_path(),
        "-version",
        ffmpeg_version,
        "Install with: brew install ffmpeg (or apt install ffmpeg)",
    );
    all_ok &= check_tool(
        "ffprobe",
        config.ffprobe_path(),
        "-version",
        ffmpeg_version,
        "ffprobe ships with ffmpeg",
    );

    print!("temp dir:      ");
    let temp = config.temp_dir();
    let writable = std::fs::create_dir_all(&temp)
        .and_then(|_| tempfile::Builder::new().prefix("audiograb-doctor-").tempdir_in(&temp));
    match writable {
        Ok(_) => println!("OK ({})", temp.display()),
        Err(e) => {
            println!("NOT WRITABLE ({}: {})", temp.display(), e);
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("All dependencies OK!");
        Ok(())
    } else {
        println!("Some dependencies are missing. See above for installation instructions.");
        bail!("dependency check failed")
    }
}

fn check_tool(
    name: &str,
    resolved: Result<PathBuf, ConfigError>,
    version_arg: &str,
    parse_version: fn(&str) -> String,
    hint: &str,
) -> bool {
    print!("{:<15}", format!("{}:", name));
    let path = match resolved {
        Ok(path) => path,
        Err(_) => {
            println!("NOT FOUND");
            println!("               {}", hint);
            return false;
        }
    };

    match Command::new(&path).arg(version_arg).output() {
        Ok(out) if out.status.success() => {
            let version = parse_version(&String::from_utf8_lossy(&out.stdout));
            println!("OK ({}, {})", version, path.display());
            true
        }
        _ => {
            println!("FOUND but failed to get version ({})", path.display());
            false
        }
    }
}

/// `ffmpeg version 6.1.1 Copyright ...` -> `6.1.1`
fn ffmpeg_version(output: &str) -> String {
    output
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(2))
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_version() {
        assert_eq!(
            ffmpeg_version("ffmpeg version 6.1.1 Copyright (c) 2000-2023\nbuilt with gcc"),
            "6.1.1"
        );
        assert_eq!(
            ffmpeg_version("ffprobe version n7.0 Copyright (c) 2007-2024"),
            "n7.0"
        );
        assert_eq!(ffmpeg_version(""), "unknown");
    }

    #[test]
    fn test_missing_tool_fails_check() {
        let missing = Err(ConfigError::InvalidValue("yt-dlp not found".into()));
        assert!(!check_tool("yt-dlp", missing, "--version", ffmpeg_version, "hint"));
    }
}

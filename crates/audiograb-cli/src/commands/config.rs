use anyhow::Result;
use audiograb_core::Config;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;

    println!("# audiograb configuration (effective)\n");
    print!("{}", toml::to_string_pretty(&config)?);

    println!("\n# Resolved tools");
    for (name, resolved) in [
        ("yt-dlp", config.yt_dlp_path()),
        ("ffmpeg", config.ffmpeg_path()),
        ("ffprobe", config.ffprobe_path()),
    ] {
        match resolved {
            Ok(path) => println!("#   {:<8} {}", name, path.display()),
            Err(_) => println!("#   {:<8} (not found)", name),
        }
    }
    println!("#   temp     {}", config.temp_dir().display());

    // Show config file locations
    println!("\n# Config sources (later entries win):");
    if let Some(p) = Config::default_config_path() {
        println!("#   1. {}", p.display());
    }
    if let Some(p) = config_path {
        println!("#   2. {} (specified)", p.display());
    }
    println!("#   3. Environment variables (AUDIOGRAB_*, nested keys joined with __)");

    Ok(())
}

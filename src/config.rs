use std::path::PathBuf;

use once_cell::sync::Lazy;
use tracing::info;

pub const PREVIEW_BITRATE_KBPS: u32 = 128;
pub const DOWNLOAD_BITRATE_KBPS: u32 = 192;

const COOKIES_FILE: &str = "cookies.txt";
const SCRATCH_DIR: &str = "temp";

// resolved once at startup; the pipeline treats it as read-only.
// re-probing ffmpeg per request would reintroduce a startup race.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

pub struct Config {
  pub port: u16,
  pub ffmpeg_path: String,
  pub transcoder_available: bool,
  pub force_fallback: bool,
  pub scratch_dir: PathBuf,
  pub cookies_file: Option<PathBuf>,
}

impl Config {
  fn from_env() -> Self {
    let port = std::env::var("PORT")
      .ok()
      .and_then(|s| s.parse().ok())
      .unwrap_or(5000);

    let ffmpeg_path =
      std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string());

    let transcoder_available = match std::env::var("FFMPEG_AVAILABLE") {
      Ok(v) => flag(&v),
      Err(_) => probe_ffmpeg(&ffmpeg_path),
    };

    if transcoder_available {
      info!("ffmpeg is available");
    } else {
      info!("ffmpeg not found, will use yt-dlp for audio extraction");
    }

    // some deployment platforms block the direct extractor outright
    let force_fallback = env_flag("USE_YTDLP_ONLY") || env_flag("RENDER");

    let cookies_file = Some(PathBuf::from(COOKIES_FILE)).filter(|p| p.exists());
    if cookies_file.is_some() {
      info!("using {COOKIES_FILE} for yt-dlp authentication");
    }

    Self {
      port,
      ffmpeg_path,
      transcoder_available,
      force_fallback,
      scratch_dir: PathBuf::from(SCRATCH_DIR),
      cookies_file,
    }
  }
}

fn probe_ffmpeg(path: &str) -> bool {
  std::process::Command::new(path)
    .arg("-version")
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::null())
    .status()
    .map(|status| status.success())
    .unwrap_or(false)
}

fn env_flag(name: &str) -> bool {
  std::env::var(name).map(|v| flag(&v)).unwrap_or(false)
}

fn flag(value: &str) -> bool {
  matches!(value.trim(), "true" | "1" | "yes")
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_flag_parsing() {
    assert!(flag("true"));
    assert!(flag("1"));
    assert!(flag(" yes "));
    assert!(!flag("false"));
    assert!(!flag("0"));
    assert!(!flag(""));
  }
}

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::{Error, Result, YTDLP_MUTEX};

// the fallback extractor: run the yt-dlp command line to fetch and
// transcode audio in one shot, writing straight to the destination path.
// survives upstream blocking that the in-process extractor cannot.
// requires yt-dlp executable to be in PATH.

pub struct ExtractOptions<'a> {
  pub bitrate_kbps: u32,
  pub ffmpeg_path: &'a str,
  pub cookies_file: Option<&'a Path>,
}

/// Atomic from the caller's perspective: either `dest` holds a usable MP3
/// afterwards or this returns `FallbackExtraction`.
pub async fn extract_to_file(
  url: &str,
  dest: &Path,
  opts: &ExtractOptions<'_>,
) -> Result<()> {
  info!("falling back to yt-dlp for {url}");

  let mut cmd = Command::new("yt-dlp");
  cmd
    .arg("-x")
    .arg("--audio-format")
    .arg("mp3")
    .arg("--audio-quality")
    .arg(format!("{}K", opts.bitrate_kbps))
    .arg("-f")
    .arg("bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio")
    .arg("--no-playlist")
    .arg("--no-progress")
    .arg("--no-warnings")
    // the scratch path is reserved (created empty) at allocation; without
    // this flag yt-dlp would treat it as already downloaded and skip
    .arg("--force-overwrites")
    .arg("--prefer-free-formats")
    .arg("--no-check-certificates")
    .arg("--retries")
    .arg("3")
    .arg("--fragment-retries")
    .arg("3")
    .arg("--ffmpeg-location")
    .arg(opts.ffmpeg_path)
    .arg("-o")
    .arg(dest)
    .arg(url);

  if let Some(cookies) = opts.cookies_file {
    info!("using saved cookies for yt-dlp");
    cmd.arg("--cookies").arg(cookies);
  }

  let guard = YTDLP_MUTEX.acquire().await.unwrap();
  let child = cmd
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::piped())
    .spawn()
    .map_err(|e| Error::FallbackExtraction(e.to_string()))?;
  let output = child
    .wait_with_output()
    .await
    .map_err(|e| Error::FallbackExtraction(e.to_string()))?;
  drop(guard);

  detect_error(&output.stderr)?;
  if !output.status.success() {
    return Err(Error::FallbackExtraction(format!(
      "yt-dlp exited with {}",
      output.status
    )));
  }

  Ok(())
}

fn detect_error(stderr: &[u8]) -> Result<()> {
  let s = String::from_utf8_lossy(stderr);
  if s.contains("ERROR:") {
    Err(Error::FallbackExtraction(s.trim().to_string()))
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_detect_error() {
    assert!(detect_error(b"").is_ok());
    assert!(detect_error(b"[download] 100%").is_ok());

    let err = detect_error(b"ERROR: Sign in to confirm you're not a bot");
    match err {
      Err(Error::FallbackExtraction(msg)) => {
        assert!(msg.contains("Sign in"))
      }
      other => panic!("expected FallbackExtraction, got {other:?}"),
    }
  }
}

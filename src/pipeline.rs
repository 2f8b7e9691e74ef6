use std::{
  future::Future, path::Path, sync::atomic::Ordering, time::Duration,
};

use bytes::Bytes;
use chrono::Utc;
use futures::{stream::BoxStream, StreamExt};
use tracing::{info, warn};

use crate::{
  extractor::{rustube, ytdlp, QualityHint},
  scratch::{self, ScratchFile},
  transcode,
  util::slug,
  Config, Error, Result, CONFIG,
};

// the acquisition pipeline: per-request orchestration of the extractor
// adapters and the transcoding stage. Strict step order within a request:
// validate -> attempt primary -> maybe fallback -> verify -> hand the
// artifact to the caller. The only time-bounded step is the primary
// startup race below.

/// How long the primary attempt may go without a single upstream byte
/// before it is written off as failed-to-start.
pub const PRIMARY_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Which extractor a request leads with. Selected once per request and
/// carried through the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  Primary,
  Fallback,
}

pub fn choose_strategy(config: &Config) -> Strategy {
  if !config.transcoder_available || config.force_fallback {
    Strategy::Fallback
  } else {
    Strategy::Primary
  }
}

/// Terminal outcome of one primary extraction attempt.
#[derive(Debug)]
enum PrimaryFailure {
  FailedToStart(String),
  FailedMidStream(String),
}

impl std::fmt::Display for PrimaryFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PrimaryFailure::FailedToStart(msg) => {
        write!(f, "failed to start: {msg}")
      }
      PrimaryFailure::FailedMidStream(msg) => {
        write!(f, "failed mid-stream: {msg}")
      }
    }
  }
}

pub struct Acquisition {
  pub file: ScratchFile,
  pub filename: String,
}

/// Download mode: materialize one MP3 artifact for `url`. On success the
/// returned `ScratchFile` holds the bytes; it deletes itself when dropped,
/// so every exit path from here on cleans up exactly once.
pub async fn acquire(
  url: String,
  requested_title: Option<String>,
) -> Result<Acquisition> {
  if !rustube::validate(&url) {
    return Err(Error::InvalidUrl);
  }

  let config = &*CONFIG;
  let strategy = choose_strategy(config);
  info!("downloading {url} (leading with {strategy:?})");

  let title = resolve_title(&url, requested_title).await;
  let stem = slug(&title);
  let file = scratch::allocate(&stem)?;

  run_extraction(
    strategy,
    || {
      let input =
        rustube::audio_stream(url.clone(), QualityHint::Highest);
      primary_attempt(config, input, file.path(), PRIMARY_START_TIMEOUT)
    },
    || async {
      let opts = ytdlp::ExtractOptions {
        bitrate_kbps: crate::config::DOWNLOAD_BITRATE_KBPS,
        ffmpeg_path: &config.ffmpeg_path,
        cookies_file: config.cookies_file.as_deref(),
      };
      ytdlp::extract_to_file(&url, file.path(), &opts).await
    },
  )
  .await?;

  // either attempt may "succeed" without producing usable output
  match tokio::fs::metadata(file.path()).await {
    Ok(meta) if meta.len() > 0 => {
      info!("artifact ready: {} ({} bytes)", file.path().display(), meta.len())
    }
    _ => return Err(Error::EmptyArtifact),
  }

  Ok(Acquisition {
    file,
    filename: format!("{stem}.mp3"),
  })
}

/// Metadata failure alone does not abort the request: synthesize a title
/// and let the stream attempt (or the fallback) decide.
async fn resolve_title(url: &str, requested: Option<String>) -> String {
  if let Some(title) = requested.filter(|t| !t.trim().is_empty()) {
    return title;
  }

  match rustube::video_title(url).await {
    Ok(title) => title,
    Err(e) => {
      warn!("metadata retrieval failed for {url}: {e}");
      format!("video_{}", Utc::now().timestamp_millis())
    }
  }
}

/// The handoff policy: lead with the primary attempt only when the chosen
/// strategy says so, and run the fallback at most once, only after the
/// primary has failed (or was skipped).
async fn run_extraction<P, PFut, F, FFut>(
  strategy: Strategy,
  primary: P,
  fallback: F,
) -> Result<()>
where
  P: FnOnce() -> PFut,
  PFut: Future<Output = std::result::Result<(), PrimaryFailure>>,
  F: FnOnce() -> FFut,
  FFut: Future<Output = Result<()>>,
{
  if strategy == Strategy::Primary {
    match primary().await {
      Ok(()) => return Ok(()),
      Err(failure) => {
        warn!("primary extraction failed ({failure}), using fallback");
      }
    }
  }
  fallback().await
}

/// One primary attempt: transcode the extractor stream into `dest` and
/// race completion against the startup deadline. The race is two-way:
/// whichever side settles first wins, and the loser is dropped (which
/// kills the child and releases the upstream stream).
async fn primary_attempt(
  config: &Config,
  input: BoxStream<'static, Result<Bytes>>,
  dest: &Path,
  startup_timeout: Duration,
) -> std::result::Result<(), PrimaryFailure> {
  let mut job = transcode::to_file(
    config,
    input,
    crate::config::DOWNLOAD_BITRATE_KBPS,
    dest,
  )
  .map_err(|e| PrimaryFailure::FailedToStart(e.to_string()))?;

  let bytes_in = job.bytes_counter();
  let done = job.finish();
  tokio::pin!(done);

  let result = tokio::select! {
    res = &mut done => res,
    _ = tokio::time::sleep(startup_timeout) => {
      if bytes_in.load(Ordering::Relaxed) == 0 {
        // do not wait indefinitely for a stream that will never arrive
        return Err(PrimaryFailure::FailedToStart(format!(
          "no audio bytes within {}ms",
          startup_timeout.as_millis()
        )));
      }
      // the stream did start; see it through to the end
      done.await
    }
  };

  result.map_err(|e| PrimaryFailure::FailedMidStream(e.to_string()))
}

/// Preview mode: no scratch file, bytes go straight to the caller at the
/// preview bitrate. The first transcoder chunk is awaited here so failures
/// before any output surface as a proper error response; once bytes flow,
/// a later error can only close the connection.
pub async fn preview(url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
  if !rustube::validate(url) {
    return Err(Error::InvalidUrl);
  }

  info!("streaming preview: {url}");
  let input = rustube::audio_stream(url.to_string(), QualityHint::Lowest);
  let mut out = transcode::stream(
    &CONFIG,
    input,
    crate::config::PREVIEW_BITRATE_KBPS,
  )?;

  match out.next().await {
    Some(Ok(first)) => {
      Ok(futures::stream::iter([Ok(first)]).chain(out).boxed())
    }
    Some(Err(e)) => Err(e),
    None => Err(Error::Transcode("transcoder produced no output".into())),
  }
}

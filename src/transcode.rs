use std::{
  path::Path,
  pin::Pin,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
  task::{Context, Poll},
};

use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt};
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  process::{Child, ChildStdin, Command},
  sync::oneshot,
  task::JoinHandle,
};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::{Config, Error, Result};

// the transcoding stage: an ffmpeg child process fed from an upstream byte
// stream over stdin, producing constant-bitrate MP3 on stdout or straight
// into a file. Killable mid-flight: the child is spawned with kill_on_drop
// and the stdin pump task is aborted when the stage is dropped.

fn mp3_args(bitrate_kbps: u32) -> Vec<String> {
  let mut args: Vec<String> = [
    "-hide_banner",
    "-loglevel",
    "error",
    "-i",
    "pipe:0",
    "-vn",
    "-acodec",
    "libmp3lame",
    "-b:a",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect();
  args.push(format!("{bitrate_kbps}k"));
  // malformed source timestamps would otherwise corrupt the mp3 header
  args.extend(
    ["-avoid_negative_ts", "make_zero", "-f", "mp3"]
      .iter()
      .map(|s| s.to_string()),
  );
  args
}

async fn pump_stdin(
  mut input: BoxStream<'static, Result<Bytes>>,
  mut stdin: ChildStdin,
  bytes_in: Arc<AtomicU64>,
) -> Result<()> {
  while let Some(chunk) = input.next().await {
    let chunk = chunk?;
    bytes_in.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    if stdin.write_all(&chunk).await.is_err() {
      // transcoder went away; its exit status tells the story
      break;
    }
  }
  stdin.shutdown().await.ok();
  Ok(())
}

/// Transcode `input` to MP3 and expose the result as a byte stream.
/// Transcoder errors are merged into the stream as error items. Dropping
/// the stream kills the child and drops the upstream stream.
pub fn stream(
  config: &Config,
  input: BoxStream<'static, Result<Bytes>>,
  bitrate_kbps: u32,
) -> Result<TranscodeStream> {
  let mut child = Command::new(&config.ffmpeg_path)
    .args(mp3_args(bitrate_kbps))
    .arg("pipe:1")
    .stdin(std::process::Stdio::piped())
    .stdout(std::process::Stdio::piped())
    .stderr(std::process::Stdio::piped())
    .kill_on_drop(true)
    .spawn()
    .map_err(|e| Error::Transcode(e.to_string()))?;

  let stdin = child.stdin.take().expect("stdin not opened");
  let stdout = child.stdout.take().expect("stdout not opened");
  let stderr = child.stderr.take().expect("stderr not opened");

  // hand the upstream extractor's own error to the caller; ffmpeg's
  // stderr alone would only say that its input went away
  let (err_tx, err_rx) = oneshot::channel::<Error>();
  let pump = tokio::spawn(async move {
    if let Err(e) = pump_stdin(input, stdin, Arc::default()).await {
      warn!("preview input stream failed: {e}");
      let _ = err_tx.send(e);
    }
  });

  let stdout_stream = ReaderStream::new(stdout)
    .map(|res| res.map_err(|e| Error::Transcode(e.to_string())));
  let stderr_stream = ReaderStream::new(stderr)
    .map(|res| res.map_err(|e| Error::Transcode(e.to_string())))
    .map(|res| res.and_then(stderr_chunk));
  let pump_err_stream = futures::stream::once(err_rx)
    .filter_map(|res| async move { res.ok().map(Err) });
  let inner = futures::stream::select(
    stdout_stream,
    futures::stream::select(stderr_stream, pump_err_stream),
  )
  .boxed();

  Ok(TranscodeStream {
    _child: child,
    pump,
    inner,
  })
}

// ffmpeg runs at -loglevel error, so anything on stderr is fatal
fn stderr_chunk(bytes: Bytes) -> Result<Bytes> {
  let s = String::from_utf8_lossy(&bytes);
  if s.trim().is_empty() {
    Ok(Bytes::new())
  } else {
    Err(Error::Transcode(s.trim().to_string()))
  }
}

pub struct TranscodeStream {
  _child: Child,
  pump: JoinHandle<()>,
  inner: BoxStream<'static, Result<Bytes>>,
}

impl Stream for TranscodeStream {
  type Item = Result<Bytes>;

  fn poll_next(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    self.get_mut().inner.as_mut().poll_next(cx)
  }
}

impl Drop for TranscodeStream {
  fn drop(&mut self) {
    self.pump.abort();
  }
}

/// Transcode `input` into `dest`. The caller observes progress through
/// `bytes_counter` and completion through `finish`; dropping the stage
/// before completion kills the child and aborts the pump.
pub fn to_file(
  config: &Config,
  input: BoxStream<'static, Result<Bytes>>,
  bitrate_kbps: u32,
  dest: &Path,
) -> Result<FileTranscode> {
  let mut child = Command::new(&config.ffmpeg_path)
    .args(mp3_args(bitrate_kbps))
    .arg("-y")
    .arg(dest)
    .stdin(std::process::Stdio::piped())
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::piped())
    .kill_on_drop(true)
    .spawn()
    .map_err(|e| Error::Transcode(e.to_string()))?;

  let stdin = child.stdin.take().expect("stdin not opened");
  let stderr = child.stderr.take().expect("stderr not opened");

  let bytes_in = Arc::new(AtomicU64::new(0));
  let pump = tokio::spawn(pump_stdin(input, stdin, bytes_in.clone()));

  Ok(FileTranscode {
    child,
    stderr: Some(stderr),
    pump,
    bytes_in,
  })
}

pub struct FileTranscode {
  child: Child,
  stderr: Option<tokio::process::ChildStderr>,
  pump: JoinHandle<Result<()>>,
  bytes_in: Arc<AtomicU64>,
}

impl FileTranscode {
  /// Bytes accepted from the upstream stream so far. Shared with the
  /// startup-timeout race in the pipeline.
  pub fn bytes_counter(&self) -> Arc<AtomicU64> {
    self.bytes_in.clone()
  }

  /// Single completion signal: resolves once the child has exited and the
  /// pump has settled. An upstream stream error fails the transcode even
  /// when ffmpeg flushed a partial file and exited cleanly.
  pub async fn finish(&mut self) -> Result<()> {
    let mut stderr_buf = Vec::new();
    if let Some(mut stderr) = self.stderr.take() {
      stderr.read_to_end(&mut stderr_buf).await.ok();
    }

    let status = self
      .child
      .wait()
      .await
      .map_err(|e| Error::Transcode(e.to_string()))?;
    let pump_result = (&mut self.pump)
      .await
      .map_err(|e| Error::Internal(e.to_string()))?;

    if !status.success() {
      let msg = String::from_utf8_lossy(&stderr_buf);
      return Err(Error::Transcode(format!(
        "ffmpeg exited with {status}: {}",
        msg.trim()
      )));
    }

    pump_result
  }
}

impl Drop for FileTranscode {
  fn drop(&mut self) {
    self.pump.abort();
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::path::PathBuf;

  // a transcoder-shaped executable that ignores its arguments and pipes
  // stdin to stdout, so tests do not depend on ffmpeg being installed
  fn stand_in_transcoder(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("transcoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
  }

  fn test_config(ffmpeg_path: String) -> Config {
    Config {
      port: 0,
      ffmpeg_path,
      transcoder_available: true,
      force_fallback: false,
      scratch_dir: PathBuf::from("temp"),
      cookies_file: None,
    }
  }

  #[tokio::test]
  async fn test_stream_surfaces_upstream_error() {
    let dir = tempfile::tempdir().unwrap();
    let transcoder = stand_in_transcoder(dir.path(), "exec cat -");
    let config =
      test_config(transcoder.to_str().unwrap().to_string());

    let input = futures::stream::iter([
      Ok(Bytes::from_static(b"data")),
      Err(Error::AudioStream("connection reset by peer".into())),
    ])
    .boxed();

    let mut out = stream(&config, input, 128).unwrap();

    let mut passed_through = Vec::new();
    let mut upstream_error = None;
    while let Some(item) = out.next().await {
      match item {
        Ok(chunk) => passed_through.extend_from_slice(&chunk),
        Err(e) => upstream_error = Some(e),
      }
    }

    assert_eq!(passed_through, b"data");
    match upstream_error {
      Some(Error::AudioStream(msg)) => {
        assert!(msg.contains("connection reset"))
      }
      other => panic!("expected the extractor's error, got {other:?}"),
    }
  }

  #[test]
  fn test_mp3_args_carry_bitrate() {
    let args = mp3_args(192);
    assert!(args.contains(&"-b:a".to_string()));
    assert!(args.contains(&"192k".to_string()));
    assert!(args.contains(&"libmp3lame".to_string()));
  }

  #[test]
  fn test_mp3_args_normalize_timestamps() {
    let args = mp3_args(128);
    let pos = args
      .iter()
      .position(|a| a == "-avoid_negative_ts")
      .expect("flag missing");
    assert_eq!(args[pos + 1], "make_zero");
  }

  #[test]
  fn test_mp3_args_read_from_stdin() {
    let args = mp3_args(128);
    let pos = args.iter().position(|a| a == "-i").unwrap();
    assert_eq!(args[pos + 1], "pipe:0");
  }

  #[test]
  fn test_stderr_chunk() {
    assert!(stderr_chunk(Bytes::from_static(b"  \n")).is_ok());
    assert!(stderr_chunk(Bytes::new()).is_ok());
    let err = stderr_chunk(Bytes::from_static(b"pipe:0: Invalid data"));
    assert!(matches!(err, Err(Error::Transcode(_))));
  }

  #[tokio::test]
  async fn test_pump_counts_bytes() {
    // pump into a transcoder-shaped sink: a child `cat` stands in so the
    // test does not depend on ffmpeg being installed
    let mut child = Command::new("cat")
      .stdin(std::process::Stdio::piped())
      .stdout(std::process::Stdio::null())
      .kill_on_drop(true)
      .spawn()
      .unwrap();
    let stdin = child.stdin.take().unwrap();

    let input = futures::stream::iter([
      Ok(Bytes::from_static(b"hello")),
      Ok(Bytes::from_static(b" world")),
    ])
    .boxed();

    let counter = Arc::new(AtomicU64::new(0));
    pump_stdin(input, stdin, counter.clone()).await.unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 11);
    child.wait().await.unwrap();
  }

  #[tokio::test]
  async fn test_pump_surfaces_stream_error() {
    let mut child = Command::new("cat")
      .stdin(std::process::Stdio::piped())
      .stdout(std::process::Stdio::null())
      .kill_on_drop(true)
      .spawn()
      .unwrap();
    let stdin = child.stdin.take().unwrap();

    let input = futures::stream::iter([
      Ok(Bytes::from_static(b"partial")),
      Err(Error::AudioStream("connection reset".into())),
    ])
    .boxed();

    let counter = Arc::new(AtomicU64::new(0));
    let res = pump_stdin(input, stdin, counter.clone()).await;
    assert!(matches!(res, Err(Error::AudioStream(_))));
    assert_eq!(counter.load(Ordering::Relaxed), 7);
    let _ = child.kill().await;
  }
}

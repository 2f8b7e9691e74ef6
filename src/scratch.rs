use std::{
  path::{Path, PathBuf},
  pin::Pin,
  task::{Context, Poll},
};

use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::{Result, CONFIG};

/// Create the process-local scratch directory. Called once at startup.
pub fn init() -> Result<()> {
  std::fs::create_dir_all(&CONFIG.scratch_dir)?;
  Ok(())
}

/// Allocate a scratch path for one download request. The name embeds a
/// millisecond timestamp so concurrent requests for the same title do not
/// normally share a path; an actual collision surfaces as an ordinary fs
/// error from the reservation below.
pub fn allocate(stem: &str) -> Result<ScratchFile> {
  let name = format!("{}_{}.mp3", stem, Utc::now().timestamp_millis());
  Ok(reserve(CONFIG.scratch_dir.join(name))?)
}

// reserve the path exclusively: two requests landing on the same name must
// fail the loser instead of letting it clobber the winner's artifact
fn reserve(path: PathBuf) -> std::io::Result<ScratchFile> {
  std::fs::OpenOptions::new()
    .write(true)
    .create_new(true)
    .open(&path)?;
  Ok(ScratchFile { path })
}

/// Request-scoped temporary file. Deleted exactly once, on drop, whichever
/// way the request ends.
#[derive(Debug)]
pub struct ScratchFile {
  path: PathBuf,
}

impl ScratchFile {
  #[cfg(test)]
  pub fn at(path: PathBuf) -> Self {
    Self { path }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Open the artifact for sending. The returned stream owns `self`, so the
  /// file is deleted once the body has been fully sent, or as soon as the
  /// body is dropped mid-transfer.
  pub async fn into_stream(self) -> Result<(u64, ScratchStream)> {
    let file = File::open(&self.path).await?;
    let size = file.metadata().await?.len();
    Ok((
      size,
      ScratchStream {
        inner: ReaderStream::new(file),
        _guard: self,
      },
    ))
  }
}

impl Drop for ScratchFile {
  fn drop(&mut self) {
    if !self.path.exists() {
      return;
    }

    if let Err(e) = std::fs::remove_file(&self.path) {
      warn!("failed to delete scratch file {}: {e}", self.path.display());
    } else {
      debug!("deleted scratch file {}", self.path.display());
    }
  }
}

pub struct ScratchStream {
  inner: ReaderStream<File>,
  _guard: ScratchFile,
}

impl Stream for ScratchStream {
  type Item = std::io::Result<Bytes>;

  fn poll_next(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    Pin::new(&mut self.get_mut().inner).poll_next(cx)
  }
}

use bytes::Bytes;
use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};
use rustube::{Id, VideoFetcher};

use crate::{Error, Result};

use super::QualityHint;

// the primary extractor: in-process metadata + stream retrieval. Fast when
// it works, frequently blocked upstream; the pipeline falls back to yt-dlp.

/// Recognized-URL check. Accepts watch/short URLs and bare video ids.
pub fn validate(url: &str) -> bool {
  Id::from_raw(url).is_ok()
}

/// Fetch the human-readable title without descrambling the stream map.
pub async fn video_title(url: &str) -> Result<String> {
  let id = Id::from_raw(url).map_err(|_| Error::InvalidUrl)?.as_owned();
  let descrambler = VideoFetcher::from_id(id)?
    .fetch()
    .await
    .map_err(|e| Error::MetadataUnavailable(e.to_string()))?;
  Ok(descrambler.video_details().title.clone())
}

/// Open an audio-only byte stream. Establishment is lazy: the fetch and
/// descramble run on first poll, so failures surface as stream items
/// rather than from this call itself.
pub fn audio_stream(
  url: String,
  hint: QualityHint,
) -> BoxStream<'static, Result<Bytes>> {
  futures::stream::once(open_stream(url, hint))
    .try_flatten()
    .boxed()
}

async fn open_stream(
  url: String,
  hint: QualityHint,
) -> Result<impl Stream<Item = Result<Bytes>>> {
  let id = Id::from_raw(&url).map_err(|_| Error::InvalidUrl)?.as_owned();
  let video = VideoFetcher::from_id(id)?.fetch().await?.descramble()?;

  let stream = match hint {
    QualityHint::Highest => video.best_audio(),
    QualityHint::Lowest => video.worst_audio(),
  }
  .ok_or_else(|| Error::AudioStream(format!("no audio-only stream for {url}")))?;

  // request the full range in one shot; chunked playback URLs stall
  let stream_url = format!("{}&range=0-999999999999", stream.signature_cipher.url);

  let resp = reqwest::Client::new()
    .get(stream_url)
    .header("User-Agent", "Mozilla/5.0")
    .send()
    .await?
    .error_for_status()?;

  Ok(
    resp
      .bytes_stream()
      .map_err(|e| Error::AudioStream(e.to_string())),
  )
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_validate_watch_urls() {
    assert!(validate("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
    assert!(validate("https://youtu.be/dQw4w9WgXcQ"));
    assert!(validate("dQw4w9WgXcQ"));
  }

  #[test]
  fn test_validate_rejects_garbage() {
    assert!(!validate("not-a-url"));
    assert!(!validate("https://example.com/watch?v=dQw4w9WgXcQ"));
    assert!(!validate(""));
  }
}

use axum::{
  body::{self, StreamBody},
  extract::Query,
  http::Response,
  response::IntoResponse,
};
use reqwest::header;
use serde::Deserialize;

use crate::{pipeline, Error, Result};

#[derive(Deserialize)]
pub struct AudioParams {
  url: Option<String>,
  title: Option<String>,
}

#[axum::debug_handler]
pub async fn preview_audio(
  Query(params): Query<AudioParams>,
) -> Result<impl IntoResponse> {
  let url = params.url.ok_or(Error::MissingUrl)?;
  let stream = pipeline::preview(&url).await?;

  let resp = Response::builder()
    .header(header::CONTENT_TYPE, "audio/mpeg")
    .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
    .header(header::ACCEPT_RANGES, "bytes")
    .body(body::boxed(StreamBody::new(stream)))?;

  Ok(resp)
}

#[axum::debug_handler]
pub async fn download_audio(
  Query(params): Query<AudioParams>,
) -> Result<impl IntoResponse> {
  let url = params.url.ok_or(Error::MissingUrl)?;

  // run the acquisition in its own task: a client disconnect must not
  // cancel it server-side mid-transcode. If the client is gone by the
  // time it completes, the dropped result deletes the scratch file.
  let acquisition =
    tokio::spawn(pipeline::acquire(url, params.title))
      .await
      .map_err(|e| Error::Internal(e.to_string()))??;

  let filename = acquisition.filename;
  let (size, stream) = acquisition.file.into_stream().await?;

  let resp = Response::builder()
    .header(header::CONTENT_TYPE, "audio/mpeg")
    .header(
      header::CONTENT_DISPOSITION,
      format!("attachment; filename=\"{filename}\""),
    )
    .header(header::CONTENT_LENGTH, size)
    .body(body::boxed(StreamBody::new(stream)))?;

  Ok(resp)
}

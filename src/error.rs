use axum::{
  response::{IntoResponse, Response},
  Json,
};
use reqwest::StatusCode;
use serde_json::json;
use tracing::warn;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("Query parameter is required")]
  MissingQuery,

  #[error("URL parameter is required")]
  MissingUrl,

  #[error("Invalid YouTube URL")]
  InvalidUrl,

  #[error("Failed to search videos. {0}")]
  SearchFailed(String),

  #[error("video metadata unavailable: {0}")]
  MetadataUnavailable(String),

  #[error("audio stream failed: {0}")]
  AudioStream(String),

  #[error("transcoder failed: {0}")]
  Transcode(String),

  #[error("yt-dlp failed: {0}")]
  FallbackExtraction(String),

  #[error("Failed to create audio file")]
  EmptyArtifact,

  #[error("extraction failed: {0}")]
  Extraction(#[from] rustube::Error),

  #[error("upstream request failed: {0}")]
  Upstream(#[from] reqwest::Error),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Http(#[from] axum::http::Error),

  #[error("{0}")]
  Internal(String),
}

impl Error {
  pub fn status(&self) -> StatusCode {
    match self {
      Error::MissingQuery | Error::MissingUrl | Error::InvalidUrl => {
        StatusCode::BAD_REQUEST
      }
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      warn!("request failed: {self}");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_status_mapping() {
    assert_eq!(Error::MissingQuery.status(), StatusCode::BAD_REQUEST);
    assert_eq!(Error::MissingUrl.status(), StatusCode::BAD_REQUEST);
    assert_eq!(Error::InvalidUrl.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      Error::EmptyArtifact.status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
      Error::SearchFailed("boom".into()).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
      Error::FallbackExtraction("boom".into()).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn test_wire_messages() {
    assert_eq!(Error::InvalidUrl.to_string(), "Invalid YouTube URL");
    assert_eq!(
      Error::EmptyArtifact.to_string(),
      "Failed to create audio file"
    );
  }
}

use axum::{
  headers::ContentType, response::IntoResponse, routing::get, Json, Router,
  TypedHeader,
};
use chrono::Utc;
use serde_json::json;

mod audio;
mod config;
mod error;
mod extractor;
mod pipeline;
mod piped;
mod scratch;
mod search;
mod transcode;
mod util;

pub use config::{Config, CONFIG};
pub use error::{Error, Result};
pub use util::YTDLP_MUTEX;

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  // resolve config (and probe ffmpeg) before accepting requests
  let config = &*CONFIG;
  scratch::init()?;

  let app = Router::new()
    .route("/", get(homepage))
    .route("/api/test", get(liveness))
    .route("/api/search", get(search::search_videos))
    .route("/api/preview", get(audio::preview_audio))
    .route("/api/download", get(audio::download_audio));

  let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
  println!("Listening on http://{addr}");

  axum::Server::bind(&addr)
    .serve(app.into_make_service())
    .await
    .expect("Failed to start server");

  Ok(())
}

pub const HOMEPAGE_HTML: &str = include_str!("../html/index.html");

async fn homepage() -> impl IntoResponse {
  (
    TypedHeader::<ContentType>(ContentType::html()),
    HOMEPAGE_HTML,
  )
}

async fn liveness() -> impl IntoResponse {
  Json(json!({
    "status": "Server is running",
    "timestamp": Utc::now().to_rfc3339(),
  }))
}

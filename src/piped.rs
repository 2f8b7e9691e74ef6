use std::{convert::Infallible, sync::Mutex};

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query};
use once_cell::sync::Lazy;
use serde::Deserialize;

const DEFAULT_PIPED_INSTANCE: &str = "pipedapi.kavin.rocks";

static GLOBAL_PIPED_INSTANCE: Lazy<Mutex<PipedInstance>> = Lazy::new(|| {
  let domain = std::env::var("PIPED_INSTANCE")
    .unwrap_or_else(|_| DEFAULT_PIPED_INSTANCE.to_string());
  Mutex::new(PipedInstance::new(domain))
});

/// The video-search provider endpoint. Which instance to talk to is decided
/// once per process (`PIPED_INSTANCE`), with a per-request
/// `&piped_instance=<domain>` override for flaky instances.
#[derive(Clone, Debug)]
pub struct PipedInstance {
  domain: String,
}

impl PipedInstance {
  fn new(domain: String) -> Self {
    Self { domain }
  }

  pub fn search_url(&self) -> String {
    format!("https://{}/search", self.domain)
  }
}

#[derive(Deserialize)]
struct PipedInstanceQuery {
  piped_instance: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for PipedInstance
where
  S: Send + Sync,
{
  type Rejection = Infallible;

  async fn from_request_parts(
    parts: &mut axum::http::request::Parts,
    state: &S,
  ) -> Result<Self, Self::Rejection> {
    // extract &piped_instance=<value> from URL or use global instance.
    let instance =
      Query::<PipedInstanceQuery>::from_request_parts(parts, state)
        .await
        .map(|query| PipedInstance::new(query.0.piped_instance))
        .unwrap_or_else(|_| GLOBAL_PIPED_INSTANCE.lock().unwrap().clone());

    Ok(instance)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_search_url() {
    let instance = PipedInstance::new("example.org".to_string());
    assert_eq!(instance.search_url(), "https://example.org/search");
  }
}

use axum::{extract::Query, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{piped::PipedInstance, Error, Result};

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 50;

// appended to every raw query before it reaches the provider. Plain song
// titles tend to surface unrelated videos first; steering the query keeps
// results biased toward music uploads. Deliberate heuristic, not a bug.
const QUERY_STEER_SUFFIX: &str = "music";

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
  pub id: String,
  pub title: String,
  pub source_url: String,
  pub duration_label: String,
  pub thumbnail_url: String,
  pub author_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
  pub items: Vec<SearchResult>,
  pub page_number: usize,
  pub page_size: usize,
  pub total_items: usize,
  pub total_pages: usize,
}

#[derive(Deserialize)]
pub struct SearchParams {
  query: Option<String>,
  page: Option<usize>,
  limit: Option<usize>,
}

#[axum::debug_handler]
pub async fn search_videos(
  Query(params): Query<SearchParams>,
  piped: PipedInstance,
) -> Result<Json<SearchPage>> {
  let query = params
    .query
    .filter(|q| !q.trim().is_empty())
    .ok_or(Error::MissingQuery)?;
  let page = params.page.unwrap_or(1);
  let page_size = params
    .limit
    .unwrap_or(DEFAULT_PAGE_SIZE)
    .clamp(1, MAX_PAGE_SIZE);

  info!("searching for: {query}");
  let results = provider_search(&piped, &query).await?;
  info!("found {} videos", results.len());

  Ok(Json(paginate(results, page, page_size)))
}

/// Fetch one unpaginated batch from the provider and map it. Pagination is
/// applied client-side over this single batch, so `totalItems` is bounded
/// by whatever the provider returns in one call, not a true corpus total.
async fn provider_search(
  piped: &PipedInstance,
  query: &str,
) -> Result<Vec<SearchResult>> {
  let provider_query = format!("{} {QUERY_STEER_SUFFIX}", query.trim());

  let resp: ProviderResponse = reqwest::Client::new()
    .get(piped.search_url())
    .query(&[("q", provider_query.as_str()), ("filter", "videos")])
    .header("User-Agent", "Mozilla/5.0")
    .send()
    .await
    .map_err(|e| Error::SearchFailed(e.to_string()))?
    .json()
    .await
    .map_err(|e| Error::SearchFailed(e.to_string()))?;

  Ok(
    resp
      .items
      .into_iter()
      .filter_map(map_provider_item)
      .collect(),
  )
}

#[derive(Deserialize)]
struct ProviderResponse {
  items: Vec<ProviderItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderItem {
  url: String,
  #[serde(default)]
  title: String,
  #[serde(default, alias = "thumbnailUrl")]
  thumbnail: String,
  #[serde(default, alias = "uploader")]
  uploader_name: String,
  // seconds; providers report -1 for live streams
  #[serde(default)]
  duration: i64,
}

fn map_provider_item(item: ProviderItem) -> Option<SearchResult> {
  let id = item.url.strip_prefix("/watch?v=")?.to_string();
  Some(SearchResult {
    source_url: format!("https://www.youtube.com/watch?v={id}"),
    id,
    title: item.title,
    duration_label: duration_label(item.duration),
    thumbnail_url: item.thumbnail,
    author_name: item.uploader_name,
  })
}

fn duration_label(seconds: i64) -> String {
  if seconds < 0 {
    return String::new();
  }
  let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
  if h > 0 {
    format!("{h}:{m:02}:{s:02}")
  } else {
    format!("{m}:{s:02}")
  }
}

fn paginate(
  items: Vec<SearchResult>,
  page: usize,
  page_size: usize,
) -> SearchPage {
  let total_items = items.len();
  let total_pages = ((total_items + page_size - 1) / page_size).max(1);
  // out-of-range pages (including 0) are clamped rather than rejected
  let page_number = page.clamp(1, total_pages);

  let items = items
    .into_iter()
    .skip((page_number - 1) * page_size)
    .take(page_size)
    .collect();

  SearchPage {
    items,
    page_number,
    page_size,
    total_items,
    total_pages,
  }
}

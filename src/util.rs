use std::sync::LazyLock;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;

// ensure only a limited set of ytdlp processes at a time
pub static YTDLP_MUTEX: LazyLock<Semaphore> = LazyLock::new(|| {
  let concurrency = std::env::var("YTDLP_CONCURRENCY")
    .ok()
    .and_then(|s| s.parse::<usize>().ok())
    .unwrap_or(1);
  Semaphore::new(concurrency)
});

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new("[^A-Za-z0-9]").unwrap());

/// Turn a video title into a safe filename stem: every character outside
/// `[A-Za-z0-9]` becomes `_`, then the result is lower-cased. Idempotent.
pub fn slug(title: &str) -> String {
  NON_ALNUM.replace_all(title, "_").to_lowercase()
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_slug_replaces_and_lowercases() {
    assert_eq!(slug("Bob Marley - Waiting In Vain"), "bob_marley___waiting_in_vain");
    assert_eq!(slug("Hello"), "hello");
    assert_eq!(slug("a!!b"), "a__b");
    assert_eq!(slug(""), "");
  }

  #[test]
  fn test_slug_is_idempotent() {
    for title in ["Bob Marley - Waiting In Vain", "ünïcode ♫ title", "___", ""] {
      let once = slug(title);
      assert_eq!(slug(&once), once);
    }
  }

  #[test]
  fn test_slug_charset() {
    let out = slug("ünïcode ♫ title (official video) [HD]");
    assert!(out
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
  }
}

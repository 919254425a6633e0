//! Post and comment URL handling.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

pub const DEFAULT_PERMALINK_BASE: &str = "https://www.threads.net";

static POST_SEGMENT: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"/post/([A-Za-z0-9_\-]+)").expect("valid regex"));

/// Canonical post URL: trimmed, legacy host rewritten, query and fragment
/// dropped, no trailing slash.
pub fn normalize_post_url(url: &str) -> String {
  let mut url = url.trim().to_owned();
  for legacy in ["://www.threads.com", "://threads.com"] {
    if let Some(idx) = url.find(legacy) {
      let host = if legacy.contains("www.") {
        "://www.threads.net"
      } else {
        "://threads.net"
      };
      url.replace_range(idx..idx + legacy.len(), host);
      break;
    }
  }
  if let Some(idx) = url.find(['?', '#']) {
    url.truncate(idx);
  }
  while url.ends_with('/') {
    url.pop();
  }
  url
}

/// The platform id in a `/post/<id>` URL, or a stable 16-hex digest of the
/// URL when there is none.
pub fn post_id_from_url(url: &str) -> String {
  native_post_id(url).unwrap_or_else(|| short_digest(url.trim(), 16))
}

/// The `/post/<id>` segment only.
pub fn native_post_id(url: &str) -> Option<String> {
  POST_SEGMENT
    .captures(url)
    .map(|caps| caps[1].to_owned())
}

/// Resolve a possibly relative `href` against `base`.
pub fn absolute_permalink(base: &str, href: &str) -> String {
  let href = href.trim();
  if href.starts_with("http://") || href.starts_with("https://") {
    return normalize_post_url(href);
  }
  let base = base.trim_end_matches('/');
  if href.starts_with('/') {
    normalize_post_url(&format!("{base}{href}"))
  } else {
    normalize_post_url(&format!("{base}/{href}"))
  }
}

/// First `len` hex characters of the SHA-256 of `input`.
pub(crate) fn short_digest(input: &str, len: usize) -> String {
  let mut hex = hex::encode(Sha256::digest(input.as_bytes()));
  hex.truncate(len);
  hex
}

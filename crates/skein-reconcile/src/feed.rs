//! Structured-feed visitor.
//!
//! Walks an intercepted payload of unknown shape and collects every node that
//! looks like a comment: it has an id, an author object with a handle, and
//! text or media. The walk is bounded in depth and skips subtrees that only
//! ever carry client bookkeeping.

use std::collections::HashSet;

use serde_json::{Map, Value};
use skein_core::card::{RawCard, RawMetric, RawMetrics};

const MAX_DEPTH: usize = 24;

const EXCLUDED_KEYS: &[&str] =
  &["extensions", "viewer", "page_info", "logging", "tracking"];

const TEXT_KEYS: &[&str] = &["text", "body", "comment_text", "message", "caption"];
const ID_KEYS: &[&str] = &["id", "pk", "comment_id", "feedback_id", "thread_id"];
const PARENT_KEYS: &[&str] =
  &["parent_comment_id", "parent_id", "reply_to_comment_id", "reply_to_id"];
const ROOT_KEYS: &[&str] = &["root_comment_id", "root_source_comment_id", "root_id"];
const REPLY_TO_KEYS: &[&str] =
  &["reply_to_author", "reply_to_username", "reply_to_user"];
const TIMESTAMP_KEYS: &[&str] = &["taken_at", "created_at", "timestamp", "created_time"];
const AUTHOR_KEYS: &[&str] = &["user", "owner", "author"];
const HANDLE_KEYS: &[&str] = &["username", "user_name", "handle"];
const MEDIA_KEYS: &[&str] = &["images", "media"];

const LIKE_KEYS: &[&str] = &["like_count", "likes", "like_count_total"];
const REPLY_KEYS: &[&str] = &["reply_count", "replies", "child_comment_count"];
const REPOST_KEYS: &[&str] = &["repost_count", "reposts", "reshare_count"];
const SHARE_KEYS: &[&str] = &["share_count", "shares"];

/// Collect comment cards from `feed` in document order. The node whose id is
/// `root_native_id` is the post itself and is not collected; its descendants
/// are.
pub fn feed_cards(feed: &Value, root_native_id: Option<&str>) -> Vec<RawCard> {
  let mut visitor = FeedVisitor {
    root:  root_native_id,
    seen:  HashSet::new(),
    cards: Vec::new(),
  };
  visitor.visit(feed, 0, None);
  visitor.cards
}

struct FeedVisitor<'r> {
  root:  Option<&'r str>,
  seen:  HashSet<String>,
  cards: Vec<RawCard>,
}

impl FeedVisitor<'_> {
  /// `enclosing` is the id of the nearest comment above this node; it becomes
  /// the parent of nested comments that do not name one.
  fn visit(&mut self, value: &Value, depth: usize, enclosing: Option<&str>) {
    if depth > MAX_DEPTH {
      return;
    }
    match value {
      Value::Array(items) => {
        for item in items {
          self.visit(item, depth + 1, enclosing);
        }
      }
      Value::Object(map) => {
        let own_id = self.collect(map, enclosing);
        let enclosing = match own_id.as_deref() {
          Some(id) if Some(id) == self.root => None,
          Some(id) => Some(id),
          None => enclosing,
        };
        for (key, child) in map {
          if EXCLUDED_KEYS.contains(&key.as_str()) {
            continue;
          }
          self.visit(child, depth + 1, enclosing);
        }
      }
      _ => {}
    }
  }

  /// Record `map` if it is comment-shaped. Returns its id either way so the
  /// walk can thread it down as the enclosing comment.
  fn collect(&mut self, map: &Map<String, Value>, enclosing: Option<&str>) -> Option<String> {
    let mut card = comment_card(map)?;
    let id = card.native_id.clone()?;
    if Some(id.as_str()) == self.root {
      return Some(id);
    }
    if card.parent_native_id.is_none() {
      card.parent_native_id = enclosing.map(str::to_owned);
    }
    if self.seen.insert(id.clone()) {
      self.cards.push(card);
    }
    Some(id)
  }
}

// ─── Node extraction ─────────────────────────────────────────────────────────

fn comment_card(map: &Map<String, Value>) -> Option<RawCard> {
  let typename = map.get("__typename").and_then(Value::as_str).unwrap_or("");
  if typename.contains("Connection") || typename.contains("Edge") {
    return None;
  }
  let native_id = first_scalar(map, ID_KEYS)?;
  let handle = author_handle(map)?;
  let (text, fragments) = reconstruct_text(map);
  let images = media_urls(map);
  if text.trim().is_empty() && images.is_empty() {
    return None;
  }

  let metric = |keys: &[&str]| RawMetric {
    present: true,
    value:   Some(first_count(map, keys).unwrap_or(0)),
  };

  Some(RawCard {
    handle,
    raw_text: text.clone(),
    body_text: text,
    metrics: RawMetrics {
      likes:   metric(LIKE_KEYS),
      replies: metric(REPLY_KEYS),
      reposts: metric(REPOST_KEYS),
      shares:  metric(SHARE_KEYS),
    },
    images,
    native_id: Some(native_id),
    parent_native_id: first_scalar(map, PARENT_KEYS),
    root_native_id: first_scalar(map, ROOT_KEYS),
    reply_to: reply_to_author(map),
    taken_at: first_scalar(map, TIMESTAMP_KEYS),
    text_fragments: fragments,
    ..Default::default()
  })
}

/// First non-empty string or number under any of `keys`, as a string.
fn first_scalar(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|key| match map.get(*key)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
    Value::Number(n) => Some(
      n.as_i64()
        .map(|v| v.to_string())
        .unwrap_or_else(|| n.to_string()),
    ),
    _ => None,
  })
}

fn first_count(map: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
  keys.iter().find_map(|key| match map.get(*key)? {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  })
}

fn handle_of(map: &Map<String, Value>) -> Option<String> {
  HANDLE_KEYS
    .iter()
    .filter_map(|key| map.get(*key)?.as_str())
    .map(str::trim)
    .find(|h| !h.is_empty())
    .map(str::to_owned)
}

fn author_handle(map: &Map<String, Value>) -> Option<String> {
  AUTHOR_KEYS
    .iter()
    .filter_map(|key| map.get(*key)?.as_object())
    .find_map(handle_of)
}

fn reply_to_author(map: &Map<String, Value>) -> Option<String> {
  REPLY_TO_KEYS.iter().find_map(|key| match map.get(*key)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
    Value::Object(user) => handle_of(user),
    _ => None,
  })
}

/// Text from the first text key, else `caption.text`, else the concatenated
/// fragments.
fn reconstruct_text(map: &Map<String, Value>) -> (String, Option<Vec<String>>) {
  for key in TEXT_KEYS {
    match map.get(*key) {
      Some(Value::String(s)) if !s.trim().is_empty() => return (s.clone(), None),
      Some(Value::Object(inner)) => {
        if let Some(s) = inner.get("text").and_then(Value::as_str) {
          if !s.trim().is_empty() {
            return (s.to_owned(), None);
          }
        }
      }
      _ => {}
    }
  }

  let Some(fragments) = map
    .get("text_fragments")
    .or_else(|| map.get("fragments"))
    .and_then(Value::as_array)
  else {
    return (String::new(), None);
  };
  let parts: Vec<String> = fragments
    .iter()
    .filter_map(|frag| match frag {
      Value::String(s) => Some(s.as_str()),
      Value::Object(f) => f.get("text").and_then(Value::as_str),
      _ => None,
    })
    .filter(|s| !s.trim().is_empty())
    .map(str::to_owned)
    .collect();
  (parts.concat().trim().to_owned(), Some(parts))
}

fn media_urls(map: &Map<String, Value>) -> Vec<String> {
  MEDIA_KEYS
    .iter()
    .filter_map(|key| map.get(*key)?.as_array())
    .flatten()
    .filter_map(|item| match item {
      Value::String(s) => Some(s.clone()),
      Value::Object(m) => ["url", "src", "uri"]
        .iter()
        .find_map(|k| m.get(*k)?.as_str())
        .map(str::to_owned),
      _ => None,
    })
    .filter(|url| !url.trim().is_empty())
    .collect()
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn payload() -> Value {
    json!({
      "data": {
        "viewer": { "id": "v1", "user": { "username": "me" }, "text": "ignored" },
        "post": {
          "id": "ROOT",
          "user": { "username": "op" },
          "caption": { "text": "the post" },
          "replies": {
            "__typename": "XDTCommentConnection",
            "edges": [
              {
                "__typename": "XDTCommentEdge",
                "node": {
                  "pk": 101,
                  "user": { "username": "alice" },
                  "text": "first!",
                  "like_count": 7,
                  "taken_at": 1_700_000_000,
                  "child_comments": [
                    {
                      "id": "102",
                      "owner": { "handle": "bob" },
                      "text_fragments": [{ "text": "hello " }, { "text": "alice" }],
                      "reply_to_author": { "username": "alice" }
                    }
                  ]
                }
              },
              { "node": { "id": "103", "user": { "username": "carol" }, "text": "  " } },
              { "node": { "id": "101", "user": { "username": "alice" }, "text": "first!" } }
            ]
          }
        }
      },
      "extensions": { "id": "x", "user": { "username": "bot" }, "text": "nope" }
    })
  }

  #[test]
  fn collects_comment_shaped_nodes() {
    let cards = feed_cards(&payload(), Some("ROOT"));
    let ids: Vec<_> = cards.iter().filter_map(|c| c.native_id.as_deref()).collect();
    assert_eq!(ids, vec!["101", "102"]);

    let alice = &cards[0];
    assert_eq!(alice.handle, "alice");
    assert_eq!(alice.body_text, "first!");
    assert_eq!(alice.metrics.likes, RawMetric::present(7));
    assert_eq!(alice.metrics.shares, RawMetric::present(0));
    assert_eq!(alice.taken_at.as_deref(), Some("1700000000"));
    assert_eq!(alice.parent_native_id, None);

    let bob = &cards[1];
    assert_eq!(bob.body_text, "hello alice");
    assert_eq!(bob.parent_native_id.as_deref(), Some("101"));
    assert_eq!(bob.reply_to.as_deref(), Some("alice"));
    assert_eq!(bob.text_fragments.as_ref().map(Vec::len), Some(2));
  }

  #[test]
  fn root_is_skipped_only_when_known() {
    let cards = feed_cards(&payload(), None);
    assert_eq!(cards[0].native_id.as_deref(), Some("ROOT"));
    assert_eq!(cards[1].parent_native_id.as_deref(), Some("ROOT"));
  }

  #[test]
  fn depth_is_bounded() {
    let mut value = json!({ "id": "deep", "user": { "username": "x" }, "text": "t" });
    for _ in 0..40 {
      value = json!({ "wrap": value });
    }
    assert!(feed_cards(&value, None).is_empty());
  }

  #[test]
  fn media_only_comments_count() {
    let value = json!([{ "id": 5, "author": { "user_name": "pic" }, "media": [{ "url": "https://cdn/x.jpg" }] }]);
    let cards = feed_cards(&value, None);
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].images, vec!["https://cdn/x.jpg".to_string()]);
  }
}

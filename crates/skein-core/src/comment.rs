//! Canonical comment records and reply edges.
//!
//! A [`CommentRecord`] is the single reconciled view of one logical comment
//! within one post. It is created on first observation, refined by the merge
//! rules while the run lasts, and handed to tree repair and persistence once
//! harvesting is over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, card::Channel};

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// One metric channel after normalisation.
///
/// `Unknown` means no round found a lexical cue for the channel. It is never
/// inferred from a zero value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Reading {
  #[default]
  Unknown,
  Present(u64),
}

impl Reading {
  pub fn is_present(&self) -> bool { matches!(self, Self::Present(_)) }

  pub fn value(&self) -> u64 {
    match self {
      Self::Unknown => 0,
      Self::Present(v) => *v,
    }
  }
}

/// Per-channel readings from a single observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readings {
  pub likes:   Reading,
  pub replies: Reading,
  pub reposts: Reading,
  pub shares:  Reading,
}

impl Readings {
  pub fn get(&self, channel: Channel) -> Reading {
    match channel {
      Channel::Likes => self.likes,
      Channel::Replies => self.replies,
      Channel::Reposts => self.reposts,
      Channel::Shares => self.shares,
    }
  }

  pub fn set(&mut self, channel: Channel, reading: Reading) {
    match channel {
      Channel::Likes => self.likes = reading,
      Channel::Replies => self.replies = reading,
      Channel::Reposts => self.reposts = reading,
      Channel::Shares => self.shares = reading,
    }
  }
}

/// Canonical counters stored with a comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
  pub likes:   u64,
  pub replies: u64,
  pub reposts: u64,
  pub shares:  u64,
}

impl Metrics {
  pub fn set(&mut self, channel: Channel, value: u64) {
    match channel {
      Channel::Likes => self.likes = value,
      Channel::Replies => self.replies = value,
      Channel::Reposts => self.reposts = value,
      Channel::Shares => self.shares = value,
    }
  }
}

/// Which channels were confirmed present by at least one contributing round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsPresence {
  pub likes:   bool,
  pub replies: bool,
  pub reposts: bool,
  pub shares:  bool,
}

impl MetricsPresence {
  pub fn mark(&mut self, channel: Channel) {
    match channel {
      Channel::Likes => self.likes = true,
      Channel::Replies => self.replies = true,
      Channel::Reposts => self.reposts = true,
      Channel::Shares => self.shares = true,
    }
  }

  pub fn count(&self) -> usize {
    [self.likes, self.replies, self.reposts, self.shares]
      .into_iter()
      .filter(|p| *p)
      .count()
  }

  pub fn confidence(&self) -> MetricsConfidence {
    match self.count() {
      4 => MetricsConfidence::Exact,
      0 => MetricsConfidence::Missing,
      _ => MetricsConfidence::Partial,
    }
  }

  /// Compact bitmask for storage: likes=1, replies=2, reposts=4, shares=8.
  pub fn to_mask(&self) -> u8 {
    (self.likes as u8)
      | (self.replies as u8) << 1
      | (self.reposts as u8) << 2
      | (self.shares as u8) << 3
  }

  pub fn from_mask(mask: u8) -> Self {
    Self {
      likes:   mask & 1 != 0,
      replies: mask & 2 != 0,
      reposts: mask & 4 != 0,
      shares:  mask & 8 != 0,
    }
  }
}

/// How much of a comment's metrics was actually observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsConfidence {
  /// All four channels observed.
  Exact,
  /// One to three channels observed.
  Partial,
  /// Nothing observed.
  Missing,
}

impl MetricsConfidence {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Exact => "exact",
      Self::Partial => "partial",
      Self::Missing => "missing",
    }
  }
}

// ─── Provenance ──────────────────────────────────────────────────────────────

/// Which harvest phase first produced a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
  #[default]
  Main,
  Drill,
}

impl Source {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Main => "main",
      Self::Drill => "drill",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "main" => Ok(Self::Main),
      "drill" => Ok(Self::Drill),
      other => Err(Error::UnknownVariant { kind: "source", value: other.into() }),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePrecision {
  Approx,
  #[default]
  #[serde(rename = "none")]
  Unknown,
}

// ─── CommentRecord ───────────────────────────────────────────────────────────

/// The canonical record for one logical comment of one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
  /// Stable id; unique per post and the upsert key.
  pub id:                String,
  /// Platform id, when one was ever observed.
  pub source_id:         Option<String>,
  pub parent_id:         Option<String>,
  pub parent_source_id:  Option<String>,
  pub root_source_id:    Option<String>,
  /// Stable id of the thread root this record hangs under; set by repair.
  pub root_id:           Option<String>,
  pub fingerprint:       String,
  pub author:            String,
  pub text:              String,
  pub text_fragments:    Option<Vec<String>>,
  pub metrics:           Metrics,
  pub presence:          MetricsPresence,
  pub images:            Vec<String>,
  pub time_token:        Option<String>,
  pub approx_created_at: Option<DateTime<Utc>>,
  pub time_precision:    TimePrecision,
  pub source:            Source,
  pub drilled:           bool,
  /// Handle from a textual "replying to @user" cue.
  pub reply_to:          Option<String>,
  pub depth:             Option<u32>,
  pub path:              Option<String>,
  /// First-discovery order within the post.
  pub seq:               u32,
}

impl CommentRecord {
  pub fn metrics_confidence(&self) -> MetricsConfidence {
    self.presence.confidence()
  }
}

// ─── Edges ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
  #[default]
  Reply,
}

impl EdgeType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Reply => "reply",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "reply" => Ok(Self::Reply),
      other => Err(Error::UnknownVariant { kind: "edge type", value: other.into() }),
    }
  }
}

/// A parent → child reply link. Upsert key is (parent, child, type).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub parent_id: String,
  pub child_id:  String,
  pub edge_type: EdgeType,
}

impl Edge {
  pub fn reply(parent_id: impl Into<String>, child_id: impl Into<String>) -> Self {
    Self {
      parent_id: parent_id.into(),
      child_id:  child_id.into(),
      edge_type: EdgeType::Reply,
    }
  }
}

/// Derive the reply edges of a record set. Self-loops and links to records
/// outside the set are skipped.
pub fn edges_for(records: &[CommentRecord]) -> Vec<Edge> {
  let ids: std::collections::HashSet<&str> =
    records.iter().map(|r| r.id.as_str()).collect();
  records
    .iter()
    .filter_map(|r| {
      let parent = r.parent_id.as_deref()?;
      (parent != r.id && ids.contains(parent)).then(|| Edge::reply(parent, &r.id))
    })
    .collect()
}

// ─── Tree updates ────────────────────────────────────────────────────────────

/// A minimal structural write produced by tree repair. `None` fields are
/// unchanged and must not be written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeUpdate {
  pub id:               String,
  pub parent_id:        Option<Option<String>>,
  pub parent_source_id: Option<Option<String>>,
  pub root_id:          Option<String>,
  pub depth:            Option<u32>,
  pub path:             Option<String>,
}

impl TreeUpdate {
  pub fn is_empty(&self) -> bool {
    self.parent_id.is_none()
      && self.parent_source_id.is_none()
      && self.root_id.is_none()
      && self.depth.is_none()
      && self.path.is_none()
  }

  /// Fold this update into `record`.
  pub fn apply_to(&self, record: &mut CommentRecord) {
    if let Some(parent) = &self.parent_id {
      record.parent_id = parent.clone();
    }
    if let Some(parent) = &self.parent_source_id {
      record.parent_source_id = parent.clone();
    }
    if let Some(root) = &self.root_id {
      record.root_id = Some(root.clone());
    }
    if let Some(depth) = self.depth {
      record.depth = Some(depth);
    }
    if let Some(path) = &self.path {
      record.path = Some(path.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn presence_mask_roundtrip() {
    let mut p = MetricsPresence::default();
    p.mark(Channel::Replies);
    p.mark(Channel::Shares);
    assert_eq!(p.to_mask(), 0b1010);
    assert_eq!(MetricsPresence::from_mask(0b1010), p);
  }

  #[test]
  fn confidence_buckets() {
    let mut p = MetricsPresence::default();
    assert_eq!(p.confidence(), MetricsConfidence::Missing);
    p.mark(Channel::Likes);
    assert_eq!(p.confidence(), MetricsConfidence::Partial);
    for c in Channel::ALL {
      p.mark(c);
    }
    assert_eq!(p.confidence(), MetricsConfidence::Exact);
  }

  #[test]
  fn reading_zero_is_still_present() {
    assert!(Reading::Present(0).is_present());
    assert!(!Reading::Unknown.is_present());
    assert_eq!(Reading::Unknown.value(), 0);
  }
}

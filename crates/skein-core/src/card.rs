//! Raw capture types: what the page capture adapter hands over each round.
//!
//! A card is ephemeral: it lives for exactly one round and is discarded once
//! it has been normalised into an observation.

use serde::{Deserialize, Serialize};

// ─── Metric channels ─────────────────────────────────────────────────────────

/// The four engagement channels tracked per comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
  Likes,
  Replies,
  Reposts,
  Shares,
}

impl Channel {
  pub const ALL: [Channel; 4] =
    [Channel::Likes, Channel::Replies, Channel::Reposts, Channel::Shares];
}

/// One channel as the adapter saw it.
///
/// `present` means a lexical cue for the channel (icon label, button text) was
/// found on the card. The value may still be missing: a "Like" button with no
/// visible count is present with no value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetric {
  #[serde(default)]
  pub present: bool,
  #[serde(default)]
  pub value:   Option<i64>,
}

impl RawMetric {
  pub fn present(value: i64) -> Self { Self { present: true, value: Some(value) } }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetrics {
  #[serde(default)]
  pub likes:   RawMetric,
  #[serde(default)]
  pub replies: RawMetric,
  #[serde(default)]
  pub reposts: RawMetric,
  #[serde(default)]
  pub shares:  RawMetric,
}

impl RawMetrics {
  pub fn get(&self, channel: Channel) -> RawMetric {
    match channel {
      Channel::Likes => self.likes,
      Channel::Replies => self.replies,
      Channel::Reposts => self.reposts,
      Channel::Shares => self.shares,
    }
  }
}

// ─── RawCard ─────────────────────────────────────────────────────────────────

/// One structured extraction of a post/comment block from a single round.
///
/// The structural fields (`native_id` and friends) are only filled when the
/// adapter found platform identifiers, typically from an intercepted feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCard {
  pub handle:           String,
  pub raw_text:         String,
  /// Body text as pre-cleaned by the adapter; may be empty.
  pub body_text:        String,
  pub permalink:        Option<String>,
  pub time_token:       Option<String>,
  pub metrics:          RawMetrics,
  pub images:           Vec<String>,
  /// UI-affordance text samples: aria labels, button captions.
  pub aux_labels:       Vec<String>,
  pub native_id:        Option<String>,
  pub parent_native_id: Option<String>,
  pub root_native_id:   Option<String>,
  pub reply_to:         Option<String>,
  /// RFC 3339 string or epoch seconds.
  pub taken_at:         Option<String>,
  pub text_fragments:   Option<Vec<String>>,
}

// ─── Page-level snapshot ─────────────────────────────────────────────────────

/// Engagement counters for the root post as displayed on the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageMetrics {
  pub likes:   u64,
  pub replies: u64,
  pub reposts: u64,
  pub shares:  u64,
  pub views:   u64,
}

// ─── CaptureRound ────────────────────────────────────────────────────────────

/// Everything one capture round produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRound {
  /// Cards in on-page order.
  pub cards: Vec<RawCard>,
  pub page:  Option<PageMetrics>,
  /// Structured payload intercepted from the platform's own traffic.
  pub feed:  Option<serde_json::Value>,
}

impl CaptureRound {
  pub fn from_cards(cards: Vec<RawCard>) -> Self {
    Self { cards, page: None, feed: None }
  }
}

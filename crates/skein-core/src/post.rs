//! The root post of a thread and the bookkeeping for one ingestion run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::card::PageMetrics;

/// What a harvest learned about the root post itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostSnapshot {
  /// Canonical post URL; the post upsert key.
  pub url:         String,
  /// Platform post id parsed from the URL.
  pub external_id: String,
  pub author:      Option<String>,
  pub text:        Option<String>,
  pub metrics:     PageMetrics,
  pub images:      Vec<String>,
}

/// A stored post row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRow {
  pub post_id:     Uuid,
  pub url:         String,
  pub captured_at: DateTime<Utc>,
}

/// One ingestion of one post. Idempotent by (`run_id`, post).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
  pub run_id:          String,
  pub post_id:         Uuid,
  pub crawled_at:      DateTime<Utc>,
  pub fetcher_version: String,
  pub comment_count:   u64,
  pub edge_count:      u64,
}

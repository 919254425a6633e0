//! The `ThreadStore` trait, the persistence port.
//!
//! The trait is implemented by storage backends (e.g. `skein-store-sqlite`)
//! and passed explicitly into ingestion and repair; nothing reaches for a
//! global client.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  comment::{CommentRecord, Edge, TreeUpdate},
  post::{PostRow, PostSnapshot, RunRecord},
};

/// Abstraction over a thread store backend.
///
/// Every write is an idempotent upsert: replaying the same input never changes
/// row counts. Comments are keyed by (post, stable id); edges by (post,
/// parent, child, type); posts by URL.
pub trait ThreadStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Posts ─────────────────────────────────────────────────────────────

  /// Insert or refresh the post row for `post.url` and return it.
  fn upsert_post<'a>(
    &'a self,
    post: &'a PostSnapshot,
    captured_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<PostRow, Self::Error>> + Send + 'a;

  /// Look up a post by URL. Returns `None` if it was never ingested.
  fn find_post<'a>(
    &'a self,
    url: &'a str,
  ) -> impl Future<Output = Result<Option<PostRow>, Self::Error>> + Send + 'a;

  /// Number of post rows stored for `url`.
  fn count_posts<'a>(
    &'a self,
    url: &'a str,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;

  /// Record (or refresh) the bookkeeping row for an ingestion run.
  fn record_run<'a>(
    &'a self,
    run: &'a RunRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Comments and edges ────────────────────────────────────────────────

  /// Upsert a batch of records. Returns the number of rows written.
  fn upsert_comments<'a>(
    &'a self,
    post_id: Uuid,
    records: &'a [CommentRecord],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Upsert a batch of edges. Returns the number of rows written.
  fn upsert_edges<'a>(
    &'a self,
    post_id: Uuid,
    edges: &'a [Edge],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// All stored records of a post in first-discovery order.
  fn list_comments(
    &self,
    post_id: Uuid,
  ) -> impl Future<Output = Result<Vec<CommentRecord>, Self::Error>> + Send + '_;

  fn list_edges(
    &self,
    post_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Edge>, Self::Error>> + Send + '_;

  /// Write only the fields each update carries. Returns the number of rows
  /// touched.
  fn apply_tree_updates<'a>(
    &'a self,
    post_id: Uuid,
    updates: &'a [TreeUpdate],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;
}

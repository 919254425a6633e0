//! In-memory `ThreadStore` used by the pipeline and verification tests.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Mutex,
};

use chrono::{DateTime, Utc};
use skein_core::{
  comment::{CommentRecord, Edge, TreeUpdate},
  post::{PostRow, PostSnapshot, RunRecord},
  store::ThreadStore,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("memory store: {0}")]
pub(crate) struct MemoryError(&'static str);

#[derive(Default)]
struct Inner {
  posts:    Vec<PostRow>,
  runs:     BTreeSet<(String, Uuid)>,
  comments: BTreeMap<(Uuid, String), CommentRecord>,
  edges:    BTreeSet<(Uuid, String, String)>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
  inner:         Mutex<Inner>,
  fail_comments: bool,
}

impl MemoryStore {
  pub(crate) fn failing_comments() -> Self {
    Self { fail_comments: true, ..Default::default() }
  }

  pub(crate) fn run_count(&self) -> usize { self.lock().runs.len() }

  /// Insert a record as-is, bypassing upsert semantics.
  pub(crate) fn put(&self, post_id: Uuid, record: CommentRecord) {
    self.lock().comments.insert((post_id, record.id.clone()), record);
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// The SQLite comment upsert, field for field: structural ids fill gaps, a
/// parentless row keeps the stored tree, time fields are set once, `drilled`
/// only rises and `seq` keeps its minimum.
fn upserted(stored: &CommentRecord, incoming: &CommentRecord) -> CommentRecord {
  let mut next = incoming.clone();
  let keep_tree = incoming.parent_id.is_none() && stored.parent_id.is_some();

  next.source_id = incoming.source_id.clone().or_else(|| stored.source_id.clone());
  next.parent_id = incoming.parent_id.clone().or_else(|| stored.parent_id.clone());
  next.parent_source_id = incoming
    .parent_source_id
    .clone()
    .or_else(|| stored.parent_source_id.clone());
  next.root_source_id = incoming
    .root_source_id
    .clone()
    .or_else(|| stored.root_source_id.clone());
  if keep_tree {
    next.root_id = stored.root_id.clone();
    next.depth = stored.depth;
    next.path = stored.path.clone();
  }
  next.text_fragments = incoming
    .text_fragments
    .clone()
    .or_else(|| stored.text_fragments.clone());
  next.time_token = stored.time_token.clone().or_else(|| incoming.time_token.clone());
  if stored.approx_created_at.is_some() {
    next.approx_created_at = stored.approx_created_at;
    next.time_precision = stored.time_precision;
  }
  next.drilled = stored.drilled || incoming.drilled;
  next.reply_to = incoming.reply_to.clone().or_else(|| stored.reply_to.clone());
  next.seq = stored.seq.min(incoming.seq);
  next
}

impl ThreadStore for MemoryStore {
  type Error = MemoryError;

  async fn upsert_post(
    &self,
    post: &PostSnapshot,
    captured_at: DateTime<Utc>,
  ) -> Result<PostRow, MemoryError> {
    let mut inner = self.lock();
    if let Some(row) = inner.posts.iter_mut().find(|p| p.url == post.url) {
      row.captured_at = captured_at;
      return Ok(row.clone());
    }
    let row = PostRow { post_id: Uuid::new_v4(), url: post.url.clone(), captured_at };
    inner.posts.push(row.clone());
    Ok(row)
  }

  async fn find_post(&self, url: &str) -> Result<Option<PostRow>, MemoryError> {
    Ok(self.lock().posts.iter().find(|p| p.url == url).cloned())
  }

  async fn count_posts(&self, url: &str) -> Result<u64, MemoryError> {
    Ok(self.lock().posts.iter().filter(|p| p.url == url).count() as u64)
  }

  async fn record_run(&self, run: &RunRecord) -> Result<(), MemoryError> {
    self.lock().runs.insert((run.run_id.clone(), run.post_id));
    Ok(())
  }

  async fn upsert_comments(
    &self,
    post_id: Uuid,
    records: &[CommentRecord],
  ) -> Result<usize, MemoryError> {
    if self.fail_comments {
      return Err(MemoryError("comments rejected"));
    }
    let mut inner = self.lock();
    for record in records {
      let key = (post_id, record.id.clone());
      let next = match inner.comments.get(&key) {
        Some(stored) => upserted(stored, record),
        None => record.clone(),
      };
      inner.comments.insert(key, next);
    }
    Ok(records.len())
  }

  async fn upsert_edges(&self, post_id: Uuid, edges: &[Edge]) -> Result<usize, MemoryError> {
    let mut inner = self.lock();
    for edge in edges {
      inner
        .edges
        .insert((post_id, edge.parent_id.clone(), edge.child_id.clone()));
    }
    Ok(edges.len())
  }

  async fn list_comments(&self, post_id: Uuid) -> Result<Vec<CommentRecord>, MemoryError> {
    let mut records: Vec<_> = self
      .lock()
      .comments
      .iter()
      .filter(|((post, _), _)| *post == post_id)
      .map(|(_, record)| record.clone())
      .collect();
    records.sort_by_key(|r| r.seq);
    Ok(records)
  }

  async fn list_edges(&self, post_id: Uuid) -> Result<Vec<Edge>, MemoryError> {
    Ok(
      self
        .lock()
        .edges
        .iter()
        .filter(|(post, ..)| *post == post_id)
        .map(|(_, parent, child)| Edge::reply(parent, child))
        .collect(),
    )
  }

  async fn apply_tree_updates(
    &self,
    post_id: Uuid,
    updates: &[TreeUpdate],
  ) -> Result<usize, MemoryError> {
    let mut inner = self.lock();
    let mut touched = 0;
    for update in updates {
      if let Some(record) = inner.comments.get_mut(&(post_id, update.id.clone())) {
        update.apply_to(record);
        touched += 1;
      }
    }
    Ok(touched)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use skein_core::comment::TimePrecision;

  use super::*;
  use crate::tree::tests::record;

  #[tokio::test]
  async fn upsert_follows_the_sqlite_rules() {
    let store = MemoryStore::default();
    let post_id = Uuid::new_v4();
    let first_seen = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

    let mut stored = record("b", Some("a"), 1);
    stored.root_id = Some("a".into());
    stored.depth = Some(1);
    stored.path = Some("a/b".into());
    stored.time_token = Some("2h".into());
    stored.approx_created_at = Some(first_seen);
    stored.time_precision = TimePrecision::Approx;
    stored.drilled = true;
    store.upsert_comments(post_id, &[stored]).await.unwrap();

    let mut again = record("b", None, 7);
    again.depth = Some(0);
    again.time_token = Some("3h".into());
    again.approx_created_at = Some(first_seen - chrono::Duration::hours(1));
    again.text = "edited".into();
    store.upsert_comments(post_id, &[again]).await.unwrap();

    let rows = store.list_comments(post_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    let b = &rows[0];
    assert_eq!(b.parent_id.as_deref(), Some("a"));
    assert_eq!(b.root_id.as_deref(), Some("a"));
    assert_eq!(b.depth, Some(1));
    assert_eq!(b.path.as_deref(), Some("a/b"));
    assert_eq!(b.time_token.as_deref(), Some("2h"));
    assert_eq!(b.approx_created_at, Some(first_seen));
    assert!(b.drilled);
    assert_eq!(b.seq, 1);
    assert_eq!(b.text, "edited");
  }
}

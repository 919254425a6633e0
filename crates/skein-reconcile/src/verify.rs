//! Offline verification gate: ingest a reconciled run, re-read what landed,
//! and check it against the batch.

use std::collections::HashSet;

use serde::Serialize;
use skein_core::{comment::Edge, store::ThreadStore};
use uuid::Uuid;

use crate::{
  Error, Result,
  pipeline::{IngestConfig, Reconciled, ingest},
  text::is_ui_token,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
  pub post_id:  Option<Uuid>,
  pub comments: usize,
  pub edges:    usize,
  /// One line per failed check; empty when everything held.
  pub failures: Vec<String>,
}

impl VerifyReport {
  pub fn passed(&self) -> bool { self.failures.is_empty() }

  fn check(&mut self, ok: bool, failure: impl FnOnce() -> String) {
    if !ok {
      self.failures.push(failure());
    }
  }
}

struct Snapshot {
  posts:    u64,
  comments: Vec<String>,
  edges:    Vec<Edge>,
}

async fn snapshot<S: ThreadStore>(store: &S, url: &str) -> Result<Snapshot> {
  let posts = store.count_posts(url).await.map_err(Error::persistence)?;
  let Some(post) = store.find_post(url).await.map_err(Error::persistence)? else {
    return Ok(Snapshot { posts, comments: Vec::new(), edges: Vec::new() });
  };
  let comments = store
    .list_comments(post.post_id)
    .await
    .map_err(Error::persistence)?
    .into_iter()
    .map(|r| r.id)
    .collect();
  let edges = store.list_edges(post.post_id).await.map_err(Error::persistence)?;
  Ok(Snapshot { posts, comments, edges })
}

/// Ingest `reconciled` twice and check the stored state.
///
/// Rows stored by earlier runs of the same post are allowed; the stored set
/// must then equal the earlier rows plus the batch.
pub async fn verify_ingest<S: ThreadStore>(
  store: &S,
  reconciled: &Reconciled,
  config: &IngestConfig,
) -> Result<VerifyReport> {
  let url = reconciled.post.url.as_str();
  let mut report = VerifyReport::default();

  // The batch itself.
  let emitted: HashSet<&str> = reconciled.records.iter().map(|r| r.id.as_str()).collect();
  report.check(emitted.len() == reconciled.records.len(), || {
    "batch contains duplicate stable ids".into()
  });

  let before = snapshot(store, url).await?;

  // Parents may come from an earlier run; children must be in the batch.
  let resolvable: HashSet<&str> = before
    .comments
    .iter()
    .map(String::as_str)
    .chain(emitted.iter().copied())
    .collect();
  for edge in &reconciled.edges {
    report.check(edge.parent_id != edge.child_id, || {
      format!("batch self-loop edge on {}", edge.child_id)
    });
    report.check(
      resolvable.contains(edge.parent_id.as_str()) && emitted.contains(edge.child_id.as_str()),
      || format!("batch edge {} -> {} has a missing endpoint", edge.parent_id, edge.child_id),
    );
  }

  let first = ingest(store, reconciled, config).await;
  report.post_id = first.post_id;
  for failure in &first.failures {
    report.failures.push(format!("ingest: {failure}"));
  }
  let after = snapshot(store, url).await?;
  report.comments = after.comments.len();
  report.edges = after.edges.len();

  report.check(after.posts == 1, || format!("{} post rows for {url}", after.posts));

  let stored: HashSet<&str> = after.comments.iter().map(String::as_str).collect();
  report.check(stored.len() == after.comments.len(), || {
    "stored comments contain duplicate stable ids".into()
  });
  let expected = resolvable;
  report.check(stored == expected, || {
    format!("stored {} comments, expected {}", stored.len(), expected.len())
  });

  let stored_edges: HashSet<&Edge> = after.edges.iter().collect();
  let expected_edges: HashSet<&Edge> = before.edges.iter().chain(&reconciled.edges).collect();
  report.check(stored_edges == expected_edges, || {
    format!("stored {} edges, expected {}", stored_edges.len(), expected_edges.len())
  });
  for edge in &after.edges {
    report.check(edge.parent_id != edge.child_id, || {
      format!("stored self-loop edge on {}", edge.child_id)
    });
  }

  if let Some(post_id) = first.post_id {
    let records = store.list_comments(post_id).await.map_err(Error::persistence)?;
    for record in records {
      report.check(!is_ui_token(record.text.trim()), || {
        format!("comment {} stores UI boilerplate {:?}", record.id, record.text)
      });
    }
  }

  let second = ingest(store, reconciled, config).await;
  for failure in &second.failures {
    report.failures.push(format!("re-ingest: {failure}"));
  }
  let again = snapshot(store, url).await?;
  report.check(
    again.posts == after.posts
      && again.comments.len() == after.comments.len()
      && again.edges.len() == after.edges.len(),
    || {
      format!(
        "re-ingest changed counts: posts {}→{}, comments {}→{}, edges {}→{}",
        after.posts,
        again.posts,
        after.comments.len(),
        again.comments.len(),
        after.edges.len(),
        again.edges.len()
      )
    },
  );

  Ok(report)
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use skein_core::comment::CommentRecord;

  use super::*;
  use crate::{harvest::Harvest, pipeline::reconcile, test_store::MemoryStore};

  fn empty_run() -> Reconciled {
    let crawled = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    reconcile(&Harvest::empty("https://www.threads.net/@op/post/ROOT", crawled), &[])
  }

  fn record(id: &str, parent: Option<&str>, seq: u32, text: &str) -> CommentRecord {
    let mut r = crate::tree::tests::record(id, parent, seq);
    r.text = text.into();
    r
  }

  fn with_records(records: Vec<CommentRecord>) -> Reconciled {
    let mut run = empty_run();
    run.edges = skein_core::comment::edges_for(&records);
    run.records = records;
    run
  }

  #[tokio::test]
  async fn clean_run_passes() {
    let store = MemoryStore::default();
    let run = with_records(vec![record("a", None, 0, "hi"), record("b", Some("a"), 1, "yo")]);
    let report = verify_ingest(&store, &run, &IngestConfig::default()).await.unwrap();
    assert!(report.passed(), "{:?}", report.failures);
    assert_eq!(report.comments, 2);
    assert_eq!(report.edges, 1);
  }

  #[tokio::test]
  async fn empty_run_passes() {
    let store = MemoryStore::default();
    let report = verify_ingest(&store, &empty_run(), &IngestConfig::default()).await.unwrap();
    assert!(report.passed(), "{:?}", report.failures);
    assert_eq!(report.comments, 0);
  }

  #[tokio::test]
  async fn earlier_rows_are_allowed() {
    let store = MemoryStore::default();
    let first = with_records(vec![record("a", None, 0, "hi")]);
    let config = IngestConfig::default();
    assert!(ingest(&store, &first, &config).await.ok);

    let second = with_records(vec![record("b", None, 1, "later")]);
    let report = verify_ingest(&store, &second, &config).await.unwrap();
    assert!(report.passed(), "{:?}", report.failures);
    assert_eq!(report.comments, 2);
  }

  #[tokio::test]
  async fn boilerplate_and_bad_edges_are_reported() {
    let store = MemoryStore::default();
    let mut run = with_records(vec![record("a", None, 0, "Reply")]);
    run.edges.push(Edge::reply("a", "a"));
    run.edges.push(Edge::reply("a", "ghost"));
    let report = verify_ingest(&store, &run, &IngestConfig::default()).await.unwrap();
    assert!(!report.passed());
    let joined = report.failures.join("\n");
    assert!(joined.contains("batch self-loop"));
    assert!(joined.contains("missing endpoint"));
    assert!(joined.contains("UI boilerplate"));
    assert!(joined.contains("stored self-loop"));
  }

  #[tokio::test]
  async fn persistence_failures_fail_the_gate() {
    let store = MemoryStore::failing_comments();
    let run = with_records(vec![record("a", None, 0, "hi")]);
    let report = verify_ingest(&store, &run, &IngestConfig::default()).await.unwrap();
    assert!(!report.passed());
    assert!(report.failures.iter().any(|f| f.starts_with("ingest:")));
  }

  #[tokio::test]
  async fn stored_rows_for_post_id_are_checked() {
    let store = MemoryStore::default();
    let run = with_records(vec![record("a", None, 0, "hi")]);
    let first = ingest(&store, &run, &IngestConfig::default()).await;
    store.put(first.post_id.unwrap(), record("junk", None, 9, "Like"));
    let report = verify_ingest(&store, &run, &IngestConfig::default()).await.unwrap();
    assert!(report.failures.iter().any(|f| f.contains("junk")));
  }
}

//! Harvest → identity → merge → repair → persistence.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_core::{
  comment::{CommentRecord, Edge, MetricsConfidence, edges_for},
  post::{PostSnapshot, RunRecord},
  store::ThreadStore,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  harvest::Harvest,
  identity::IdentityResolver,
  merge::MergeEngine,
  repair::{RepairOutcome, apply_updates, repair},
};

pub const FETCHER_VERSION: &str = concat!("skein/", env!("CARGO_PKG_VERSION"));

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// What one run hands to persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  pub merged_total:     usize,
  pub exact:            usize,
  pub partial:          usize,
  pub missing:          usize,
  pub drill_candidates: usize,
  pub drilled_ok:       usize,
  pub drilled_failed:   usize,
  /// Records touched by at least one drill observation.
  pub drilled_records:  usize,
  pub repair_passes:    usize,
  pub repair_converged: bool,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
  /// Deterministic for a given post and crawl time.
  pub run_id:     String,
  pub post:       PostSnapshot,
  pub crawled_at: DateTime<Utc>,
  pub records:    Vec<CommentRecord>,
  pub edges:      Vec<Edge>,
  pub summary:    RunSummary,
}

/// Resolve, merge and repair one harvest. `known` are the records already
/// stored for the post; their ids and discovery order are reused.
pub fn reconcile(harvest: &Harvest, known: &[CommentRecord]) -> Reconciled {
  let mut resolver = IdentityResolver::seeded(known);
  let mut engine = MergeEngine::new();

  for obs in &harvest.observations {
    let id = resolver.resolve_observation(obs);
    let explicit_parent = obs
      .anchor
      .as_ref()
      .and_then(|anchor| resolver.lookup_anchor(anchor))
      .or_else(|| {
        obs
          .parent_native_id
          .as_deref()
          .and_then(|native| resolver.lookup_native(native))
      });
    engine.fold(&id, obs, explicit_parent.as_deref());
  }

  let mut records = engine.finish(harvest.crawled_at);
  continue_discovery_order(&mut records, known);

  // Stored records not seen this run still anchor parent links.
  let merged: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
  let context: Vec<CommentRecord> = known
    .iter()
    .filter(|k| !merged.contains(k.id.as_str()))
    .cloned()
    .collect();
  let mut universe = records.clone();
  universe.extend(context);
  let outcome = repair(&universe);
  apply_updates(&mut records, &outcome.updates);
  apply_updates(&mut universe, &outcome.updates);

  // A reply to a stored parent still needs its edge; stored children already
  // have theirs.
  let fresh: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
  let edges: Vec<Edge> = edges_for(&universe)
    .into_iter()
    .filter(|e| fresh.contains(e.child_id.as_str()))
    .collect();
  let summary = summarize(&records, harvest, &outcome);
  info!(
    url = %harvest.post.url,
    merged = summary.merged_total,
    exact = summary.exact,
    partial = summary.partial,
    missing = summary.missing,
    edges = edges.len(),
    "reconciled"
  );

  Reconciled {
    run_id: run_id(&harvest.post, harvest.crawled_at),
    post: harvest.post.clone(),
    crawled_at: harvest.crawled_at,
    records,
    edges,
    summary,
  }
}

/// Records already stored keep their sequence number; new ones continue after
/// the highest stored one.
fn continue_discovery_order(records: &mut [CommentRecord], known: &[CommentRecord]) {
  let stored: HashMap<&str, u32> = known.iter().map(|k| (k.id.as_str(), k.seq)).collect();
  let base = known.iter().map(|k| k.seq + 1).max().unwrap_or(0);
  for record in records.iter_mut() {
    record.seq = stored
      .get(record.id.as_str())
      .copied()
      .unwrap_or(base + record.seq);
  }
  records.sort_by_key(|r| r.seq);
}

fn run_id(post: &PostSnapshot, crawled_at: DateTime<Utc>) -> String {
  format!("{}-{}", crawled_at.format("%Y%m%dT%H%M%SZ"), post.external_id)
}

fn summarize(records: &[CommentRecord], harvest: &Harvest, outcome: &RepairOutcome) -> RunSummary {
  let mut summary = RunSummary {
    merged_total: records.len(),
    drill_candidates: harvest.stats.drill_candidates,
    drilled_ok: harvest.stats.drilled_ok,
    drilled_failed: harvest.stats.drilled_failed,
    repair_passes: outcome.passes,
    repair_converged: outcome.converged,
    ..Default::default()
  };
  for record in records {
    match record.metrics_confidence() {
      MetricsConfidence::Exact => summary.exact += 1,
      MetricsConfidence::Partial => summary.partial += 1,
      MetricsConfidence::Missing => summary.missing += 1,
    }
    if record.drilled {
      summary.drilled_records += 1;
    }
  }
  summary
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  pub comment_chunk: usize,
  pub edge_chunk:    usize,
}

impl Default for IngestConfig {
  fn default() -> Self { Self { comment_chunk: 200, edge_chunk: 300 } }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
  pub run_id:           String,
  pub post_id:          Option<Uuid>,
  pub comments_written: usize,
  pub edges_written:    usize,
  /// One message per failed write.
  pub failures:         Vec<String>,
  pub ok:               bool,
}

impl IngestReport {
  fn fail(&mut self, what: &str, err: Error) {
    warn!(%err, what, "persistence failure");
    self.failures.push(format!("{what}: {err}"));
    self.ok = false;
  }
}

/// Write a reconciled run. Every write is an idempotent upsert, so a run that
/// comes back with `ok == false` can simply be ingested again.
pub async fn ingest<S: ThreadStore>(
  store: &S,
  reconciled: &Reconciled,
  config: &IngestConfig,
) -> IngestReport {
  let mut report = IngestReport {
    run_id: reconciled.run_id.clone(),
    ok: true,
    ..Default::default()
  };

  let post = match store.upsert_post(&reconciled.post, reconciled.crawled_at).await {
    Ok(post) => post,
    Err(err) => {
      report.fail("post", Error::persistence(err));
      return report;
    }
  };
  report.post_id = Some(post.post_id);

  for chunk in reconciled.records.chunks(config.comment_chunk.max(1)) {
    match store.upsert_comments(post.post_id, chunk).await {
      Ok(written) => report.comments_written += written,
      Err(err) => report.fail("comments", Error::persistence(err)),
    }
  }
  for chunk in reconciled.edges.chunks(config.edge_chunk.max(1)) {
    match store.upsert_edges(post.post_id, chunk).await {
      Ok(written) => report.edges_written += written,
      Err(err) => report.fail("edges", Error::persistence(err)),
    }
  }

  let run = RunRecord {
    run_id:          reconciled.run_id.clone(),
    post_id:         post.post_id,
    crawled_at:      reconciled.crawled_at,
    fetcher_version: FETCHER_VERSION.to_owned(),
    comment_count:   reconciled.records.len() as u64,
    edge_count:      reconciled.edges.len() as u64,
  };
  if let Err(err) = store.record_run(&run).await {
    report.fail("run", Error::persistence(err));
  }

  info!(
    post_id = %post.post_id,
    comments = report.comments_written,
    edges = report.edges_written,
    ok = report.ok,
    "ingested"
  );
  report
}

/// Records already stored for `url`, empty when the post is new.
pub async fn known_records<S: ThreadStore>(store: &S, url: &str) -> Result<Vec<CommentRecord>> {
  match store.find_post(url).await.map_err(Error::persistence)? {
    Some(post) => store.list_comments(post.post_id).await.map_err(Error::persistence),
    None => Ok(Vec::new()),
  }
}

/// Re-run tree repair over everything stored for a post and write back only
/// what changed, plus the edges every stored link implies.
pub async fn repair_stored<S: ThreadStore>(store: &S, post_id: Uuid) -> Result<RepairOutcome> {
  let mut records = store.list_comments(post_id).await.map_err(Error::persistence)?;
  let outcome = repair(&records);
  if !outcome.updates.is_empty() {
    store
      .apply_tree_updates(post_id, &outcome.updates)
      .await
      .map_err(Error::persistence)?;
    apply_updates(&mut records, &outcome.updates);
  }

  // Edge upserts are idempotent; writing all of them backfills any link whose
  // edge never landed.
  let edges = edges_for(&records);
  store.upsert_edges(post_id, &edges).await.map_err(Error::persistence)?;

  info!(%post_id, updates = outcome.updates.len(), passes = outcome.passes, "stored tree repaired");
  Ok(outcome)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use skein_core::{
    card::{RawCard, RawMetric, RawMetrics},
    comment::Source,
  };

  use super::*;
  use crate::{
    harvest::HarvestStats,
    normalize::{Anchor, Observation, normalize},
    test_store::MemoryStore,
  };

  fn crawled() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() }

  fn observe(handle: &str, text: &str, source: Source, seq: u32) -> Observation {
    let card = RawCard {
      handle: handle.into(),
      body_text: text.into(),
      metrics: RawMetrics { likes: RawMetric::present(1), ..Default::default() },
      ..Default::default()
    };
    let mut obs = normalize(&card, source).unwrap();
    obs.seq = seq;
    obs
  }

  fn harvest(observations: Vec<Observation>) -> Harvest {
    let mut h = Harvest::empty("https://www.threads.net/@op/post/ROOT", crawled());
    h.observations = observations;
    h.stats = HarvestStats { drill_candidates: 1, drilled_ok: 1, ..Default::default() };
    h
  }

  fn drill_thread() -> Harvest {
    let parent = observe("alice", "parent", Source::Main, 0);
    let anchor = Anchor { fingerprint: parent.fingerprint.clone(), native_id: None };
    let mut reply = observe("bob", "child", Source::Drill, 2);
    reply.anchor = Some(anchor);
    harvest(vec![
      parent.clone(),
      Observation { seq: 1, source: Source::Drill, ..parent },
      reply,
    ])
  }

  #[test]
  fn drill_replies_hang_under_their_anchor() {
    let out = reconcile(&drill_thread(), &[]);
    assert_eq!(out.records.len(), 2);
    let parent = &out.records[0];
    let reply = &out.records[1];
    assert_eq!(reply.parent_id.as_deref(), Some(parent.id.as_str()));
    assert_eq!(reply.depth, Some(1));
    assert_eq!(out.edges, vec![Edge::reply(&parent.id, &reply.id)]);
    assert!(parent.drilled);
    assert_eq!(out.summary.drilled_records, 2);
    assert_eq!(out.summary.partial, 2);
    assert!(out.summary.repair_converged);
  }

  #[test]
  fn zero_observations_reconcile_to_nothing() {
    let out = reconcile(&harvest(vec![]), &[]);
    assert!(out.records.is_empty());
    assert!(out.edges.is_empty());
    assert_eq!(out.summary.merged_total, 0);
  }

  #[test]
  fn known_records_keep_ids_and_order() {
    let first = reconcile(&drill_thread(), &[]);
    let mut second_input = drill_thread();
    second_input.observations.insert(0, observe("zed", "new one", Source::Main, 0));
    for (seq, obs) in second_input.observations.iter_mut().enumerate() {
      obs.seq = seq as u32;
    }
    let second = reconcile(&second_input, &first.records);

    let ids = |r: &Reconciled| r.records.iter().map(|c| c.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&second)[..2], ids(&first)[..]);
    assert_eq!(second.records[2].author, "zed");
    assert!(second.records[2].seq > second.records[1].seq);
  }

  #[tokio::test]
  async fn ingest_twice_keeps_counts() {
    let store = MemoryStore::default();
    let out = reconcile(&drill_thread(), &[]);
    let config = IngestConfig { comment_chunk: 1, edge_chunk: 1 };

    let first = ingest(&store, &out, &config).await;
    assert!(first.ok);
    assert_eq!(first.comments_written, 2);
    let post_id = first.post_id.unwrap();
    let second = ingest(&store, &out, &config).await;
    assert_eq!(second.post_id, Some(post_id));

    assert_eq!(store.list_comments(post_id).await.unwrap().len(), 2);
    assert_eq!(store.list_edges(post_id).await.unwrap().len(), 1);
    assert_eq!(store.count_posts(&out.post.url).await.unwrap(), 1);
    assert_eq!(store.run_count(), 1);
  }

  #[tokio::test]
  async fn persistence_failure_marks_the_run_and_keeps_the_batch() {
    let store = MemoryStore::failing_comments();
    let out = reconcile(&drill_thread(), &[]);
    let report = ingest(&store, &out, &IngestConfig::default()).await;
    assert!(!report.ok);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(out.records.len(), 2);
  }

  #[tokio::test]
  async fn stored_repair_fills_heuristic_parents() {
    let store = MemoryStore::default();
    let mut alice = observe("alice", "question", Source::Main, 0);
    alice.native_id = Some("X".into());
    let mut bob = observe("bob", "Replying to @alice\nanswer", Source::Drill, 1);
    bob.reply_to = Some("alice".into());
    let out = reconcile(&harvest(vec![alice, bob]), &[]);
    assert_eq!(out.records[1].parent_source_id.as_deref(), Some("X"));

    let report = ingest(&store, &out, &IngestConfig::default()).await;
    let post_id = report.post_id.unwrap();
    let outcome = repair_stored(&store, post_id).await.unwrap();
    assert!(outcome.updates.is_empty());
    assert_eq!(store.list_edges(post_id).await.unwrap().len(), 1);
  }

  fn native(handle: &str, text: &str, id: &str, parent: Option<&str>) -> Observation {
    let mut obs = observe(handle, text, Source::Main, 0);
    obs.native_id = Some(id.into());
    obs.parent_native_id = parent.map(Into::into);
    obs
  }

  #[test]
  fn reply_to_a_parent_from_an_earlier_run_gets_its_edge() {
    let first = reconcile(&harvest(vec![native("alice", "question", "P1", None)]), &[]);
    let second = reconcile(
      &harvest(vec![native("bob", "answer", "C1", Some("P1"))]),
      &first.records,
    );

    assert_eq!(second.records.len(), 1);
    let child = &second.records[0];
    assert_eq!(child.parent_id.as_deref(), Some("P1"));
    assert_eq!(child.depth, Some(1));
    assert_eq!(second.edges, vec![Edge::reply("P1", "C1")]);
  }

  #[tokio::test]
  async fn cross_run_reply_lands_as_a_stored_edge() {
    let store = MemoryStore::default();
    let config = IngestConfig::default();
    let first = reconcile(&harvest(vec![native("alice", "question", "P1", None)]), &[]);
    assert!(ingest(&store, &first, &config).await.ok);

    let known = known_records(&store, &first.post.url).await.unwrap();
    let second = reconcile(&harvest(vec![native("bob", "answer", "C1", Some("P1"))]), &known);
    let report = crate::verify_ingest(&store, &second, &config).await.unwrap();
    assert!(report.passed(), "{:?}", report.failures);

    let post_id = report.post_id.unwrap();
    assert_eq!(store.list_edges(post_id).await.unwrap(), vec![Edge::reply("P1", "C1")]);
  }

  #[tokio::test]
  async fn stored_repair_backfills_missing_edges() {
    let store = MemoryStore::default();
    let out = reconcile(&harvest(vec![]), &[]);
    let post_id = ingest(&store, &out, &IngestConfig::default()).await.post_id.unwrap();
    let mut parent = crate::tree::tests::record("p", None, 0);
    parent.depth = Some(0);
    parent.root_id = Some("p".into());
    parent.path = Some("p".into());
    let mut child = crate::tree::tests::record("c", Some("p"), 1);
    child.depth = Some(1);
    child.root_id = Some("p".into());
    child.path = Some("p/c".into());
    store.put(post_id, parent);
    store.put(post_id, child);

    repair_stored(&store, post_id).await.unwrap();
    assert_eq!(store.list_edges(post_id).await.unwrap(), vec![Edge::reply("p", "c")]);
  }

  #[tokio::test]
  async fn known_records_of_unknown_post_are_empty() {
    let store = MemoryStore::default();
    assert!(known_records(&store, "https://nowhere").await.unwrap().is_empty());
  }
}

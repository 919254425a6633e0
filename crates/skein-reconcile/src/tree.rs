//! Nested projection of a flat record set, as exported to consumers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use skein_core::comment::{CommentRecord, Metrics, MetricsConfidence, TimePrecision};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadNode {
  pub comment_id:         String,
  pub parent_id:          Option<String>,
  pub author:             String,
  pub text:               String,
  pub metrics:            Metrics,
  pub metrics_confidence: MetricsConfidence,
  pub time_token:         Option<String>,
  pub approx_created_at:  Option<DateTime<Utc>>,
  pub time_precision:     TimePrecision,
  pub replies:            Vec<ThreadNode>,
}

impl ThreadNode {
  /// Number of nodes in this subtree, itself included.
  pub fn size(&self) -> usize { 1 + self.replies.iter().map(Self::size).sum::<usize>() }
}

/// Nest `records` under their parents in discovery order. Records whose
/// parent is missing from the set become top-level nodes, and every record
/// appears exactly once even when the parent links form a cycle.
pub fn build_thread_tree(records: &[CommentRecord]) -> Vec<ThreadNode> {
  let mut order: Vec<usize> = (0..records.len()).collect();
  order.sort_by_key(|&idx| records[idx].seq);

  let index: HashMap<&str, usize> = records
    .iter()
    .enumerate()
    .map(|(idx, r)| (r.id.as_str(), idx))
    .collect();
  let parent_of = |idx: usize| {
    records[idx]
      .parent_id
      .as_deref()
      .and_then(|p| index.get(p).copied())
      .filter(|&p| p != idx)
  };

  let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
  for &idx in &order {
    if let Some(parent) = parent_of(idx) {
      children[parent].push(idx);
    }
  }

  let mut visited = vec![false; records.len()];
  let mut roots = Vec::new();
  for &idx in &order {
    if parent_of(idx).is_none() {
      roots.push(build(idx, records, &children, &mut visited));
    }
  }
  // Whatever is left hangs off a cycle; surface it from its earliest member.
  for &idx in &order {
    if !visited[idx] {
      roots.push(build(idx, records, &children, &mut visited));
    }
  }
  roots
}

fn build(
  idx: usize,
  records: &[CommentRecord],
  children: &[Vec<usize>],
  visited: &mut [bool],
) -> ThreadNode {
  visited[idx] = true;
  let mut replies = Vec::new();
  for &child in &children[idx] {
    if !visited[child] {
      replies.push(build(child, records, children, visited));
    }
  }

  let record = &records[idx];
  ThreadNode {
    comment_id: record.id.clone(),
    parent_id: record.parent_id.clone(),
    author: record.author.clone(),
    text: record.text.clone(),
    metrics: record.metrics,
    metrics_confidence: record.metrics_confidence(),
    time_token: record.time_token.clone(),
    approx_created_at: record.approx_created_at,
    time_precision: record.time_precision,
    replies,
  }
}

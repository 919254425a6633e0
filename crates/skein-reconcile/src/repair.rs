//! Tree repair: recover parent, root, depth and path from partial evidence.
//!
//! Records live in an arena addressed by index. Each pass walks them in
//! capture order (timestamped records first, by time, then the rest by
//! discovery order) and places every record under the parent its evidence
//! names:
//!
//! 1. `parent_id`, when it names a record in the set;
//! 2. `parent_source_id`, through the native-id map;
//! 3. only when neither link exists, the most recent earlier record by the
//!    author named in a "replying to" cue.
//!
//! A candidate parent whose path already contains the record is refused, so
//! no pass can close a cycle. Passes stop at a fixed point or after
//! [`MAX_REPAIR_PASSES`]; a final settle step then derives depth, root and
//! path top-down from the chosen parents, which keeps the output consistent
//! even when the bound was hit.

use std::{
  cmp::Ordering,
  collections::{HashMap, HashSet},
};

use skein_core::comment::{CommentRecord, TreeUpdate};
use tracing::{debug, warn};

pub const MAX_REPAIR_PASSES: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
  /// Only records with at least one changed field, and only those fields.
  pub updates:   Vec<TreeUpdate>,
  pub passes:    usize,
  /// `false` when the pass bound was hit before a fixed point.
  pub converged: bool,
}

pub fn repair(records: &[CommentRecord]) -> RepairOutcome {
  let arena = Arena::new(records);
  let mut placements: Vec<Placement> = records
    .iter()
    .enumerate()
    .map(|(idx, r)| Placement::root(idx, &r.id))
    .collect();

  let mut passes = 0;
  let mut converged = false;
  while passes < MAX_REPAIR_PASSES {
    passes += 1;
    if !arena.relax(&mut placements) {
      converged = true;
      break;
    }
  }
  if !converged && !records.is_empty() {
    warn!(passes, records = records.len(), "tree repair hit its pass bound");
  }

  arena.settle(&mut placements);
  let updates = arena.diff(&placements);
  debug!(passes, converged, updates = updates.len(), "tree repair finished");
  RepairOutcome { updates, passes, converged }
}

/// Fold `updates` into `records` in place.
pub fn apply_updates(records: &mut [CommentRecord], updates: &[TreeUpdate]) {
  let index: HashMap<String, usize> = records
    .iter()
    .enumerate()
    .map(|(idx, r)| (r.id.clone(), idx))
    .collect();
  for update in updates {
    if let Some(&idx) = index.get(&update.id) {
      update.apply_to(&mut records[idx]);
    }
  }
}

// ─── Arena ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
  None,
  Explicit,
  Heuristic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
  parent: Option<usize>,
  link:   Link,
  root:   usize,
  depth:  u32,
  path:   String,
}

impl Placement {
  fn root(idx: usize, id: &str) -> Self {
    Self { parent: None, link: Link::None, root: idx, depth: 0, path: id.to_owned() }
  }

  fn under(parent_idx: usize, parent: &Placement, link: Link, id: &str) -> Self {
    Self {
      parent: Some(parent_idx),
      link,
      root: parent.root,
      depth: parent.depth + 1,
      path: format!("{}/{id}", parent.path),
    }
  }
}

fn path_contains(path: &str, id: &str) -> bool { path.split('/').any(|seg| seg == id) }

struct Arena<'r> {
  records:   &'r [CommentRecord],
  order:     Vec<usize>,
  by_id:     HashMap<&'r str, usize>,
  by_native: HashMap<&'r str, usize>,
}

impl<'r> Arena<'r> {
  fn new(records: &'r [CommentRecord]) -> Self {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|&a, &b| capture_order(&records[a], &records[b]));

    let mut by_id = HashMap::new();
    let mut by_native = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
      by_id.entry(record.id.as_str()).or_insert(idx);
      if let Some(native) = record.source_id.as_deref() {
        by_native.entry(native).or_insert(idx);
      }
    }
    Self { records, order, by_id, by_native }
  }

  fn resolve(&self, idx: usize, latest_by_author: &HashMap<&str, usize>) -> Option<(usize, Link)> {
    let record = &self.records[idx];
    let explicit = record
      .parent_id
      .as_deref()
      .and_then(|id| self.by_id.get(id))
      .or_else(|| {
        record
          .parent_source_id
          .as_deref()
          .and_then(|native| self.by_native.get(native))
      })
      .copied()
      .filter(|&p| p != idx);
    if let Some(parent) = explicit {
      return Some((parent, Link::Explicit));
    }
    if record.parent_id.is_some() || record.parent_source_id.is_some() {
      return None;
    }
    let handle = record.reply_to.as_deref()?;
    latest_by_author
      .get(handle)
      .copied()
      .filter(|&p| p != idx)
      .map(|p| (p, Link::Heuristic))
  }

  /// One relaxation pass. Returns whether any placement changed.
  fn relax(&self, placements: &mut [Placement]) -> bool {
    let mut latest_by_author: HashMap<&str, usize> = HashMap::new();
    let mut changed = false;
    for &idx in &self.order {
      let record = &self.records[idx];
      let next = match self.resolve(idx, &latest_by_author) {
        Some((parent, link)) if !path_contains(&placements[parent].path, &record.id) => {
          Placement::under(parent, &placements[parent], link, &record.id)
        }
        _ => Placement::root(idx, &record.id),
      };
      if placements[idx] != next {
        placements[idx] = next;
        changed = true;
      }
      if !record.author.is_empty() {
        latest_by_author.insert(record.author.as_str(), idx);
      }
    }
    changed
  }

  /// Recompute every placement from its parent, parents first, cutting any
  /// cycle the chosen links still form.
  fn settle(&self, placements: &mut [Placement]) {
    let mut done = vec![false; placements.len()];
    for &start in &self.order {
      let mut chain = Vec::new();
      let mut on_chain = HashSet::new();
      let mut cur = start;
      loop {
        if done[cur] {
          break;
        }
        if !on_chain.insert(cur) {
          if let Some(&last) = chain.last() {
            let cut: &mut Placement = &mut placements[last];
            cut.parent = None;
            cut.link = Link::None;
          }
          break;
        }
        chain.push(cur);
        match placements[cur].parent {
          Some(parent) => cur = parent,
          None => break,
        }
      }

      for &node in chain.iter().rev() {
        let id = &self.records[node].id;
        let next = match placements[node].parent {
          Some(parent) => Placement::under(parent, &placements[parent], placements[node].link, id),
          None => Placement::root(node, id),
        };
        placements[node] = next;
        done[node] = true;
      }
    }
  }

  fn diff(&self, placements: &[Placement]) -> Vec<TreeUpdate> {
    self
      .records
      .iter()
      .zip(placements)
      .filter_map(|(record, placement)| {
        let parent = placement.parent.map(|p| &self.records[p]);
        let parent_id = parent.map(|p| p.id.clone());
        let parent_source_id = match parent {
          Some(p) => record.parent_source_id.clone().or_else(|| p.source_id.clone()),
          None => record.parent_source_id.clone(),
        };
        let root_id = &self.records[placement.root].id;

        let mut update = TreeUpdate { id: record.id.clone(), ..Default::default() };
        if record.parent_id != parent_id {
          update.parent_id = Some(parent_id);
        }
        if record.parent_source_id != parent_source_id {
          update.parent_source_id = Some(parent_source_id);
        }
        if record.root_id.as_ref() != Some(root_id) {
          update.root_id = Some(root_id.clone());
        }
        if record.depth != Some(placement.depth) {
          update.depth = Some(placement.depth);
        }
        if record.path.as_deref() != Some(placement.path.as_str()) {
          update.path = Some(placement.path.clone());
        }
        (!update.is_empty()).then_some(update)
      })
      .collect()
  }
}

/// Timestamped records first, oldest first; then the rest. Discovery order
/// breaks ties.
fn capture_order(a: &CommentRecord, b: &CommentRecord) -> Ordering {
  match (a.approx_created_at, b.approx_created_at) {
    (Some(x), Some(y)) => x.cmp(&y).then(a.seq.cmp(&b.seq)),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => a.seq.cmp(&b.seq),
  }
}

//! Merge engine: folds every observation of one identity into one record.
//!
//! Better evidence wins, whatever order it arrives in:
//!
//! * a metric channel only changes when an observation reports it present,
//!   and presence only ever accumulates;
//! * text only changes for a candidate with a strictly lower noise score;
//! * images only grow;
//! * the time token is set once;
//! * a parent link is only adopted while the record has none.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use skein_core::comment::{
  CommentRecord, Metrics, MetricsPresence, Source, TimePrecision,
};

use crate::{
  normalize::Observation,
  text::{dedupe_urls, time_token_delta, ui_noise_score},
};

/// One observation with its resolved identity.
#[derive(Debug, Clone)]
pub struct Resolved {
  pub id:              String,
  pub observation:     Observation,
  /// Stable id of an explicitly evidenced parent, when already resolvable.
  pub explicit_parent: Option<String>,
}

#[derive(Debug, Default)]
pub struct MergeEngine {
  records: Vec<CommentRecord>,
  index:   HashMap<String, usize>,
}

impl MergeEngine {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize { self.records.len() }

  pub fn is_empty(&self) -> bool { self.records.is_empty() }

  pub fn get(&self, id: &str) -> Option<&CommentRecord> {
    self.index.get(id).map(|&idx| &self.records[idx])
  }

  pub fn fold(&mut self, id: &str, obs: &Observation, explicit_parent: Option<&str>) {
    let explicit_parent = explicit_parent.filter(|p| *p != id);
    match self.index.get(id) {
      Some(&idx) => absorb(&mut self.records[idx], obs, explicit_parent),
      None => {
        self.index.insert(id.to_owned(), self.records.len());
        self.records.push(create(id, obs, explicit_parent));
      }
    }
  }

  /// Fill approximate timestamps from time tokens, drop self-links, and
  /// return the records in first-discovery order.
  pub fn finish(self, crawled_at: DateTime<Utc>) -> Vec<CommentRecord> {
    let mut records = self.records;
    for record in &mut records {
      if record.approx_created_at.is_none() {
        if let Some(delta) = record.time_token.as_deref().and_then(time_token_delta) {
          record.approx_created_at = crawled_at.checked_sub_signed(delta);
        }
      }
      record.time_precision = match record.approx_created_at {
        Some(_) => TimePrecision::Approx,
        None => TimePrecision::Unknown,
      };
      if record.parent_id.as_deref() == Some(record.id.as_str()) {
        record.parent_id = None;
      }
      if record.parent_source_id.is_some() && record.parent_source_id == record.source_id {
        record.parent_source_id = None;
      }
    }
    records.sort_by_key(|r| r.seq);
    records
  }
}

/// Fold a whole resolved stream.
pub fn merge(
  resolved: impl IntoIterator<Item = Resolved>,
  crawled_at: DateTime<Utc>,
) -> Vec<CommentRecord> {
  let mut engine = MergeEngine::new();
  for item in resolved {
    engine.fold(&item.id, &item.observation, item.explicit_parent.as_deref());
  }
  engine.finish(crawled_at)
}

fn create(id: &str, obs: &Observation, explicit_parent: Option<&str>) -> CommentRecord {
  let mut metrics = Metrics::default();
  let mut presence = MetricsPresence::default();
  apply_readings(&mut metrics, &mut presence, obs);

  CommentRecord {
    id: id.to_owned(),
    source_id: obs.native_id.clone(),
    parent_id: explicit_parent.map(str::to_owned),
    parent_source_id: obs.parent_native_id.clone(),
    root_source_id: obs.root_native_id.clone(),
    root_id: None,
    fingerprint: obs.fingerprint.to_string(),
    author: obs.handle.clone(),
    text: obs.text.clone(),
    text_fragments: obs.text_fragments.clone(),
    metrics,
    presence,
    images: obs.images.clone(),
    time_token: obs.time_token.clone(),
    approx_created_at: obs.taken_at,
    time_precision: TimePrecision::Unknown,
    source: obs.source,
    drilled: obs.source == Source::Drill,
    reply_to: obs.reply_to.clone(),
    depth: None,
    path: None,
    seq: obs.seq,
  }
}

fn absorb(record: &mut CommentRecord, obs: &Observation, explicit_parent: Option<&str>) {
  apply_readings(&mut record.metrics, &mut record.presence, obs);

  let current_noise = ui_noise_score(&record.text);
  let fills_blank = record.text.is_empty() && !obs.text.is_empty() && obs.noise == 0;
  if obs.noise < current_noise || fills_blank {
    record.text = obs.text.clone();
    if obs.text_fragments.is_some() {
      record.text_fragments = obs.text_fragments.clone();
    }
  }

  if !obs.images.is_empty() {
    record.images = dedupe_urls(record.images.iter().chain(&obs.images).cloned());
  }

  if record.time_token.is_none() {
    record.time_token = obs.time_token.clone();
  }
  if record.approx_created_at.is_none() {
    record.approx_created_at = obs.taken_at;
  }

  if record.parent_id.is_none() {
    record.parent_id = explicit_parent.map(str::to_owned);
  }
  fill(&mut record.source_id, &obs.native_id);
  fill(&mut record.parent_source_id, &obs.parent_native_id);
  fill(&mut record.root_source_id, &obs.root_native_id);
  fill(&mut record.reply_to, &obs.reply_to);

  record.drilled |= obs.source == Source::Drill;
  record.seq = record.seq.min(obs.seq);
}

fn fill(slot: &mut Option<String>, value: &Option<String>) {
  if slot.is_none() {
    slot.clone_from(value);
  }
}

fn apply_readings(metrics: &mut Metrics, presence: &mut MetricsPresence, obs: &Observation) {
  for channel in skein_core::card::Channel::ALL {
    let reading = obs.readings.get(channel);
    if reading.is_present() {
      metrics.set(channel, reading.value());
      presence.mark(channel);
    }
  }
}

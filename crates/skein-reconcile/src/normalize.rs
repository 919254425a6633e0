//! Card normaliser: raw per-round cards → identified observations.

use chrono::{DateTime, TimeZone, Utc};
use skein_core::{
  Error,
  card::{Channel, RawCard},
  comment::{Reading, Readings, Source},
};

use crate::{
  identity::Fingerprint,
  text::{
    classify_channel, clean_image_urls, extract_body_text, has_expand_affordance,
    is_expand_cue, normalize_handle, normalize_time_token, parse_count, reply_target,
    soft_normalize, ui_noise_score,
  },
};

/// A normalised card, ready for identity resolution and merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
  /// Discovery order across the whole harvest; assigned by the controller.
  pub seq:              u32,
  pub round:            u32,
  pub source:           Source,
  /// Normalised author handle.
  pub handle:           String,
  /// Soft-normalised body.
  pub text:             String,
  pub noise:            usize,
  pub fingerprint:      Fingerprint,
  pub native_id:        Option<String>,
  pub parent_native_id: Option<String>,
  pub root_native_id:   Option<String>,
  /// Set on drill replies: the comment whose thread was being drilled.
  pub anchor:           Option<Anchor>,
  pub reply_to:         Option<String>,
  pub readings:         Readings,
  pub images:           Vec<String>,
  pub time_token:       Option<String>,
  pub taken_at:         Option<DateTime<Utc>>,
  pub text_fragments:   Option<Vec<String>>,
  pub permalink:        Option<String>,
  /// The card offered a "view replies" affordance.
  pub expandable:       bool,
}

/// Identity evidence for a drilled parent comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
  pub fingerprint: Fingerprint,
  pub native_id:   Option<String>,
}

/// Normalise one card. Fails with [`Error::Unidentifiable`] when neither a
/// handle nor any text survives cleaning.
pub fn normalize(card: &RawCard, source: Source) -> Result<Observation, Error> {
  let handle = normalize_handle(&card.handle);
  let body = body_of(card);
  let text = soft_normalize(&body);
  let fingerprint = Fingerprint::compute(&handle, &text)?;

  let reply_to = card
    .reply_to
    .as_deref()
    .map(normalize_handle)
    .filter(|h| !h.is_empty())
    .or_else(|| reply_target(&card.raw_text))
    .or_else(|| reply_target(&body));

  Ok(Observation {
    seq: 0,
    round: 0,
    source,
    noise: ui_noise_score(&text),
    handle,
    text,
    fingerprint,
    native_id: non_empty(&card.native_id),
    parent_native_id: non_empty(&card.parent_native_id),
    root_native_id: non_empty(&card.root_native_id),
    anchor: None,
    reply_to,
    readings: readings_of(card),
    images: clean_image_urls(&card.images),
    time_token: card.time_token.as_deref().and_then(normalize_time_token),
    taken_at: card.taken_at.as_deref().and_then(parse_timestamp),
    text_fragments: card.text_fragments.clone(),
    permalink: non_empty(&card.permalink),
    expandable: has_expand_affordance(
      card.aux_labels.iter().map(String::as_str),
      &card.raw_text,
    ),
  })
}

fn non_empty(value: &Option<String>) -> Option<String> {
  value
    .as_deref()
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_owned)
}

/// Prefer the adapter's cleaned body, then raw text, then feed fragments.
fn body_of(card: &RawCard) -> String {
  if !card.body_text.trim().is_empty() {
    return card.body_text.clone();
  }
  let extracted = extract_body_text(&card.raw_text);
  if !extracted.is_empty() {
    return extracted;
  }
  card
    .text_fragments
    .as_ref()
    .map(|f| f.concat())
    .unwrap_or_default()
}

/// A channel is present only when a lexical cue for it was found, either by
/// the adapter or among the card's affordance labels. A missing number under a
/// present cue reads as zero.
fn readings_of(card: &RawCard) -> Readings {
  let mut readings = Readings::default();
  for channel in Channel::ALL {
    let raw = card.metrics.get(channel);
    let adapter_value = raw.value.map(|v| v.max(0) as u64);

    let label_value = card
      .aux_labels
      .iter()
      .filter(|label| !is_expand_cue(label))
      .filter(|label| classify_channel(label) == Some(channel))
      .map(|label| parse_count(label))
      .reduce(|acc, v| acc.or(v));

    let reading = match (raw.present, label_value) {
      (false, None) => Reading::Unknown,
      (_, label) => Reading::Present(
        adapter_value
          .or(label.flatten())
          .unwrap_or(0),
      ),
    };
    readings.set(channel, reading);
  }
  readings
}

/// Accepts RFC 3339 strings and epoch seconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
  let value = value.trim();
  if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
    let secs: i64 = value.parse().ok()?;
    return Utc.timestamp_opt(secs, 0).single();
  }
  DateTime::parse_from_rfc3339(value)
    .ok()
    .map(|dt| dt.with_timezone(&Utc))
}

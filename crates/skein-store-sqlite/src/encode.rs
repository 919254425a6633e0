//! Encoding and decoding helpers between domain types and the plain values
//! stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings, and
//! list-shaped fields compact JSON. Counters are stored as signed integers.

use chrono::{DateTime, Utc};
use skein_core::{
  card::PageMetrics,
  comment::{
    CommentRecord, Edge, EdgeType, Metrics, MetricsPresence, Source, TimePrecision,
  },
  post::PostRow,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_time_precision(p: TimePrecision) -> &'static str {
  match p {
    TimePrecision::Approx => "approx",
    TimePrecision::Unknown => "none",
  }
}

pub fn decode_time_precision(s: &str) -> Result<TimePrecision> {
  match s {
    "approx" => Ok(TimePrecision::Approx),
    "none" => Ok(TimePrecision::Unknown),
    other => Err(
      skein_core::Error::UnknownVariant { kind: "time precision", value: other.into() }.into(),
    ),
  }
}

// ─── Counters ────────────────────────────────────────────────────────────────

pub fn encode_count(n: u64) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

pub fn decode_count(column: &'static str, value: i64) -> Result<u64> {
  u64::try_from(value).map_err(|_| Error::OutOfRange { column, value })
}

fn decode_u32(column: &'static str, value: i64) -> Result<u32> {
  u32::try_from(value).map_err(|_| Error::OutOfRange { column, value })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values of a `posts` row, as far as [`PostRow`] needs them.
pub struct RawPost {
  pub post_id:     String,
  pub url:         String,
  pub captured_at: String,
}

impl RawPost {
  pub fn into_post_row(self) -> Result<PostRow> {
    Ok(PostRow {
      post_id:     decode_uuid(&self.post_id)?,
      url:         self.url,
      captured_at: decode_dt(&self.captured_at)?,
    })
  }
}

pub fn encode_page_metrics(metrics: &PageMetrics) -> Result<String> {
  Ok(serde_json::to_string(metrics)?)
}

pub fn encode_strings(values: &[String]) -> Result<String> {
  Ok(serde_json::to_string(values)?)
}

/// Column values of a `comments` row, in `COMMENT_COLUMNS` order minus the
/// leading `post_id`.
pub struct RawComment {
  pub comment_id:         String,
  pub source_id:          Option<String>,
  pub parent_id:          Option<String>,
  pub parent_source_id:   Option<String>,
  pub root_source_id:     Option<String>,
  pub root_id:            Option<String>,
  pub fingerprint:        String,
  pub author:             String,
  pub text:               String,
  pub text_fragments:     Option<String>,
  pub like_count:         i64,
  pub reply_count:        i64,
  pub repost_count:       i64,
  pub share_count:        i64,
  pub presence_mask:      i64,
  pub metrics_confidence: String,
  pub images:             String,
  pub time_token:         Option<String>,
  pub approx_created_at:  Option<String>,
  pub time_precision:     String,
  pub source:             String,
  pub drilled:            bool,
  pub reply_to:           Option<String>,
  pub depth:              Option<i64>,
  pub path:               Option<String>,
  pub seq:                i64,
}

/// Column list shared by the upsert and the select.
pub const COMMENT_COLUMNS: &str = "comment_id, source_id, parent_id, parent_source_id, \
   root_source_id, root_id, fingerprint, author, text, text_fragments, like_count, reply_count, \
   repost_count, share_count, presence_mask, metrics_confidence, images, time_token, \
   approx_created_at, time_precision, source, drilled, reply_to, depth, path, seq";

impl RawComment {
  pub fn from_record(record: &CommentRecord) -> Result<Self> {
    Ok(Self {
      comment_id:         record.id.clone(),
      source_id:          record.source_id.clone(),
      parent_id:          record.parent_id.clone(),
      parent_source_id:   record.parent_source_id.clone(),
      root_source_id:     record.root_source_id.clone(),
      root_id:            record.root_id.clone(),
      fingerprint:        record.fingerprint.clone(),
      author:             record.author.clone(),
      text:               record.text.clone(),
      text_fragments:     record.text_fragments.as_deref().map(encode_strings).transpose()?,
      like_count:         encode_count(record.metrics.likes),
      reply_count:        encode_count(record.metrics.replies),
      repost_count:       encode_count(record.metrics.reposts),
      share_count:        encode_count(record.metrics.shares),
      presence_mask:      i64::from(record.presence.to_mask()),
      metrics_confidence: record.metrics_confidence().as_str().to_owned(),
      images:             encode_strings(&record.images)?,
      time_token:         record.time_token.clone(),
      approx_created_at:  record.approx_created_at.map(encode_dt),
      time_precision:     encode_time_precision(record.time_precision).to_owned(),
      source:             record.source.as_str().to_owned(),
      drilled:            record.drilled,
      reply_to:           record.reply_to.clone(),
      depth:              record.depth.map(i64::from),
      path:               record.path.clone(),
      seq:                i64::from(record.seq),
    })
  }

  /// Read a row selected with [`COMMENT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      comment_id:         row.get(0)?,
      source_id:          row.get(1)?,
      parent_id:          row.get(2)?,
      parent_source_id:   row.get(3)?,
      root_source_id:     row.get(4)?,
      root_id:            row.get(5)?,
      fingerprint:        row.get(6)?,
      author:             row.get(7)?,
      text:               row.get(8)?,
      text_fragments:     row.get(9)?,
      like_count:         row.get(10)?,
      reply_count:        row.get(11)?,
      repost_count:       row.get(12)?,
      share_count:        row.get(13)?,
      presence_mask:      row.get(14)?,
      metrics_confidence: row.get(15)?,
      images:             row.get(16)?,
      time_token:         row.get(17)?,
      approx_created_at:  row.get(18)?,
      time_precision:     row.get(19)?,
      source:             row.get(20)?,
      drilled:            row.get(21)?,
      reply_to:           row.get(22)?,
      depth:              row.get(23)?,
      path:               row.get(24)?,
      seq:                row.get(25)?,
    })
  }

  /// Confidence is derived from the mask; the stored label is for readers
  /// querying the table directly.
  pub fn into_record(self) -> Result<CommentRecord> {
    let mask = u8::try_from(self.presence_mask)
      .map_err(|_| Error::OutOfRange { column: "presence_mask", value: self.presence_mask })?;

    Ok(CommentRecord {
      id:                self.comment_id,
      source_id:         self.source_id,
      parent_id:         self.parent_id,
      parent_source_id:  self.parent_source_id,
      root_source_id:    self.root_source_id,
      root_id:           self.root_id,
      fingerprint:       self.fingerprint,
      author:            self.author,
      text:              self.text,
      text_fragments:    self
        .text_fragments
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      metrics:           Metrics {
        likes:   decode_count("like_count", self.like_count)?,
        replies: decode_count("reply_count", self.reply_count)?,
        reposts: decode_count("repost_count", self.repost_count)?,
        shares:  decode_count("share_count", self.share_count)?,
      },
      presence:          MetricsPresence::from_mask(mask),
      images:            serde_json::from_str(&self.images)?,
      time_token:        self.time_token,
      approx_created_at: self.approx_created_at.as_deref().map(decode_dt).transpose()?,
      time_precision:    decode_time_precision(&self.time_precision)?,
      source:            Source::parse(&self.source)?,
      drilled:           self.drilled,
      reply_to:          self.reply_to,
      depth:             self.depth.map(|d| decode_u32("depth", d)).transpose()?,
      path:              self.path,
      seq:               decode_u32("seq", self.seq)?,
    })
  }
}

/// Raw values of an `edges` row.
pub struct RawEdge {
  pub parent_id: String,
  pub child_id:  String,
  pub edge_type: String,
}

impl RawEdge {
  pub fn into_edge(self) -> Result<Edge> {
    Ok(Edge {
      parent_id: self.parent_id,
      child_id:  self.child_id,
      edge_type: EdgeType::parse(&self.edge_type)?,
    })
  }
}

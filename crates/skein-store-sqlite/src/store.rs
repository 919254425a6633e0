//! [`SqliteStore`], the SQLite implementation of [`ThreadStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, types::Value};
use skein_core::{
  comment::{CommentRecord, Edge, TreeUpdate},
  post::{PostRow, PostSnapshot, RunRecord},
  store::ThreadStore,
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    COMMENT_COLUMNS, RawComment, RawEdge, RawPost, decode_count, encode_count, encode_dt,
    encode_page_metrics, encode_strings, encode_uuid,
  },
  schema::SCHEMA,
};

/// Structural columns of a stored row survive an upsert that carries no
/// parent when the row already has one; `repair_stored` reconciles them.
const KEEP_STORED_TREE: &str = "excluded.parent_id IS NULL AND comments.parent_id IS NOT NULL";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A thread store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn post_by_url(&self, url: String) -> Result<Option<PostRow>> {
    let raw: Option<RawPost> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT post_id, url, captured_at FROM posts WHERE url = ?1",
            rusqlite::params![url],
            |row| {
              Ok(RawPost {
                post_id:     row.get(0)?,
                url:         row.get(1)?,
                captured_at: row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawPost::into_post_row).transpose()
  }
}

fn comment_upsert_sql() -> String {
  format!(
    "INSERT INTO comments (post_id, {COMMENT_COLUMNS})
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
             ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)
     ON CONFLICT (post_id, comment_id) DO UPDATE SET
       source_id          = COALESCE(excluded.source_id, comments.source_id),
       parent_id          = COALESCE(excluded.parent_id, comments.parent_id),
       parent_source_id   = COALESCE(excluded.parent_source_id, comments.parent_source_id),
       root_source_id     = COALESCE(excluded.root_source_id, comments.root_source_id),
       root_id            = CASE WHEN {KEEP_STORED_TREE} THEN comments.root_id ELSE excluded.root_id END,
       depth              = CASE WHEN {KEEP_STORED_TREE} THEN comments.depth ELSE excluded.depth END,
       path               = CASE WHEN {KEEP_STORED_TREE} THEN comments.path ELSE excluded.path END,
       fingerprint        = excluded.fingerprint,
       author             = excluded.author,
       text               = excluded.text,
       text_fragments     = COALESCE(excluded.text_fragments, comments.text_fragments),
       like_count         = excluded.like_count,
       reply_count        = excluded.reply_count,
       repost_count       = excluded.repost_count,
       share_count        = excluded.share_count,
       presence_mask      = excluded.presence_mask,
       metrics_confidence = excluded.metrics_confidence,
       images             = excluded.images,
       time_token         = COALESCE(comments.time_token, excluded.time_token),
       approx_created_at  = COALESCE(comments.approx_created_at, excluded.approx_created_at),
       time_precision     = CASE WHEN comments.approx_created_at IS NOT NULL
                                 THEN comments.time_precision
                                 ELSE excluded.time_precision END,
       drilled            = MAX(comments.drilled, excluded.drilled),
       reply_to           = COALESCE(excluded.reply_to, comments.reply_to),
       seq                = MIN(comments.seq, excluded.seq)"
  )
}

fn opt_text(value: &Option<String>) -> Value {
  value.clone().map_or(Value::Null, Value::Text)
}

/// One `UPDATE` per non-empty update, touching only the fields it carries.
fn tree_update_statement(post_id: &str, update: &TreeUpdate) -> Option<(String, Vec<Value>)> {
  let mut sets: Vec<&'static str> = Vec::new();
  let mut values: Vec<Value> = Vec::new();

  if let Some(parent) = &update.parent_id {
    sets.push("parent_id = ?");
    values.push(opt_text(parent));
  }
  if let Some(parent) = &update.parent_source_id {
    sets.push("parent_source_id = ?");
    values.push(opt_text(parent));
  }
  if let Some(root) = &update.root_id {
    sets.push("root_id = ?");
    values.push(Value::Text(root.clone()));
  }
  if let Some(depth) = update.depth {
    sets.push("depth = ?");
    values.push(Value::Integer(i64::from(depth)));
  }
  if let Some(path) = &update.path {
    sets.push("path = ?");
    values.push(Value::Text(path.clone()));
  }
  if sets.is_empty() {
    return None;
  }

  values.push(Value::Text(post_id.to_owned()));
  values.push(Value::Text(update.id.clone()));
  let sql = format!(
    "UPDATE comments SET {} WHERE post_id = ? AND comment_id = ?",
    sets.join(", ")
  );
  Some((sql, values))
}

// ─── ThreadStore impl ────────────────────────────────────────────────────────

impl ThreadStore for SqliteStore {
  type Error = Error;

  // ── Posts ─────────────────────────────────────────────────────────────────

  async fn upsert_post(&self, post: &PostSnapshot, captured_at: DateTime<Utc>) -> Result<PostRow> {
    let id_str      = encode_uuid(Uuid::new_v4());
    let url         = post.url.clone();
    let external_id = post.external_id.clone();
    let author      = post.author.clone();
    let text        = post.text.clone();
    let metrics     = encode_page_metrics(&post.metrics)?;
    let images      = encode_strings(&post.images)?;
    let at_str      = encode_dt(captured_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO posts (post_id, url, external_id, author, text, metrics, images, captured_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
           ON CONFLICT (url) DO UPDATE SET
             external_id = excluded.external_id,
             author      = COALESCE(excluded.author, posts.author),
             text        = COALESCE(excluded.text, posts.text),
             metrics     = excluded.metrics,
             images      = CASE WHEN excluded.images = '[]' THEN posts.images ELSE excluded.images END,
             captured_at = excluded.captured_at",
          rusqlite::params![id_str, url, external_id, author, text, metrics, images, at_str],
        )?;
        Ok(())
      })
      .await?;

    self
      .post_by_url(post.url.clone())
      .await?
      .ok_or_else(|| Error::PostMissing(post.url.clone()))
  }

  async fn find_post(&self, url: &str) -> Result<Option<PostRow>> {
    self.post_by_url(url.to_owned()).await
  }

  async fn count_posts(&self, url: &str) -> Result<u64> {
    let url = url.to_owned();
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM posts WHERE url = ?1",
          rusqlite::params![url],
          |row| row.get(0),
        )?)
      })
      .await?;
    decode_count("count", count)
  }

  async fn record_run(&self, run: &RunRecord) -> Result<()> {
    let run_id        = run.run_id.clone();
    let post_id_str   = encode_uuid(run.post_id);
    let at_str        = encode_dt(run.crawled_at);
    let version       = run.fetcher_version.clone();
    let comment_count = encode_count(run.comment_count);
    let edge_count    = encode_count(run.edge_count);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO runs (run_id, post_id, crawled_at, fetcher_version, comment_count, edge_count)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (run_id, post_id) DO UPDATE SET
             crawled_at      = excluded.crawled_at,
             fetcher_version = excluded.fetcher_version,
             comment_count   = excluded.comment_count,
             edge_count      = excluded.edge_count",
          rusqlite::params![run_id, post_id_str, at_str, version, comment_count, edge_count],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Comments and edges ────────────────────────────────────────────────────

  async fn upsert_comments(&self, post_id: Uuid, records: &[CommentRecord]) -> Result<usize> {
    let post_id_str = encode_uuid(post_id);
    let raws = records
      .iter()
      .map(RawComment::from_record)
      .collect::<Result<Vec<_>>>()?;
    let sql = comment_upsert_sql();

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut written = 0;
        {
          let mut stmt = tx.prepare(&sql)?;
          for r in &raws {
            written += stmt.execute(rusqlite::params![
              post_id_str,
              r.comment_id,
              r.source_id,
              r.parent_id,
              r.parent_source_id,
              r.root_source_id,
              r.root_id,
              r.fingerprint,
              r.author,
              r.text,
              r.text_fragments,
              r.like_count,
              r.reply_count,
              r.repost_count,
              r.share_count,
              r.presence_mask,
              r.metrics_confidence,
              r.images,
              r.time_token,
              r.approx_created_at,
              r.time_precision,
              r.source,
              r.drilled,
              r.reply_to,
              r.depth,
              r.path,
              r.seq,
            ])?;
          }
        }
        tx.commit()?;
        Ok(written)
      })
      .await?;
    Ok(written)
  }

  async fn upsert_edges(&self, post_id: Uuid, edges: &[Edge]) -> Result<usize> {
    let post_id_str = encode_uuid(post_id);
    let rows: Vec<(String, String, &'static str)> = edges
      .iter()
      .map(|e| (e.parent_id.clone(), e.child_id.clone(), e.edge_type.as_str()))
      .collect();
    let attempted = rows.len();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO edges (post_id, parent_id, child_id, edge_type)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (post_id, parent_id, child_id, edge_type) DO NOTHING",
          )?;
          for (parent, child, edge_type) in &rows {
            stmt.execute(rusqlite::params![post_id_str, parent, child, edge_type])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(attempted)
  }

  async fn list_comments(&self, post_id: Uuid) -> Result<Vec<CommentRecord>> {
    let post_id_str = encode_uuid(post_id);

    let raws: Vec<RawComment> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {COMMENT_COLUMNS} FROM comments
           WHERE post_id = ?1
           ORDER BY seq, comment_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![post_id_str], RawComment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawComment::into_record).collect()
  }

  async fn list_edges(&self, post_id: Uuid) -> Result<Vec<Edge>> {
    let post_id_str = encode_uuid(post_id);

    let raws: Vec<RawEdge> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT parent_id, child_id, edge_type FROM edges
           WHERE post_id = ?1
           ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![post_id_str], |row| {
            Ok(RawEdge {
              parent_id: row.get(0)?,
              child_id:  row.get(1)?,
              edge_type: row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEdge::into_edge).collect()
  }

  async fn apply_tree_updates(&self, post_id: Uuid, updates: &[TreeUpdate]) -> Result<usize> {
    let post_id_str = encode_uuid(post_id);
    let statements: Vec<(String, Vec<Value>)> = updates
      .iter()
      .filter_map(|u| tree_update_statement(&post_id_str, u))
      .collect();
    if statements.is_empty() {
      return Ok(0);
    }

    let touched = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut touched = 0;
        for (sql, values) in &statements {
          touched += tx.execute(sql, rusqlite::params_from_iter(values))?;
        }
        tx.commit()?;
        Ok(touched)
      })
      .await?;
    Ok(touched)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tree_update_statement_only_sets_carried_fields() {
    let update = TreeUpdate {
      id: "c1".into(),
      parent_id: Some(None),
      depth: Some(0),
      ..Default::default()
    };
    let (sql, values) = tree_update_statement("p", &update).unwrap();
    assert_eq!(
      sql,
      "UPDATE comments SET parent_id = ?, depth = ? WHERE post_id = ? AND comment_id = ?"
    );
    assert_eq!(values, vec![
      Value::Null,
      Value::Integer(0),
      Value::Text("p".into()),
      Value::Text("c1".into()),
    ]);
    assert!(tree_update_statement("p", &TreeUpdate { id: "x".into(), ..Default::default() }).is_none());
  }
}

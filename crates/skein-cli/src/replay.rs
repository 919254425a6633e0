//! A [`PageCapture`] that replays a recorded capture session.
//!
//! A session file is JSON:
//!
//! ```json
//! {
//!   "url": "https://www.threads.net/@op/post/ABC",
//!   "crawled_at": "2024-05-01T12:00:00Z",
//!   "main": [ { "cards": [ ... ] }, ... ],
//!   "drills": { "/@alice/post/XYZ": [ { "cards": [ ... ] } ] }
//! }
//! ```
//!
//! Each `scroll` advances to the next recorded round; once the recording runs
//! out the last round repeats, which is what a fully loaded page looks like.

use std::{collections::BTreeMap, path::Path};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use skein_core::{
  capture::{PageCapture, Surface},
  card::CaptureRound,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
  #[error("reading session {path}: {source}")]
  Io { path: String, source: std::io::Error },

  #[error("parsing session: {0}")]
  Json(#[from] serde_json::Error),

  #[error("no recorded drill for {0}")]
  NoDrill(String),

  #[error("no drill surface is open")]
  DrillNotOpen,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Session {
  pub url:        String,
  pub crawled_at: Option<DateTime<Utc>>,
  pub main:       Vec<CaptureRound>,
  /// Keyed by permalink, absolute or site-relative.
  pub drills:     BTreeMap<String, Vec<CaptureRound>>,
}

impl Session {
  pub async fn from_path(path: &Path) -> Result<Self, ReplayError> {
    let raw = tokio::fs::read_to_string(path)
      .await
      .map_err(|source| ReplayError::Io { path: path.display().to_string(), source })?;
    Ok(serde_json::from_str(&raw)?)
  }

  fn drill_rounds(&self, permalink: &str) -> Option<&[CaptureRound]> {
    self
      .drills
      .iter()
      .find(|(key, _)| permalink == key.as_str() || permalink.ends_with(key.as_str()))
      .map(|(_, rounds)| rounds.as_slice())
  }
}

pub struct ReplayCapture {
  session: Session,
  main_at: usize,
  drill:   Option<(Vec<CaptureRound>, usize)>,
}

impl ReplayCapture {
  pub fn new(session: Session) -> Self { Self { session, main_at: 0, drill: None } }

  pub fn session(&self) -> &Session { &self.session }
}

fn round_at(rounds: &[CaptureRound], at: usize) -> CaptureRound {
  rounds
    .get(at.min(rounds.len().saturating_sub(1)))
    .cloned()
    .unwrap_or_default()
}

impl PageCapture for ReplayCapture {
  type Error = ReplayError;

  async fn capture(&mut self, surface: Surface) -> Result<CaptureRound, ReplayError> {
    match surface {
      Surface::Main => Ok(round_at(&self.session.main, self.main_at)),
      Surface::Drill => {
        let (rounds, at) = self.drill.as_ref().ok_or(ReplayError::DrillNotOpen)?;
        Ok(round_at(rounds, *at))
      }
    }
  }

  async fn scroll(&mut self, surface: Surface) -> Result<(), ReplayError> {
    match surface {
      Surface::Main => self.main_at += 1,
      Surface::Drill => {
        let (_, at) = self.drill.as_mut().ok_or(ReplayError::DrillNotOpen)?;
        *at += 1;
      }
    }
    Ok(())
  }

  async fn open_drill(&mut self, permalink: &str) -> Result<(), ReplayError> {
    let rounds = self
      .session
      .drill_rounds(permalink)
      .ok_or_else(|| ReplayError::NoDrill(permalink.to_owned()))?
      .to_vec();
    self.drill = Some((rounds, 0));
    Ok(())
  }

  /// Recorded drill rounds already show their expanded state.
  async fn expand_replies(&mut self, _max_clicks: usize) -> Result<usize, ReplayError> {
    Ok(0)
  }
}

#[cfg(test)]
mod tests {
  use skein_reconcile::{HarvestConfig, HarvestController, reconcile};

  use super::*;

  const SESSION: &str = r#"{
    "url": "https://www.threads.net/@op/post/ROOT",
    "crawled_at": "2024-05-01T12:00:00Z",
    "main": [
      { "cards": [
        { "handle": "op", "body_text": "the post", "permalink": "/@op/post/ROOT" },
        { "handle": "alice", "body_text": "first comment", "permalink": "/@alice/post/A1",
          "native_id": "A1",
          "metrics": { "replies": { "present": true, "value": 2 } } }
      ] },
      { "cards": [
        { "handle": "op", "body_text": "the post", "permalink": "/@op/post/ROOT" },
        { "handle": "alice", "body_text": "first comment", "permalink": "/@alice/post/A1",
          "native_id": "A1",
          "metrics": { "replies": { "present": true, "value": 2 } } },
        { "handle": "bob", "body_text": "second comment" }
      ] }
    ],
    "drills": {
      "/@alice/post/A1": [
        { "cards": [
          { "handle": "alice", "body_text": "first comment", "permalink": "/@alice/post/A1" },
          { "handle": "carol", "body_text": "a reply" },
          { "handle": "dave", "body_text": "another reply" }
        ] }
      ]
    }
  }"#;

  fn session() -> Session { serde_json::from_str(SESSION).unwrap() }

  #[tokio::test]
  async fn rounds_advance_on_scroll_and_then_repeat() {
    let mut capture = ReplayCapture::new(session());
    assert_eq!(capture.capture(Surface::Main).await.unwrap().cards.len(), 2);
    capture.scroll(Surface::Main).await.unwrap();
    capture.scroll(Surface::Main).await.unwrap();
    assert_eq!(capture.capture(Surface::Main).await.unwrap().cards.len(), 3);
  }

  #[tokio::test]
  async fn drills_match_absolute_permalinks() {
    let mut capture = ReplayCapture::new(session());
    assert!(matches!(
      capture.capture(Surface::Drill).await,
      Err(ReplayError::DrillNotOpen)
    ));
    capture
      .open_drill("https://www.threads.net/@alice/post/A1")
      .await
      .unwrap();
    assert_eq!(capture.capture(Surface::Drill).await.unwrap().cards.len(), 3);
    assert!(matches!(
      capture.open_drill("/@nobody/post/Z").await,
      Err(ReplayError::NoDrill(_))
    ));
  }

  #[tokio::test]
  async fn replayed_session_reconciles_into_a_tree() {
    let mut capture = ReplayCapture::new(session());
    let url = capture.session().url.clone();
    let harvest = HarvestController::new(HarvestConfig::default())
      .run(&mut capture, &url)
      .await;
    assert_eq!(harvest.post.author.as_deref(), Some("op"));
    assert_eq!(harvest.stats.drilled_ok, 1);

    let out = reconcile(&harvest, &[]);
    let authors: Vec<_> = out.records.iter().map(|r| r.author.as_str()).collect();
    assert_eq!(authors, vec!["alice", "bob", "carol", "dave"]);
    assert_eq!(out.edges.len(), 2);
    assert!(out.edges.iter().all(|e| e.parent_id == "A1"));
  }
}

//! Harvest controller.
//!
//! Drives capture rounds against the main thread view until the comment set
//! stops growing, then drills into the comments most likely to hide replies.
//! Every adapter call is bounded by a timeout and every failure degrades to
//! "no growth" or "candidate skipped"; a run always returns whatever it
//! collected.
//!
//! A round is processed synchronously once its capture call returns, so
//! cancellation (checked on both sides of the capture await) either sees a
//! round folded in completely or not at all.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_core::{
  capture::{PageCapture, Surface},
  card::{CaptureRound, RawCard},
  comment::Source,
  post::PostSnapshot,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
  error::HarvestError,
  feed::feed_cards,
  identity::Fingerprint,
  link::{
    DEFAULT_PERMALINK_BASE, absolute_permalink, native_post_id, normalize_post_url,
    post_id_from_url,
  },
  normalize::{Anchor, Observation, normalize},
  text::dedupe_urls,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Round budgets and timeouts. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
  /// Zero-growth rounds that end the main pass.
  pub stable_rounds:         u32,
  pub max_rounds:            u32,
  /// Extra rounds granted while the raw card count keeps rising.
  pub max_bonus_rounds:      u32,
  pub max_drill_candidates:  usize,
  pub drill_max_rounds:      u32,
  pub drill_stable_rounds:   u32,
  pub expand_attempts:       u32,
  pub expand_max_clicks:     usize,
  /// Retries of a failed capture call within one round.
  pub capture_retries:       u32,
  pub round_timeout_ms:      u64,
  pub navigation_timeout_ms: u64,
  pub scroll_timeout_ms:     u64,
}

impl Default for HarvestConfig {
  fn default() -> Self {
    Self {
      stable_rounds:         2,
      max_rounds:            12,
      max_bonus_rounds:      1,
      max_drill_candidates:  5,
      drill_max_rounds:      4,
      drill_stable_rounds:   1,
      expand_attempts:       2,
      expand_max_clicks:     6,
      capture_retries:       1,
      round_timeout_ms:      10_000,
      navigation_timeout_ms: 12_000,
      scroll_timeout_ms:     5_000,
    }
  }
}

impl HarvestConfig {
  fn round_timeout(&self) -> Duration { Duration::from_millis(self.round_timeout_ms) }

  fn navigation_timeout(&self) -> Duration {
    Duration::from_millis(self.navigation_timeout_ms)
  }

  fn scroll_timeout(&self) -> Duration { Duration::from_millis(self.scroll_timeout_ms) }
}

// ─── Stability ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundVerdict {
  Continue,
  /// The stability threshold was reached.
  Stable,
  /// The round cap (plus any bonus rounds) was reached.
  Exhausted,
}

/// Decides when a sequence of capture rounds has seen everything it will.
///
/// A round with new fingerprints resets the stability counter. A round with
/// none but a larger raw card count is treated as slow loading and granted as
/// a bonus round (up to a limit) instead of counting towards stability.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
  threshold:  u32,
  max_rounds: u32,
  max_bonus:  u32,
  rounds:     u32,
  stable:     u32,
  bonus:      u32,
  last_cards: usize,
}

impl StabilityTracker {
  pub fn new(threshold: u32, max_rounds: u32, max_bonus: u32) -> Self {
    Self {
      threshold: threshold.max(1),
      max_rounds: max_rounds.max(1),
      max_bonus,
      rounds: 0,
      stable: 0,
      bonus: 0,
      last_cards: 0,
    }
  }

  pub fn observe(&mut self, new: usize, cards: usize) -> RoundVerdict {
    self.rounds += 1;
    if new > 0 {
      self.stable = 0;
    } else if cards > self.last_cards && self.bonus < self.max_bonus {
      self.bonus += 1;
    } else {
      self.stable += 1;
    }
    self.last_cards = self.last_cards.max(cards);

    if self.stable >= self.threshold {
      RoundVerdict::Stable
    } else if self.rounds >= self.max_rounds + self.bonus {
      RoundVerdict::Exhausted
    } else {
      RoundVerdict::Continue
    }
  }

  /// A timed-out or failed round counts as a round without growth.
  pub fn observe_timeout(&mut self) -> RoundVerdict { self.observe(0, self.last_cards) }

  pub fn rounds(&self) -> u32 { self.rounds }

  pub fn stable(&self) -> u32 { self.stable }
}

// ─── Drill candidates ────────────────────────────────────────────────────────

/// A main-pass comment worth a dedicated drill.
#[derive(Debug, Clone, PartialEq)]
pub struct DrillCandidate {
  pub permalink:  String,
  pub replies:    u64,
  pub likes:      u64,
  pub expandable: bool,
  pub anchor:     Anchor,
}

/// Main-pass comments with a permalink that declare replies or show an expand
/// affordance, busiest first, capped at `limit`. Repeated observations of one
/// comment are folded together first.
pub fn select_drill_candidates(
  observations: &[Observation],
  limit: usize,
) -> Vec<DrillCandidate> {
  let mut index: HashMap<&Fingerprint, usize> = HashMap::new();
  let mut candidates: Vec<DrillCandidate> = Vec::new();

  for obs in observations.iter().filter(|o| o.source == Source::Main) {
    let Some(permalink) = obs.permalink.as_deref() else {
      continue;
    };
    let replies = obs.readings.replies.value();
    let likes = obs.readings.likes.value();
    match index.get(&obs.fingerprint) {
      Some(&idx) => {
        let existing = &mut candidates[idx];
        existing.replies = existing.replies.max(replies);
        existing.likes = existing.likes.max(likes);
        existing.expandable |= obs.expandable;
      }
      None => {
        index.insert(&obs.fingerprint, candidates.len());
        candidates.push(DrillCandidate {
          permalink: permalink.to_owned(),
          replies,
          likes,
          expandable: obs.expandable,
          anchor: Anchor {
            fingerprint: obs.fingerprint.clone(),
            native_id:   obs.native_id.clone(),
          },
        });
      }
    }
  }

  candidates.retain(|c| c.replies > 0 || c.expandable);
  candidates.sort_by(|a, b| (b.replies, b.likes).cmp(&(a.replies, a.likes)));
  candidates.truncate(limit);
  candidates
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestStats {
  pub main_rounds:      u32,
  pub drill_rounds:     u32,
  pub drill_candidates: usize,
  pub drilled_ok:       usize,
  pub drilled_failed:   usize,
  /// Cards dropped as unidentifiable.
  pub discarded:        usize,
  pub timeouts:         usize,
  pub cancelled:        bool,
}

/// Everything one run collected, in discovery order.
#[derive(Debug, Clone)]
pub struct Harvest {
  pub post:         PostSnapshot,
  pub crawled_at:   DateTime<Utc>,
  pub observations: Vec<Observation>,
  pub stats:        HarvestStats,
}

impl Harvest {
  /// A harvest that found nothing.
  pub fn empty(url: &str, crawled_at: DateTime<Utc>) -> Self {
    let url = normalize_post_url(url);
    Self {
      post: PostSnapshot {
        external_id: post_id_from_url(&url),
        url,
        ..Default::default()
      },
      crawled_at,
      observations: Vec::new(),
      stats: HarvestStats::default(),
    }
  }
}

// ─── Round bookkeeping ───────────────────────────────────────────────────────

struct RoundOutcome {
  cards: usize,
  new:   usize,
}

/// Mutable state shared by the main and drill phases of one run.
struct Collector {
  post_native:  Option<String>,
  post:         PostSnapshot,
  page_seen:    bool,
  root:         Option<Fingerprint>,
  seen:         HashSet<Fingerprint>,
  observations: Vec<Observation>,
  next_seq:     u32,
  discarded:    usize,
}

impl Collector {
  fn new(harvest: &Harvest) -> Self {
    Self {
      post_native:  native_post_id(&harvest.post.url),
      post:         harvest.post.clone(),
      page_seen:    false,
      root:         None,
      seen:         HashSet::new(),
      observations: Vec::new(),
      next_seq:     0,
      discarded:    0,
    }
  }

  /// Feed cards replace DOM cards for the round when the feed yields any.
  fn cards_of(round: CaptureRound, root_native: Option<&str>) -> (Vec<RawCard>, bool) {
    match round.feed.as_ref().map(|feed| feed_cards(feed, root_native)) {
      Some(cards) if !cards.is_empty() => (cards, true),
      _ => (round.cards, false),
    }
  }

  fn normalize_card(&mut self, card: &RawCard, source: Source) -> Option<Observation> {
    match normalize(card, source) {
      Ok(obs) => Some(obs),
      Err(err) => {
        debug!(%err, handle = %card.handle, "discarding card");
        self.discarded += 1;
        None
      }
    }
  }

  fn main_round(&mut self, round: CaptureRound, round_no: u32) -> RoundOutcome {
    if let Some(page) = round.page {
      self.post.metrics = page;
      self.page_seen = true;
    }
    let (cards, from_feed) = Self::cards_of(round, self.post_native.as_deref());
    let root_idx = self.root_index(&cards, from_feed, round_no);

    let mut batch = Vec::with_capacity(cards.len());
    for (idx, card) in cards.iter().enumerate() {
      let Some(mut obs) = self.normalize_card(card, Source::Main) else {
        continue;
      };
      if Some(idx) == root_idx {
        self.adopt_root(&obs);
        continue;
      }
      if self.root.as_ref() == Some(&obs.fingerprint) {
        continue;
      }
      obs.round = round_no;
      batch.push(obs);
    }

    RoundOutcome { cards: cards.len(), new: self.commit(batch) }
  }

  /// Returns the number of reply cards not seen earlier in this drill.
  fn drill_round(
    &mut self,
    round: CaptureRound,
    round_no: u32,
    candidate: &DrillCandidate,
    drill_seen: &mut HashSet<Fingerprint>,
  ) -> RoundOutcome {
    let (cards, from_feed) = Self::cards_of(round, candidate.anchor.native_id.as_deref());
    let anchor_idx = if from_feed {
      None
    } else {
      let target = native_post_id(&candidate.permalink);
      cards
        .iter()
        .position(|c| {
          target.is_some() && c.permalink.as_deref().and_then(native_post_id) == target
        })
        .or((!cards.is_empty()).then_some(0))
    };

    let mut batch = Vec::with_capacity(cards.len());
    let mut growth = 0;
    for (idx, card) in cards.iter().enumerate() {
      let Some(mut obs) = self.normalize_card(card, Source::Drill) else {
        continue;
      };
      if self.root.as_ref() == Some(&obs.fingerprint) {
        continue;
      }
      obs.round = round_no;
      let is_anchor =
        Some(idx) == anchor_idx || obs.fingerprint == candidate.anchor.fingerprint;
      if !is_anchor {
        obs.anchor = Some(candidate.anchor.clone());
        if drill_seen.insert(obs.fingerprint.clone()) {
          growth += 1;
        }
      }
      batch.push(obs);
    }
    self.commit(batch);

    RoundOutcome { cards: cards.len(), new: growth }
  }

  /// The card whose permalink names the thread's own post; failing that, the
  /// first DOM card of the first round.
  fn root_index(&self, cards: &[RawCard], from_feed: bool, round_no: u32) -> Option<usize> {
    let by_permalink = self.post_native.as_deref().and_then(|native| {
      cards.iter().position(|c| {
        c.permalink.as_deref().and_then(native_post_id).as_deref() == Some(native)
      })
    });
    by_permalink.or(
      (!from_feed && self.root.is_none() && round_no == 1 && !cards.is_empty())
        .then_some(0),
    )
  }

  fn adopt_root(&mut self, obs: &Observation) {
    if self.root.is_none() {
      self.root = Some(obs.fingerprint.clone());
    }
    if self.post.author.is_none() && !obs.handle.is_empty() {
      self.post.author = Some(obs.handle.clone());
    }
    if self.post.text.is_none() && !obs.text.is_empty() {
      self.post.text = Some(obs.text.clone());
    }
    self.post.images =
      dedupe_urls(self.post.images.iter().chain(&obs.images).cloned());
    if !self.page_seen {
      let r = &obs.readings;
      self.post.metrics.likes = self.post.metrics.likes.max(r.likes.value());
      self.post.metrics.replies = self.post.metrics.replies.max(r.replies.value());
      self.post.metrics.reposts = self.post.metrics.reposts.max(r.reposts.value());
      self.post.metrics.shares = self.post.metrics.shares.max(r.shares.value());
    }
  }

  /// Append one round's observations and return how many carried a
  /// fingerprint never seen before in this run.
  fn commit(&mut self, batch: Vec<Observation>) -> usize {
    let mut new = 0;
    for mut obs in batch {
      obs.seq = self.next_seq;
      self.next_seq += 1;
      if self.seen.insert(obs.fingerprint.clone()) {
        new += 1;
      }
      self.observations.push(obs);
    }
    new
  }
}

// ─── Controller ──────────────────────────────────────────────────────────────

pub struct HarvestController {
  config:         HarvestConfig,
  permalink_base: String,
  cancel:         Arc<AtomicBool>,
}

impl HarvestController {
  pub fn new(config: HarvestConfig) -> Self {
    Self {
      config,
      permalink_base: DEFAULT_PERMALINK_BASE.to_owned(),
      cancel: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn with_permalink_base(mut self, base: impl Into<String>) -> Self {
    self.permalink_base = base.into();
    self
  }

  /// Share a cancellation flag. It is honoured at round boundaries only.
  pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
    self.cancel = flag;
    self
  }

  pub fn config(&self) -> &HarvestConfig { &self.config }

  fn cancelled(&self) -> bool { self.cancel.load(Ordering::Relaxed) }

  /// Harvest the thread at `url`. Never fails.
  pub async fn run<C: PageCapture>(&self, capture: &mut C, url: &str) -> Harvest {
    let mut harvest = Harvest::empty(url, Utc::now());
    let mut collector = Collector::new(&harvest);
    let stats = &mut harvest.stats;

    self.main_phase(capture, &mut collector, stats).await;

    if !stats.cancelled {
      let mut candidates = select_drill_candidates(
        &collector.observations,
        self.config.max_drill_candidates,
      );
      for candidate in &mut candidates {
        candidate.permalink = absolute_permalink(&self.permalink_base, &candidate.permalink);
      }
      stats.drill_candidates = candidates.len();
      info!(candidates = candidates.len(), "drill candidates selected");

      for candidate in &candidates {
        if self.cancelled() {
          stats.cancelled = true;
          break;
        }
        match self.drill(capture, &mut collector, candidate, stats).await {
          Ok(replies) => {
            stats.drilled_ok += 1;
            info!(permalink = %candidate.permalink, replies, "drill finished");
          }
          Err(err) => {
            stats.drilled_failed += 1;
            warn!(permalink = %candidate.permalink, %err, "drill candidate skipped");
          }
        }
      }
    }

    stats.discarded = collector.discarded;
    info!(
      url = %collector.post.url,
      observations = collector.observations.len(),
      main_rounds = stats.main_rounds,
      drilled_ok = stats.drilled_ok,
      drilled_failed = stats.drilled_failed,
      cancelled = stats.cancelled,
      "harvest complete"
    );
    harvest.post = collector.post;
    harvest.observations = collector.observations;
    harvest
  }

  async fn main_phase<C: PageCapture>(
    &self,
    capture: &mut C,
    collector: &mut Collector,
    stats: &mut HarvestStats,
  ) {
    let mut tracker = StabilityTracker::new(
      self.config.stable_rounds,
      self.config.max_rounds,
      self.config.max_bonus_rounds,
    );
    loop {
      if self.cancelled() {
        stats.cancelled = true;
        return;
      }
      let round_no = tracker.rounds() + 1;
      let verdict = match self.capture_round(capture, Surface::Main).await {
        Ok(round) => {
          if self.cancelled() {
            stats.cancelled = true;
            return;
          }
          let outcome = collector.main_round(round, round_no);
          let verdict = tracker.observe(outcome.new, outcome.cards);
          info!(
            round = round_no,
            cards = outcome.cards,
            new = outcome.new,
            stable = tracker.stable(),
            "main round captured"
          );
          verdict
        }
        Err(err) => {
          note_failure(&err, stats);
          warn!(round = round_no, %err, "main round produced nothing");
          tracker.observe_timeout()
        }
      };
      stats.main_rounds = tracker.rounds();

      match verdict {
        RoundVerdict::Continue => self.scroll(capture, Surface::Main).await,
        RoundVerdict::Stable => {
          info!(rounds = tracker.rounds(), "main pass stable");
          return;
        }
        RoundVerdict::Exhausted => {
          info!(rounds = tracker.rounds(), "main pass hit its round cap");
          return;
        }
      }
    }
  }

  /// Drill one candidate. Returns the number of distinct reply cards seen.
  async fn drill<C: PageCapture>(
    &self,
    capture: &mut C,
    collector: &mut Collector,
    candidate: &DrillCandidate,
    stats: &mut HarvestStats,
  ) -> Result<usize, HarvestError> {
    let limit = self.config.navigation_timeout();
    let navigation_failure = |reason: String| HarvestError::NavigationFailure {
      permalink: candidate.permalink.clone(),
      reason,
    };
    match timeout(limit, capture.open_drill(&candidate.permalink)).await {
      Ok(Ok(())) => {}
      Ok(Err(err)) => return Err(navigation_failure(err.to_string())),
      Err(_) => return Err(navigation_failure(format!("timed out after {limit:?}"))),
    }

    for attempt in 0..self.config.expand_attempts {
      let clicked = match timeout(limit, capture.expand_replies(self.config.expand_max_clicks))
        .await
      {
        Ok(Ok(clicked)) => clicked,
        Ok(Err(err)) => return Err(HarvestError::ExpandFailure(err.to_string())),
        Err(_) => {
          return Err(HarvestError::ExpandFailure(format!("timed out after {limit:?}")));
        }
      };
      debug!(attempt, clicked, "expanded replies");
      if clicked == 0 {
        break;
      }
    }

    let mut tracker = StabilityTracker::new(
      self.config.drill_stable_rounds,
      self.config.drill_max_rounds,
      0,
    );
    let mut drill_seen = HashSet::new();
    loop {
      if self.cancelled() {
        stats.cancelled = true;
        break;
      }
      let round_no = tracker.rounds() + 1;
      let verdict = match self.capture_round(capture, Surface::Drill).await {
        Ok(round) => {
          if self.cancelled() {
            stats.cancelled = true;
            break;
          }
          stats.drill_rounds += 1;
          let outcome = collector.drill_round(round, round_no, candidate, &mut drill_seen);
          debug!(round = round_no, cards = outcome.cards, growth = outcome.new, "drill round");
          tracker.observe(outcome.new, drill_seen.len())
        }
        Err(err) => {
          note_failure(&err, stats);
          warn!(round = round_no, %err, "drill round produced nothing");
          tracker.observe_timeout()
        }
      };
      if verdict != RoundVerdict::Continue {
        break;
      }
      self.scroll(capture, Surface::Drill).await;
    }

    Ok(drill_seen.len())
  }

  /// One capture with bounded retries.
  async fn capture_round<C: PageCapture>(
    &self,
    capture: &mut C,
    surface: Surface,
  ) -> Result<CaptureRound, HarvestError> {
    let limit = self.config.round_timeout();
    let mut attempt = 0;
    loop {
      let err = match timeout(limit, capture.capture(surface)).await {
        Ok(Ok(round)) => return Ok(round),
        Ok(Err(err)) => HarvestError::Capture(err.to_string()),
        Err(_) => HarvestError::CaptureTimeout { surface, after: limit },
      };
      if attempt >= self.config.capture_retries {
        return Err(err);
      }
      attempt += 1;
      debug!(attempt, %err, "retrying capture");
    }
  }

  async fn scroll<C: PageCapture>(&self, capture: &mut C, surface: Surface) {
    let limit = self.config.scroll_timeout();
    match timeout(limit, capture.scroll(surface)).await {
      Ok(Ok(())) => {}
      Ok(Err(err)) => warn!(?surface, %err, "scroll failed"),
      Err(_) => warn!(?surface, "scroll timed out"),
    }
  }
}

fn note_failure(err: &HarvestError, stats: &mut HarvestStats) {
  if matches!(err, HarvestError::CaptureTimeout { .. }) {
    stats.timeouts += 1;
  }
}

//! Identity resolution: stable ids from native ids and content fingerprints.
//!
//! A record's stable id is chosen once and then reused for as long as any
//! evidence ties a new observation to it. Evidence is consulted in order of
//! confidence:
//!
//! 1. a stored record with the same native id;
//! 2. a record resolved earlier in this run with the same native id;
//! 3. a record resolved earlier in this run with the same fingerprint;
//! 4. a stored record with the same fingerprint;
//! 5. otherwise a fresh id derived from the native id, or from the
//!    fingerprint when there is none.
//!
//! Fingerprint matches are refused when both sides carry different native ids:
//! two distinct comments may share an author and text.

use std::{
  collections::{HashMap, HashSet},
  fmt,
};

use skein_core::{Error, comment::CommentRecord};

use crate::{
  link::short_digest,
  normalize::{Anchor, Observation},
  text::{normalize_handle, text_head},
};

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// Content-derived identity key: `"{handle}|{head}|{short}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
  /// Fails with [`Error::Unidentifiable`] when both the normalised handle and
  /// the hard-normalised text head are empty.
  pub fn compute(handle: &str, text: &str) -> Result<Self, Error> {
    let handle = normalize_handle(handle);
    let head = text_head(text);
    if handle.is_empty() && head.is_empty() {
      return Err(Error::Unidentifiable);
    }
    let base = format!("{handle}|{head}");
    let short = short_digest(&base, 8);
    Ok(Self(format!("{base}|{short}")))
  }

  /// Wrap a fingerprint read back from storage.
  pub fn from_stored(value: impl Into<String>) -> Self { Self(value.into()) }

  pub fn as_str(&self) -> &str { &self.0 }

  /// Id derived when no native id is available.
  fn derived_id(&self) -> String { short_digest(&self.0, 16) }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Native ids are used verbatim as stable ids, minus anything outside
/// `[A-Za-z0-9_-]`.
fn sanitize_native(native: &str) -> String {
  native
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    .collect()
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Per-post, per-run identity state.
#[derive(Debug, Default)]
pub struct IdentityResolver {
  stored_by_native:      HashMap<String, String>,
  stored_by_fingerprint: HashMap<String, String>,
  stored_ids:            HashSet<String>,
  run_by_native:         HashMap<String, String>,
  run_by_fingerprint:    HashMap<String, String>,
  /// Native id known for each id, from storage or this run.
  native_of:             HashMap<String, String>,
  /// Ids handed out in this run.
  taken:                 HashSet<String>,
}

impl IdentityResolver {
  pub fn new() -> Self { Self::default() }

  /// Seed from the records already persisted for this post.
  pub fn seeded(stored: &[CommentRecord]) -> Self {
    let mut resolver = Self::default();
    for record in stored {
      resolver.stored_ids.insert(record.id.clone());
      if !record.fingerprint.is_empty() {
        resolver
          .stored_by_fingerprint
          .entry(record.fingerprint.clone())
          .or_insert_with(|| record.id.clone());
      }
      if let Some(native) = &record.source_id {
        resolver
          .stored_by_native
          .entry(native.clone())
          .or_insert_with(|| record.id.clone());
        resolver.native_of.insert(record.id.clone(), native.clone());
      }
    }
    resolver
  }

  /// Resolve raw identity evidence to `(id, fingerprint)`.
  pub fn resolve(
    &mut self,
    handle: &str,
    text: &str,
    native_id: Option<&str>,
  ) -> Result<(String, Fingerprint), Error> {
    let fingerprint = Fingerprint::compute(handle, text)?;
    let id = self.resolve_parts(&fingerprint, native_id);
    Ok((id, fingerprint))
  }

  /// Resolve a normalised observation.
  pub fn resolve_observation(&mut self, obs: &Observation) -> String {
    self.resolve_parts(&obs.fingerprint, obs.native_id.as_deref())
  }

  /// The id already assigned to a drill anchor, if any.
  pub fn lookup_anchor(&self, anchor: &Anchor) -> Option<String> {
    self.lookup(&anchor.fingerprint, anchor.native_id.as_deref())
  }

  /// The id already assigned to a native id, if any.
  pub fn lookup_native(&self, native: &str) -> Option<String> {
    self
      .stored_by_native
      .get(native)
      .or_else(|| self.run_by_native.get(native))
      .cloned()
  }

  /// Number of distinct ids handed out so far.
  pub fn len(&self) -> usize { self.taken.len() }

  pub fn is_empty(&self) -> bool { self.taken.is_empty() }

  fn resolve_parts(&mut self, fingerprint: &Fingerprint, native: Option<&str>) -> String {
    let id = match self.lookup(fingerprint, native) {
      Some(id) => id,
      None => {
        let base = native
          .map(sanitize_native)
          .filter(|n| !n.is_empty())
          .unwrap_or_else(|| fingerprint.derived_id());
        self.unique_id(base)
      }
    };
    self.claim(&id, fingerprint, native);
    id
  }

  fn lookup(&self, fingerprint: &Fingerprint, native: Option<&str>) -> Option<String> {
    if let Some(native) = native {
      if let Some(id) = self.lookup_native(native) {
        return Some(id);
      }
    }
    let fp = fingerprint.as_str();
    [
      self.run_by_fingerprint.get(fp),
      self.stored_by_fingerprint.get(fp),
    ]
    .into_iter()
    .flatten()
    .find(|id| self.compatible(id, native))
    .cloned()
  }

  /// A fingerprint match is refused when both sides know different native ids.
  fn compatible(&self, id: &str, native: Option<&str>) -> bool {
    match (self.native_of.get(id), native) {
      (Some(known), Some(native)) => known == native,
      _ => true,
    }
  }

  /// Append `_1`, `_2`, ... until `base` no longer collides with any id in
  /// use for this post.
  fn unique_id(&self, base: String) -> String {
    let in_use = |id: &str| self.taken.contains(id) || self.stored_ids.contains(id);
    if !in_use(&base) {
      return base;
    }
    (1..)
      .map(|ordinal| format!("{base}_{ordinal}"))
      .find(|candidate| !in_use(candidate))
      .unwrap_or(base)
  }

  fn claim(&mut self, id: &str, fingerprint: &Fingerprint, native: Option<&str>) {
    self.taken.insert(id.to_owned());
    self
      .run_by_fingerprint
      .entry(fingerprint.as_str().to_owned())
      .or_insert_with(|| id.to_owned());
    if let Some(native) = native {
      self
        .run_by_native
        .entry(native.to_owned())
        .or_insert_with(|| id.to_owned());
      self
        .native_of
        .entry(id.to_owned())
        .or_insert_with(|| native.to_owned());
    }
  }
}

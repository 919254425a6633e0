//! Error types for `skein-reconcile`.

use std::time::Duration;

use skein_core::capture::Surface;
use thiserror::Error;

/// Failures that can escape the reconciler.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] skein_core::Error),

  /// The store rejected a read or write.
  #[error("persistence failure: {0}")]
  Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A post URL was expected to be stored but is not.
  #[error("post not found: {0}")]
  PostNotFound(String),
}

impl Error {
  pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Persistence(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Recoverable harvest failures. The controller logs these and degrades; they
/// never abort a run.
#[derive(Debug, Error)]
pub enum HarvestError {
  /// Counted as a no-growth round.
  #[error("capture on {surface:?} timed out after {after:?}")]
  CaptureTimeout { surface: Surface, after: Duration },

  /// The drill candidate is skipped.
  #[error("navigation to {permalink} failed: {reason}")]
  NavigationFailure { permalink: String, reason: String },

  /// The drill candidate is skipped.
  #[error("expanding replies failed: {0}")]
  ExpandFailure(String),

  #[error("capture failed: {0}")]
  Capture(String),
}

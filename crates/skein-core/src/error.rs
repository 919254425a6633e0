//! Error types for `skein-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Neither an author handle nor any text survived normalisation.
  #[error("observation has no handle and no text")]
  Unidentifiable,

  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

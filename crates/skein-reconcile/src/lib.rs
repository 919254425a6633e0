//! Thread reconciliation: turns repeated, partial captures of a discussion
//! thread into one deduplicated comment tree.
//!
//! The flow for one post is
//!
//! 1. [`HarvestController::run`] drives a [`PageCapture`] until the main
//!    surface stabilises, then drills into the most promising comments;
//!    every card becomes an [`Observation`] via [`normalize`].
//! 2. [`reconcile`] gives each observation a stable id ([`IdentityResolver`]),
//!    folds observations of the same comment together ([`MergeEngine`]) and
//!    repairs parent links and depths ([`repair()`]).
//! 3. [`ingest`] writes the result through a [`ThreadStore`] in idempotent
//!    chunks; [`repair_stored`] and [`verify_ingest`] work on stored state.
//!
//! [`PageCapture`]: skein_core::capture::PageCapture
//! [`ThreadStore`]: skein_core::store::ThreadStore

pub mod error;
pub mod feed;
pub mod harvest;
pub mod identity;
pub mod link;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod repair;
pub mod text;
pub mod tree;
pub mod verify;

#[cfg(test)]
mod test_store;

pub use error::{Error, HarvestError, Result};
pub use harvest::{Harvest, HarvestConfig, HarvestController, HarvestStats};
pub use identity::{Fingerprint, IdentityResolver};
pub use merge::MergeEngine;
pub use normalize::{Observation, normalize};
pub use pipeline::{
  IngestConfig, IngestReport, Reconciled, RunSummary, ingest, known_records, reconcile,
  repair_stored,
};
pub use repair::{RepairOutcome, repair};
pub use tree::{ThreadNode, build_thread_tree};
pub use verify::{VerifyReport, verify_ingest};

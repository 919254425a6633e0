//! Core types and port definitions for Skein, the thread reconciler.
//!
//! It has no browser or database dependencies; every other crate depends on
//! it.

pub mod capture;
pub mod card;
pub mod comment;
pub mod error;
pub mod post;
pub mod store;

pub use error::{Error, Result};

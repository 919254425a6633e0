//! The `PageCapture` port, the boundary to whatever drives the browser.
//!
//! Implementations own two browsing contexts: the main thread view and an
//! auxiliary one reserved for drilling into a single comment's replies. The
//! harvest controller never issues two calls against the same context at once.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::card::CaptureRound;

/// Which browsing context a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
  Main,
  Drill,
}

/// Abstraction over a page capture backend.
///
/// Calls may hang; the caller wraps every one of them in its own timeout, so
/// implementations need not enforce deadlines themselves.
pub trait PageCapture: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Extract the cards currently rendered on `surface`.
  fn capture(
    &mut self,
    surface: Surface,
  ) -> impl Future<Output = Result<CaptureRound, Self::Error>> + Send + '_;

  /// Scroll `surface` to load more content.
  fn scroll(
    &mut self,
    surface: Surface,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Navigate the drill context to a comment permalink.
  fn open_drill<'a>(
    &'a mut self,
    permalink: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Click up to `max_clicks` "view replies" affordances on the drill
  /// context. Returns how many were clicked.
  fn expand_replies(
    &mut self,
    max_clicks: usize,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}

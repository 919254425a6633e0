//! Runtime configuration: an optional TOML file layered under `SKEIN_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;
use skein_reconcile::{HarvestConfig, IngestConfig, link::DEFAULT_PERMALINK_BASE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SkeinConfig {
  /// SQLite database file; a leading `~/` is expanded.
  pub store_path:     PathBuf,
  /// Prefix for relative comment permalinks.
  pub permalink_base: String,
  pub harvest:        HarvestConfig,
  pub ingest:         IngestConfig,
}

impl Default for SkeinConfig {
  fn default() -> Self {
    Self {
      store_path:     PathBuf::from("skein.db"),
      permalink_base: DEFAULT_PERMALINK_BASE.to_owned(),
      harvest:        HarvestConfig::default(),
      ingest:         IngestConfig::default(),
    }
  }
}

impl SkeinConfig {
  /// Read `path` (if it exists) and overlay the environment.
  /// `SKEIN_HARVEST__MAX_ROUNDS=20` sets `harvest.max_rounds`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    Self::from_builder(
      Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
          Environment::with_prefix("SKEIN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
        ),
    )
  }

  fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
    builder
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise SkeinConfig")
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use config::FileFormat;

  use super::*;

  fn from_toml(toml: &str) -> SkeinConfig {
    SkeinConfig::from_builder(
      Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
    )
    .unwrap()
  }

  #[test]
  fn empty_config_is_all_defaults() {
    assert_eq!(from_toml(""), SkeinConfig::default());
  }

  #[test]
  fn nested_sections_override_single_fields() {
    let cfg = from_toml(
      r#"
      store_path = "/var/lib/skein.db"

      [harvest]
      max_rounds = 20
      max_drill_candidates = 8

      [ingest]
      edge_chunk = 50
      "#,
    );
    assert_eq!(cfg.store_path, PathBuf::from("/var/lib/skein.db"));
    assert_eq!(cfg.harvest.max_rounds, 20);
    assert_eq!(cfg.harvest.max_drill_candidates, 8);
    assert_eq!(cfg.harvest.stable_rounds, 2);
    assert_eq!(cfg.ingest.edge_chunk, 50);
    assert_eq!(cfg.ingest.comment_chunk, 200);
    assert_eq!(cfg.permalink_base, DEFAULT_PERMALINK_BASE);
  }

  #[test]
  fn missing_file_is_fine() {
    let cfg = SkeinConfig::from_builder(
      Config::builder().add_source(File::from(Path::new("/nonexistent/skein.toml")).required(false)),
    )
    .unwrap();
    assert_eq!(cfg.harvest, HarvestConfig::default());
  }

  #[test]
  fn tilde_expands_against_home() {
    let plain = PathBuf::from("/tmp/skein.db");
    assert_eq!(expand_tilde(&plain), plain);
    if let Ok(home) = std::env::var("HOME") {
      assert_eq!(expand_tilde(Path::new("~/x.db")), PathBuf::from(home).join("x.db"));
    }
  }
}

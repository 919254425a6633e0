//! `skein`: reconcile recorded thread captures into a SQLite comment store.
//!
//! # Usage
//!
//! ```
//! skein ingest session.json          # harvest, reconcile and store one thread
//! skein repair https://www.threads.net/@op/post/ABC
//! skein verify session.json --scratch
//! skein export https://www.threads.net/@op/post/ABC > thread.json
//! ```
//!
//! Configuration comes from `skein.toml` (or `--config`) and `SKEIN_*`
//! environment variables. Logs go to stderr; results are JSON on stdout.

mod replay;
mod settings;

use std::{
  path::{Path, PathBuf},
  process::ExitCode,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::json;
use skein_core::store::ThreadStore;
use skein_reconcile::{
  Harvest, HarvestController, build_thread_tree, ingest, known_records, link::normalize_post_url,
  reconcile, repair_stored, verify_ingest,
};
use skein_store_sqlite::SqliteStore;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use replay::{ReplayCapture, Session};
use settings::SkeinConfig;

#[derive(Parser)]
#[command(author, version, about = "Thread capture reconciler")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "skein.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Replay a recorded session, reconcile it, and write it to the store.
  Ingest {
    session: PathBuf,
  },
  /// Re-run tree repair over a stored post.
  Repair {
    url: String,
  },
  /// Ingest a session twice and check what landed.
  Verify {
    session: PathBuf,
    /// Use a throwaway in-memory store instead of the configured one.
    #[arg(long)]
    scratch: bool,
  },
  /// Print a stored post as a nested reply tree.
  Export {
    url: String,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = SkeinConfig::load(&cli.config)?;

  match cli.command {
    Command::Ingest { session } => {
      let store = open_store(&config).await?;
      let harvest = harvest_session(&config, &session).await?;
      let known = known_records(&store, &harvest.post.url)
        .await
        .context("failed to load stored comments")?;
      let reconciled = reconcile(&harvest, &known);
      let report = ingest(&store, &reconciled, &config.ingest).await;
      print_json(&json!({
        "harvest": harvest.stats,
        "summary": reconciled.summary,
        "ingest": report,
      }))?;
      Ok(exit_code(report.ok))
    }

    Command::Repair { url } => {
      let store = open_store(&config).await?;
      let post = find_post(&store, &url).await?;
      let outcome = repair_stored(&store, post.post_id)
        .await
        .context("tree repair failed")?;
      if !outcome.converged {
        warn!(passes = outcome.passes, "repair hit its pass bound; state is best effort");
      }
      print_json(&json!({
        "post_id": post.post_id,
        "updates": outcome.updates.len(),
        "passes": outcome.passes,
        "converged": outcome.converged,
      }))?;
      Ok(ExitCode::SUCCESS)
    }

    Command::Verify { session, scratch } => {
      let store = if scratch {
        SqliteStore::open_in_memory()
          .await
          .context("failed to open in-memory store")?
      } else {
        open_store(&config).await?
      };
      let harvest = harvest_session(&config, &session).await?;
      let known = known_records(&store, &harvest.post.url)
        .await
        .context("failed to load stored comments")?;
      let reconciled = reconcile(&harvest, &known);
      let report = verify_ingest(&store, &reconciled, &config.ingest)
        .await
        .context("verification could not read the store")?;
      for failure in &report.failures {
        warn!(%failure, "verification failed");
      }
      print_json(&report)?;
      Ok(exit_code(report.passed()))
    }

    Command::Export { url } => {
      let store = open_store(&config).await?;
      let post = find_post(&store, &url).await?;
      let records = store
        .list_comments(post.post_id)
        .await
        .context("failed to load comments")?;
      print_json(&json!({
        "post_id": post.post_id,
        "url": post.url,
        "comments": build_thread_tree(&records),
      }))?;
      Ok(ExitCode::SUCCESS)
    }
  }
}

async fn open_store(config: &SkeinConfig) -> anyhow::Result<SqliteStore> {
  let store_path = config.store_path();
  SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))
}

async fn find_post(store: &SqliteStore, url: &str) -> anyhow::Result<skein_core::post::PostRow> {
  let url = normalize_post_url(url);
  store
    .find_post(&url)
    .await
    .context("failed to look up post")?
    .with_context(|| format!("no stored post for {url}"))
}

/// Replay `path` through the harvest controller. Ctrl-C stops the harvest at
/// the next round boundary; whatever was collected is still returned.
async fn harvest_session(config: &SkeinConfig, path: &Path) -> anyhow::Result<Harvest> {
  let session = Session::from_path(path)
    .await
    .with_context(|| format!("failed to load session {}", path.display()))?;
  let url = session.url.clone();
  let crawled_at = session.crawled_at;

  let cancel = Arc::new(AtomicBool::new(false));
  let flag = Arc::clone(&cancel);
  let watcher = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      flag.store(true, Ordering::Relaxed);
    }
  });

  let controller = HarvestController::new(config.harvest.clone())
    .with_permalink_base(config.permalink_base.clone())
    .with_cancel(cancel);
  let mut capture = ReplayCapture::new(session);
  let mut harvest = controller.run(&mut capture, &url).await;
  watcher.abort();

  // A recorded crawl time keeps replays reproducible.
  if let Some(at) = crawled_at {
    harvest.crawled_at = at;
  }
  info!(
    url = %harvest.post.url,
    observations = harvest.observations.len(),
    "session harvested"
  );
  Ok(harvest)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
  let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
  println!("{text}");
  Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
  if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

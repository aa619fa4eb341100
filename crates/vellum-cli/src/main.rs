//! vellum: inspect and trim a directory under eviction limits.
//!
//! Usage:
//!   # How much is in the store
//!   vellum stats /var/cache/thumbs
//!
//!   # Trim to at most 1000 files, least recently used first
//!   vellum --max-files 1000 prune /var/cache/thumbs
//!
//!   # Limits from a RON file, flags override individual fields
//!   vellum --config limits.ron --policy largest-first prune /var/cache/thumbs
//!
//! Logs go to stderr; set RUST_LOG=vellum_evict=debug to see each eviction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt};

use vellum_evict::{EvictFs, Limits, PolicyKind};
use vellum_vfs::{LocalBackend, OpContext};

/// Eviction-bounded store maintenance.
#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(about = "Keep a directory within file count, size and age limits")]
struct Args {
    /// RON file with limits; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of files (0 = unbounded)
    #[arg(long)]
    max_files: Option<usize>,

    /// Maximum total size in bytes (0 = unbounded)
    #[arg(long)]
    max_size: Option<u64>,

    /// Maximum seconds since last access (0 = never expire)
    #[arg(long)]
    max_age: Option<u64>,

    /// Which files go first
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    /// Least recently accessed first
    Lru,
    /// Largest first
    LargestFirst,
}

impl From<Policy> for PolicyKind {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Lru => PolicyKind::Lru,
            Policy::LargestFirst => PolicyKind::LargestFirst,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print how many files and bytes the store holds
    Stats {
        /// Store directory
        dir: PathBuf,
    },
    /// Evict until the count and size limits hold
    Prune {
        /// Store directory
        dir: PathBuf,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

impl Args {
    /// Config file limits with command-line overrides applied.
    fn limits(&self) -> Result<Limits> {
        let mut limits = match &self.config {
            Some(path) => Limits::load(path)
                .with_context(|| format!("loading limits from {}", path.display()))?,
            None => Limits::default(),
        };
        if let Some(n) = self.max_files {
            limits.max_files = n;
        }
        if let Some(n) = self.max_size {
            limits.max_size = n;
        }
        if let Some(secs) = self.max_age {
            limits.max_age_secs = secs;
        }
        if let Some(policy) = self.policy {
            limits.policy = policy.into();
        }
        Ok(limits)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let limits = args.limits()?;
    tracing::debug!(?limits, "effective limits");

    match &args.command {
        Command::Stats { dir } => {
            let fs = open(dir, limits).await?;
            let stats = fs.stats();
            println!("{} files, {} bytes", stats.files, stats.bytes);
            fs.shutdown().await;
        }
        Command::Prune { dir, timeout } => {
            let fs = open(dir, limits).await?;
            let before = fs.stats();
            fs.enforce();

            let settled = tokio::time::timeout(Duration::from_secs(*timeout), async {
                while fs.over_bounds() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await;

            let after = fs.stats();
            fs.shutdown().await;
            println!(
                "evicted {} files ({} bytes); {} files, {} bytes remain",
                before.files.saturating_sub(after.files),
                before.bytes.saturating_sub(after.bytes),
                after.files,
                after.bytes,
            );
            if settled.is_err() {
                bail!("still over limits after {timeout}s");
            }
        }
    }
    Ok(())
}

async fn open(dir: &Path, limits: Limits) -> Result<EvictFs> {
    let backing = LocalBackend::new(dir);
    let cx = OpContext::background();
    EvictFs::new(&cx, Arc::new(backing), limits.into_config())
        .await
        .with_context(|| format!("scanning {}", dir.display()))
}

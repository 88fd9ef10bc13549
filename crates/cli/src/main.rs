//! hsync: mirror a remote HTTP tree to a local directory
//!
//! The remote serves a `.dirindex` manifest per directory; hsync walks
//! the manifests, fetches what changed, removes what the server no
//! longer lists, and keeps a hash cache so unchanged files cost nothing
//! on the next run.

mod config;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use tracing::{info, warn};

use hsync_core::{SyncEngine, SyncStatus};
use hsync_transport::HttpTransport;

use config::HsyncConfig;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "hsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Mirror a remote HTTP tree to a local directory")]
#[command(long_about = r#"
hsync mirrors a repository served over plain HTTP.

Every directory on the server exposes a .dirindex manifest listing its
children with SHA-1 hashes. hsync fetches only what changed, deletes
what the server no longer lists, and remembers file hashes in
<dest>/.hashes so unchanged files are never re-read.

Defaults for URL, DEST and the watch interval can live in a .hsync.toml
next to where you run hsync.

Examples:
  hsync sync ./scenery https://example.net/repo    One-shot mirror
  hsync watch ./scenery https://example.net/repo   Mirror every 5 minutes
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the remote tree once
    Sync {
        /// Local mirror directory
        dest: Option<PathBuf>,

        /// Remote repository URL
        url: Option<String>,
    },

    /// Mirror the remote tree repeatedly on an interval
    Watch {
        /// Local mirror directory
        dest: Option<PathBuf>,

        /// Remote repository URL
        url: Option<String>,

        /// Seconds between syncs
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = HsyncConfig::load(Path::new("."))?;

    match cli.command {
        Commands::Sync { dest, url } => {
            let (dest, url) = resolve_target(dest, url, &config)?;
            run_sync(&dest, &url)
        }
        Commands::Watch {
            dest,
            url,
            interval,
        } => {
            let (dest, url) = resolve_target(dest, url, &config)?;
            let interval =
                Duration::from_secs(interval.or(config.interval).unwrap_or(300));
            loop {
                if let Err(err) = run_sync(&dest, &url) {
                    warn!(%err, "sync failed");
                }
                std::thread::sleep(interval);
            }
        }
    }
}

/// One full sync: fetch the root manifest, drain the request queue,
/// report what moved
fn run_sync(dest: &Path, url: &str) -> Result<()> {
    let transport = HttpTransport::new()?;
    let mut engine = SyncEngine::new(dest, transport);
    engine.set_base_url(url);

    engine.update();
    HttpTransport::drive(&mut engine);

    match engine.failure() {
        SyncStatus::Ok => {
            let stats = engine.stats();
            info!(
                files = stats.files_fetched,
                dirs = stats.dirs_fetched,
                orphans = stats.orphans_removed,
                failed = stats.failed_requests,
                "sync complete"
            );
            Ok(())
        }
        SyncStatus::NotFound => bail!("repository not found at {url}"),
        SyncStatus::IoError => bail!(
            "could not write repository data under {}",
            dest.display()
        ),
    }
}

fn resolve_target(
    dest: Option<PathBuf>,
    url: Option<String>,
    config: &HsyncConfig,
) -> Result<(PathBuf, String)> {
    let dest = dest
        .or_else(|| config.dest.clone())
        .ok_or_else(|| eyre!("no DEST given and no `dest` in {}", config::CONFIG_FILE))?;
    let url = url
        .or_else(|| config.url.clone())
        .ok_or_else(|| eyre!("no URL given and no `url` in {}", config::CONFIG_FILE))?;
    Ok((dest, url))
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "hsync=debug,hsync_core=debug,hsync_transport=debug"
    } else {
        "hsync=info,hsync_core=info,hsync_transport=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

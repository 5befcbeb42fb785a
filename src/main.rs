use ani_rss::collab::{FeedFile, KvStore, LogNotifier};
use ani_rss::config::Config;
use ani_rss::engine::Engine;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

/// Parse args
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[clap(short, long)]
    config: PathBuf,

    /// JSON file with the resolved feed candidates of each subscription
    #[clap(short, long)]
    feed: PathBuf,

    /// Keep running, starting a new round every this many seconds. Files are
    /// only renamed once their download finished, which needs a later round.
    #[clap(short, long)]
    interval: Option<u64>,
}

fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .filter(None, log::LevelFilter::Warn)
        .filter(Some("ani_rss"), log::LevelFilter::Info)
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_default())
        .init();

    let args = Args::parse();

    let cfg = load_config(&args.config)?;
    let feed = FeedFile::open(&args.feed)?;

    let store = KvStore::open(&cfg.persistence.path)?;
    let mut subscriptions = cfg.subscriptions.clone();
    for ani in &mut subscriptions {
        store.restore(ani);
    }

    let engine = Engine::new(cfg, feed, LogNotifier, store)
        .context("Unable to set up the download backend")?;

    loop {
        engine.pass(&mut subscriptions);

        let Some(interval) = args.interval else {
            break;
        };
        log::debug!("Next round in {interval}s");
        thread::sleep(Duration::from_secs(interval));
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let file =
        fs::read_to_string(path).with_context(|| format!("Failed to open config file {path:?}"))?;

    let cfg: Config = toml::from_str(&file).context("Config file is invalid")?;

    ensure_exists(&cfg.torrents_dir())?;
    if let Some(dir) = cfg.persistence.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        ensure_exists(dir)?;
    }

    Ok(cfg)
}

fn ensure_exists(dir: &Path) -> Result<()> {
    let exists = dir
        .try_exists()
        .with_context(|| format!("Couldn't access directory {dir:?}"))?;

    if !exists {
        log::info!("Creating directory {dir:?}");
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Unable to create directory {dir:?}"))?;
    }

    Ok(())
}

//! Interfaces to the parts of the system living outside the engine, and the
//! small implementations the command line tool wires in.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::{Ani, Item};

/// Candidates of a subscription, oldest first.
pub trait Feed: Send {
    fn items(&self, ani: &Ani) -> Vec<Item>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    DownloadStart,
    Error,
}

/// Fire-and-forget notifications; delivery problems stay with the notifier.
pub trait Notifier: Send {
    fn send(&self, cfg: &Config, ani: &Ani, text: &str, kind: MessageKind);
}

/// Saves a subscription after the engine changed it.
pub trait Persist: Send {
    fn persist(&self, ani: &Ani);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, _cfg: &Config, ani: &Ani, text: &str, kind: MessageKind) {
        match kind {
            MessageKind::DownloadStart => log::info!("{}: {text}", ani.title),
            MessageKind::Error => log::error!("{}: {text}", ani.title),
        }
    }
}

/// Subscription state kept across runs in a `kv` store.
pub struct KvStore {
    db: kv::Store<Ani>,
}

impl KvStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = kv::Store::open(path)
            .with_context(|| format!("Unable to open persistence file {path:?}"))?;
        Ok(KvStore { db })
    }

    /// Carries the saved progress over to a subscription read from the config.
    pub fn restore(&self, ani: &mut Ani) {
        let key = ani.key();
        match self.db.get(&key) {
            Ok(Some(saved)) => {
                ani.enable = saved.enable;
                ani.current_episode_number = saved.current_episode_number;
            }
            Ok(None) => (),
            Err(err) => log::error!("Error looking for `{key}` in database: {err}"),
        }
    }
}

impl Persist for KvStore {
    fn persist(&self, ani: &Ani) {
        if let Err(err) = self.db.set(&ani.key(), ani) {
            log::error!("Failed to save `{}` into db: {err:?}", ani.key());
        }
    }
}

/// Candidates resolved ahead of time by the feed parser, read from JSON.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct MaterializedFeed {
    pub entries: Vec<FeedEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeedEntry {
    pub title: String,
    #[serde(default = "first_season")]
    pub season: u32,
    pub items: Vec<Item>,
}

fn first_season() -> u32 {
    1
}

impl MaterializedFeed {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = fs::read_to_string(path)
            .with_context(|| format!("Failed to open feed file {path:?}"))?;
        serde_json::from_str(&file).context("Feed file is invalid")
    }
}

impl Feed for MaterializedFeed {
    fn items(&self, ani: &Ani) -> Vec<Item> {
        self.entries
            .iter()
            .filter(|entry| entry.title.trim() == ani.title.trim() && entry.season == ani.season)
            .flat_map(|entry| entry.items.iter().cloned())
            .collect()
    }
}

/// A feed file that is read again on every lookup, so a long running process
/// picks up whatever the feed parser wrote since the last round.
pub struct FeedFile {
    path: PathBuf,
}

impl FeedFile {
    /// Fails when the file cannot be read at all, later read errors only log.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        MaterializedFeed::load(path)?;
        Ok(FeedFile {
            path: path.to_path_buf(),
        })
    }
}

impl Feed for FeedFile {
    fn items(&self, ani: &Ani) -> Vec<Item> {
        match MaterializedFeed::load(&self.path) {
            Ok(feed) => feed.items(ani),
            Err(err) => {
                log::error!("{err:#}");
                Vec::new()
            }
        }
    }
}

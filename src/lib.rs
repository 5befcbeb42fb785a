pub mod backend;
pub mod cache;
pub mod collab;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod paths;
pub mod retry;
pub mod selector;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

/// Upper bound for a single HTTP or RPC round-trip to a download backend.
pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Where a subscription's feed comes from. Decides whether cached payloads
/// are plain tracker links or binary torrents.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    #[default]
    Mikan,
    Dmhy,
    Nyaa,
    #[serde(other)]
    Other,
}

impl FeedKind {
    /// Extension of the cached payload file.
    pub fn payload_ext(self) -> &'static str {
        match self {
            FeedKind::Dmhy => "txt",
            _ => "torrent",
        }
    }
}

/// One tracked show/season.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Ani {
    pub title: String,
    pub season: u32,
    pub year: i32,
    pub month: u32,
    pub ova: bool,
    pub enable: bool,
    /// Only fetch the newest candidate of the feed.
    pub download_new: bool,
    pub total_episode_number: u32,
    pub current_episode_number: u32,
    pub custom_download_path: bool,
    pub download_path: String,
    pub back_rss_list: Vec<String>,
    #[serde(rename = "type")]
    pub kind: FeedKind,
    pub url: String,
}

impl Default for Ani {
    fn default() -> Self {
        Ani {
            title: String::new(),
            season: 1,
            year: 0,
            month: 1,
            ova: false,
            enable: true,
            download_new: false,
            total_episode_number: 0,
            current_episode_number: 0,
            custom_download_path: false,
            download_path: String::new(),
            back_rss_list: Vec::new(),
            kind: FeedKind::default(),
            url: String::new(),
        }
    }
}

impl Ani {
    /// Key under which the subscription state is persisted.
    pub fn key(&self) -> String {
        format!("{}/{}", self.title.trim(), self.season)
    }
}

/// A feed entry resolved to a concrete release.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Item {
    pub re_name: String,
    pub episode: f64,
    #[serde(default)]
    pub subgroup: String,
    /// Torrent URL, or the raw tracker link for link-payload feeds.
    pub torrent: String,
    pub info_hash: String,
    #[serde(default = "primary")]
    pub master: bool,
}

fn primary() -> bool {
    true
}

impl Item {
    /// `.5` episodes are recaps/specials and never count towards totals.
    pub fn is_special(&self) -> bool {
        self.re_name.ends_with(".5")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Downloading,
    /// Completed, seeding or idle.
    PausedUp,
    /// Completed and inactive.
    StoppedUp,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::PausedUp | TaskState::StoppedUp)
    }
}

/// A backend's view of a submitted torrent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub hash: String,
    pub state: TaskState,
    pub download_dir: String,
    pub files: Vec<String>,
    pub tags: Vec<String>,
}

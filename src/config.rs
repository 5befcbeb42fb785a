use std::fs::read_to_string;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Ani;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Holds the torrent cache (`<config_dir>/torrents`).
    pub config_dir: PathBuf,
    pub download_path: String,
    /// Root for one-shot media; falls back to `download_path` when blank.
    pub ova_download_path: String,
    pub season_name: SeasonName,
    /// Bucket download folders by the title's first letter.
    pub acronym: bool,
    /// Bucket download folders by air quarter (`YYYY-MM`).
    pub quarter: bool,
    /// Probe the download folders for already materialized episodes.
    pub file_exist: bool,
    pub rename: bool,
    /// Remove completed tasks from the backend.
    pub delete: bool,
    pub back_rss: bool,
    pub auto_disabled: bool,
    /// Ceiling on unfinished tasks, 0 disables it.
    pub download_count: usize,
    pub settle_delay_ms: u64,
    pub downloader: Downloader,
    pub persistence: Persistence,
    pub subscriptions: Vec<Ani>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            config_dir: default_config_dir(),
            download_path: String::new(),
            ova_download_path: String::new(),
            season_name: SeasonName::default(),
            acronym: false,
            quarter: false,
            file_exist: false,
            rename: true,
            delete: false,
            back_rss: false,
            auto_disabled: false,
            download_count: 0,
            settle_delay_ms: 1000,
            downloader: Downloader::default(),
            persistence: Persistence::default(),
            subscriptions: Vec::new(),
        }
    }
}

impl Config {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn torrents_dir(&self) -> PathBuf {
        self.config_dir.join("torrents")
    }
}

fn default_config_dir() -> PathBuf {
    home::home_dir()
        .map(|home| home.join(".config").join("ani-rss"))
        .unwrap_or_else(|| PathBuf::from("config"))
}

/// Naming scheme of season folders.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeasonName {
    #[default]
    #[serde(rename = "Season 1")]
    Long,
    #[serde(rename = "S01")]
    Short,
    #[serde(rename = "None")]
    Flat,
}

impl SeasonName {
    pub fn folder(self, season: u32) -> String {
        match self {
            SeasonName::Long => format!("Season {season}"),
            SeasonName::Short => format!("S{season:02}"),
            SeasonName::Flat => String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Transmission,
    Aria2,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawDownloader")]
pub struct Downloader {
    pub kind: BackendKind,
    pub url: Option<Url>,
    pub username: String,
    /// Password, or the RPC secret for Aria2.
    pub password: String,
    /// Confirm every submission shows up in the task list.
    pub watch_error_torrent: bool,
}

impl Default for Downloader {
    fn default() -> Self {
        Downloader {
            kind: BackendKind::default(),
            url: None,
            username: String::new(),
            password: String::new(),
            watch_error_torrent: true,
        }
    }
}

impl TryFrom<RawDownloader> for Downloader {
    type Error = std::io::Error;

    fn try_from(value: RawDownloader) -> Result<Self, Self::Error> {
        let password = match value.password {
            Some(Password::Raw { password }) => password,
            Some(Password::File { password_file }) => {
                read_to_string(password_file)?.trim().to_string()
            }
            None => String::new(),
        };
        Ok(Downloader {
            kind: value.kind,
            url: value.url,
            username: value.username,
            password,
            watch_error_torrent: value.watch_error_torrent,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawDownloader {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub url: Option<Url>,
    #[serde(default)]
    pub username: String,
    #[serde(flatten)]
    pub password: Option<Password>,
    #[serde(default = "enabled")]
    pub watch_error_torrent: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Password {
    Raw { password: String },
    File { password_file: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Persistence {
    pub path: PathBuf,
}

impl Default for Persistence {
    fn default() -> Self {
        Persistence {
            path: default_config_dir().join("state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            download_path = "/media/anime"

            [downloader]
            kind = "Aria2"
            url = "http://localhost:6800"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.downloader.kind, BackendKind::Aria2);
        assert_eq!(cfg.downloader.password, "secret");
        assert!(cfg.downloader.watch_error_torrent);
        assert_eq!(cfg.season_name, SeasonName::Long);
        assert_eq!(cfg.settle_delay_ms, 1000);
        assert_eq!(cfg.download_count, 0);
        assert!(cfg.subscriptions.is_empty());
    }

    #[test]
    fn reads_password_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret");
        std::fs::write(&secret, "hunter2\n").unwrap();

        let cfg: Config = toml::from_str(&format!(
            r#"
            [downloader]
            url = "http://localhost:9091"
            username = "admin"
            password_file = "{}"
            "#,
            secret.display()
        ))
        .unwrap();

        assert_eq!(cfg.downloader.kind, BackendKind::Transmission);
        assert_eq!(cfg.downloader.password, "hunter2");
    }

    #[test]
    fn missing_credentials_are_left_blank() {
        let cfg: Config = toml::from_str("[downloader]\nkind = \"Transmission\"\n").unwrap();
        assert!(cfg.downloader.url.is_none());
        assert!(cfg.downloader.password.is_empty());
    }

    #[test]
    fn season_folder_formats() {
        assert_eq!(SeasonName::Long.folder(2), "Season 2");
        assert_eq!(SeasonName::Short.folder(2), "S02");
        assert_eq!(SeasonName::Flat.folder(2), "");
    }
}

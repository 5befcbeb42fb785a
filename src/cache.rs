//! On-disk cache of submitted torrent payloads.
//!
//! The mere existence of `<info_hash>.{torrent,txt}` marks an episode as
//! handled, independently of what the backend still knows about.

use std::fs;
use std::path::{Path, PathBuf};

use reqwest::blocking::Client;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::paths::bucket;
use crate::{Ani, Item};

/// Cache folder of a subscription.
///
/// The flat layout is kept when it already exists, otherwise the bucketed one
/// is used, so changing the bucket scheme never orphans earlier downloads.
pub fn torrent_dir(cfg: &Config, ani: &Ani) -> PathBuf {
    let root = cfg.torrents_dir();
    let title = ani.title.trim();
    let relative = if ani.ova {
        PathBuf::from(title)
    } else {
        Path::new(title).join(format!("Season {}", ani.season))
    };

    let flat = root.join(&relative);
    if flat.exists() {
        return flat;
    }
    root.join(bucket(title)).join(relative)
}

pub fn torrent_file(cfg: &Config, ani: &Ani, item: &Item) -> PathBuf {
    torrent_dir(cfg, ani).join(format!(
        "{}.{}",
        item.info_hash.trim(),
        ani.kind.payload_ext()
    ))
}

/// Writes the candidate's payload into the cache unless it is already there.
///
/// Link feeds store the locator text itself; every other feed stores the
/// torrent fetched from the locator URL.
pub fn save_torrent(cfg: &Config, ani: &Ani, item: &Item, http: &Client) -> Result<PathBuf> {
    let file = torrent_file(cfg, ani, item);
    if file.exists() {
        return Ok(file);
    }
    log::info!("Saving torrent for `{}`", item.re_name);

    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
    }

    let bytes = if ani.kind.payload_ext() == "txt" {
        item.torrent.clone().into_bytes()
    } else {
        http.get(&item.torrent)
            .send()?
            .error_for_status()?
            .bytes()?
            .to_vec()
    };

    fs::write(&file, bytes).map_err(|err| Error::io(&file, err))?;
    Ok(file)
}

/// Drops a cached payload so the next pass starts over for that episode.
pub fn forget(file: &Path) {
    if let Err(err) = fs::remove_file(file) {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::error!("Unable to remove cached torrent {file:?}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeedKind;

    fn setup() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            config_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        (dir, cfg)
    }

    fn show(kind: FeedKind) -> Ani {
        Ani {
            title: "Frieren".to_string(),
            season: 1,
            kind,
            ..Ani::default()
        }
    }

    fn item() -> Item {
        Item {
            re_name: "Frieren S01E01".to_string(),
            episode: 1.0,
            subgroup: "Group".to_string(),
            torrent: "magnet:?xt=urn:btih:abc123".to_string(),
            info_hash: "abc123".to_string(),
            master: true,
        }
    }

    #[test]
    fn new_subscriptions_are_bucketed() {
        let (dir, cfg) = setup();
        assert_eq!(
            torrent_dir(&cfg, &show(FeedKind::Mikan)),
            dir.path().join("torrents/F/Frieren/Season 1")
        );
    }

    #[test]
    fn existing_flat_layout_wins() {
        let (dir, cfg) = setup();
        let flat = dir.path().join("torrents/Frieren/Season 1");
        fs::create_dir_all(&flat).unwrap();
        assert_eq!(torrent_dir(&cfg, &show(FeedKind::Mikan)), flat);
    }

    #[test]
    fn one_shot_has_no_season_folder() {
        let (dir, cfg) = setup();
        let mut movie = show(FeedKind::Mikan);
        movie.ova = true;
        assert_eq!(torrent_dir(&cfg, &movie), dir.path().join("torrents/F/Frieren"));
    }

    #[test]
    fn extension_follows_feed_kind() {
        let (_dir, cfg) = setup();
        assert!(torrent_file(&cfg, &show(FeedKind::Dmhy), &item())
            .ends_with("abc123.txt"));
        assert!(torrent_file(&cfg, &show(FeedKind::Nyaa), &item())
            .ends_with("abc123.torrent"));
    }

    #[test]
    fn link_payload_is_written_verbatim() {
        let (_dir, cfg) = setup();
        let ani = show(FeedKind::Dmhy);
        let file = save_torrent(&cfg, &ani, &item(), &Client::new()).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "magnet:?xt=urn:btih:abc123");

        forget(&file);
        assert!(!file.exists());
        forget(&file);
    }
}

//! Download folder resolution and the filesystem side of deduplication.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::config::Config;
use crate::{Ani, Item};

/// `S01E05`, `S2E10.5`: the naming pattern given to renamed episodes.
pub static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"S(\d+)E(\d+(?:\.5)?)").expect("season/episode regex"));

static SEASON_DIR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]+").expect("season prefix regex"));

static SEASON_DIR_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+$").expect("season number regex"));

pub const VIDEO_FORMATS: [&str; 4] = ["mp4", "mkv", "avi", "wmv"];

/// Alphabetic bucket of a title: upper-cased first letter, `0` for digits,
/// `#` for anything else.
pub fn bucket(title: &str) -> String {
    match title.trim().chars().next() {
        Some(c) if c.is_ascii_digit() => "0".to_string(),
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase().to_string(),
        _ => "#".to_string(),
    }
}

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_FORMATS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

/// File stem for files, full name for directories.
fn main_name(path: &Path) -> Option<String> {
    let name = if path.is_dir() {
        path.file_name()
    } else {
        path.file_stem()
    };
    name.and_then(|n| n.to_str())
        .map(str::to_string)
        .filter(|n| !n.trim().is_empty())
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

/// Every folder the subscription's episodes may live in, most specific first.
///
/// The first entry is where new downloads go. With `file_exist`, folders of
/// the show named after any historical season scheme (`S2`, `Season 02`, ...)
/// are prepended so existing episodes are still found.
pub fn download_paths(cfg: &Config, ani: &Ani) -> Vec<PathBuf> {
    if ani.custom_download_path && !ani.download_path.trim().is_empty() {
        return vec![PathBuf::from(&ani.download_path)];
    }

    let title = ani.title.trim();
    let mut root = if ani.ova && !cfg.ova_download_path.trim().is_empty() {
        PathBuf::from(&cfg.ova_download_path)
    } else {
        PathBuf::from(&cfg.download_path)
    };

    if cfg.acronym {
        root.push(bucket(title));
    } else if cfg.quarter {
        root.push(format!("{}-{:02}", ani.year, ani.month));
    }

    let show = root.join(title);
    if ani.ova {
        return vec![show];
    }

    let season_folder = cfg.season_name.folder(ani.season);
    let target = if season_folder.is_empty() {
        show.clone()
    } else {
        show.join(season_folder)
    };

    if !cfg.file_exist || !show.exists() {
        return vec![target];
    }

    let mut paths: Vec<PathBuf> = list_dir(&show)
        .into_iter()
        .filter(|dir| dir.is_dir())
        .filter(|dir| {
            dir.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| is_season_dir(name, ani.season))
        })
        .collect();
    paths.sort();
    if !paths.contains(&target) {
        paths.push(target);
    }
    paths
}

/// `S2`, `s02`, `Season 2`, `SEASON02` all name season 2.
pub fn is_season_dir(name: &str, season: u32) -> bool {
    let Some(prefix) = SEASON_DIR_PREFIX.find(name) else {
        return false;
    };
    let prefix = prefix.as_str();
    if !prefix.eq_ignore_ascii_case("s") && !prefix.eq_ignore_ascii_case("season") {
        return false;
    }
    SEASON_DIR_NUMBER
        .find(name)
        .and_then(|n| n.as_str().parse::<u32>().ok())
        .is_some_and(|n| n == season)
}

/// Season and episode parsed from a name carrying the `S..E..` pattern.
pub fn season_episode(name: &str) -> Option<(u32, f64)> {
    let caps = SEASON_EPISODE.captures(name)?;
    let season = caps.get(1)?.as_str().parse().ok()?;
    let episode = caps.get(2)?.as_str().parse().ok()?;
    Some((season, episode))
}

/// Whether the episode already exists in one of the download folders.
///
/// One-shot media counts as present as soon as any video file exists under
/// its folder.
pub fn already_materialized(cfg: &Config, ani: &Ani, item: &Item) -> bool {
    let dirs = download_paths(cfg, ani);

    if ani.ova {
        return dirs.iter().any(|dir| {
            WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .any(|e| e.file_type().is_file() && is_video(e.path()))
        });
    }

    dirs.iter()
        .flat_map(|dir| list_dir(dir))
        .filter(|path| path.is_dir() || is_video(path))
        .filter_map(|path| main_name(&path))
        .filter_map(|name| season_episode(&name.trim().to_uppercase()))
        .any(|(season, episode)| season == ani.season && episode == item.episode)
}

/// Removes episodes previously fetched from another feed of the subscription
/// so the copy about to be downloaded replaces them.
pub fn delete_back_rss(cfg: &Config, ani: &Ani, item: &Item) {
    if !cfg.delete || !cfg.back_rss {
        return;
    }
    let Some(wanted) = SEASON_EPISODE.find(&item.re_name) else {
        return;
    };
    let wanted = wanted.as_str();

    for path in download_paths(cfg, ani)
        .iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| list_dir(dir))
    {
        let Some(name) = main_name(&path) else {
            continue;
        };
        if SEASON_EPISODE.find(&name).map(|m| m.as_str()) != Some(wanted) {
            continue;
        }

        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if is_video(&path) {
            fs::remove_file(&path)
        } else {
            continue;
        };
        match removed {
            Ok(()) => log::info!("Backup RSS enabled, removed {path:?}"),
            Err(err) => log::error!("Unable to remove {path:?}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeasonName;

    fn config(root: &Path) -> Config {
        Config {
            download_path: root.to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    fn ani(title: &str, season: u32) -> Ani {
        Ani {
            title: title.to_string(),
            season,
            ..Ani::default()
        }
    }

    fn item(re_name: &str, episode: f64) -> Item {
        Item {
            re_name: re_name.to_string(),
            episode,
            subgroup: String::new(),
            torrent: String::new(),
            info_hash: "hash".to_string(),
            master: true,
        }
    }

    #[test]
    fn buckets() {
        assert_eq!(bucket("frieren"), "F");
        assert_eq!(bucket("86"), "0");
        assert_eq!(bucket("【推しの子】"), "#");
        assert_eq!(bucket(""), "#");
    }

    #[test]
    fn season_dirs() {
        assert!(is_season_dir("S2", 2));
        assert!(is_season_dir("s02", 2));
        assert!(is_season_dir("Season 2", 2));
        assert!(!is_season_dir("Season 3", 2));
        assert!(!is_season_dir("Specials", 2));
        assert!(!is_season_dir("Part 2", 2));
    }

    #[test]
    fn custom_path_short_circuits() {
        let cfg = config(Path::new("/media"));
        let mut ani = ani("Show", 1);
        ani.custom_download_path = true;
        ani.download_path = "/elsewhere".to_string();
        assert_eq!(download_paths(&cfg, &ani), vec![PathBuf::from("/elsewhere")]);
    }

    #[test]
    fn one_shot_uses_ova_root_and_bucket() {
        let mut cfg = config(Path::new("/media"));
        cfg.ova_download_path = "/ova".to_string();
        cfg.acronym = true;
        let mut ani = ani("Movie", 1);
        ani.ova = true;
        assert_eq!(download_paths(&cfg, &ani), vec![PathBuf::from("/ova/M/Movie")]);
    }

    #[test]
    fn seasonal_path_follows_naming_scheme_and_quarter() {
        let mut cfg = config(Path::new("/media"));
        cfg.quarter = true;
        cfg.season_name = SeasonName::Short;
        let mut ani = ani("Show", 2);
        ani.year = 2024;
        ani.month = 4;
        assert_eq!(
            download_paths(&cfg, &ani),
            vec![PathBuf::from("/media/2024-04/Show/S02")]
        );
    }

    #[test]
    fn historical_season_folders_are_prepended() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("Show/S2")).unwrap();
        fs::create_dir_all(root.path().join("Show/Season 1")).unwrap();
        let mut cfg = config(root.path());
        cfg.file_exist = true;

        let paths = download_paths(&cfg, &ani("Show", 2));
        assert_eq!(
            paths,
            vec![root.path().join("Show/S2"), root.path().join("Show/Season 2")]
        );
    }

    #[test]
    fn finds_materialized_episode_by_pattern() {
        let root = tempfile::tempdir().unwrap();
        let season = root.path().join("Show/Season 1");
        fs::create_dir_all(&season).unwrap();
        fs::write(season.join("Show s01e05.mkv"), b"").unwrap();
        fs::write(season.join("Show S01E06.nfo"), b"").unwrap();
        let cfg = config(root.path());

        assert!(already_materialized(&cfg, &ani("Show", 1), &item("Show S01E05", 5.0)));
        assert!(!already_materialized(&cfg, &ani("Show", 1), &item("Show S01E06", 6.0)));
        assert!(!already_materialized(&cfg, &ani("Show", 2), &item("Show S02E05", 5.0)));
    }

    #[test]
    fn fractional_episodes_match_exactly() {
        let root = tempfile::tempdir().unwrap();
        let season = root.path().join("Show/Season 1");
        fs::create_dir_all(&season).unwrap();
        fs::write(season.join("Show S01E05.5.mp4"), b"").unwrap();
        let cfg = config(root.path());

        assert!(already_materialized(&cfg, &ani("Show", 1), &item("Show S01E05.5", 5.5)));
        assert!(!already_materialized(&cfg, &ani("Show", 1), &item("Show S01E05", 5.0)));
    }

    #[test]
    fn one_shot_counts_any_video() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("Movie/extras")).unwrap();
        fs::write(root.path().join("Movie/extras/movie.mkv"), b"").unwrap();
        let cfg = config(root.path());
        let mut movie = ani("Movie", 1);
        movie.ova = true;

        assert!(already_materialized(&cfg, &movie, &item("Movie", 1.0)));
    }

    #[test]
    fn back_rss_copies_are_removed() {
        let root = tempfile::tempdir().unwrap();
        let season = root.path().join("Show/Season 1");
        fs::create_dir_all(season.join("Show S01E03")).unwrap();
        fs::write(season.join("Show S01E03.mkv"), b"").unwrap();
        fs::write(season.join("Show S01E03.ass"), b"").unwrap();
        fs::write(season.join("Show S01E04.mkv"), b"").unwrap();
        let mut cfg = config(root.path());
        cfg.delete = true;
        cfg.back_rss = true;

        delete_back_rss(&cfg, &ani("Show", 1), &item("Show S01E03", 3.0));

        assert!(!season.join("Show S01E03").exists());
        assert!(!season.join("Show S01E03.mkv").exists());
        assert!(season.join("Show S01E03.ass").exists());
        assert!(season.join("Show S01E04.mkv").exists());
    }
}

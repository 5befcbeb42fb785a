//! Torrent daemons the episodes are handed to.

mod aria2;
mod transmission;

pub use aria2::Aria2;
pub use transmission::Transmission;

use std::fs;
use std::path::Path;

use crate::config::{BackendKind, Downloader};
use crate::error::{Error, Result};
use crate::ledger::RenameLedger;
use crate::paths::SEASON_EPISODE;
use crate::{Item, Task};

/// Label put on every task this tool creates. Backends with labels only
/// report tasks carrying it.
pub const TAG: &str = "ani-rss";

const SUBTITLE_FORMATS: [&str; 5] = ["ass", "ssa", "srt", "sub", "vtt"];

/// Operations every download backend supports.
///
/// Calls block until the daemon answers. Failures are transient from the
/// caller's point of view: the pass moves on and the next one retries.
pub trait Backend: Send {
    fn name(&self) -> &'static str;

    /// Checks credentials with a cheap read. An incomplete configuration is
    /// reported as `false`, not as an error.
    fn login(&self) -> bool;

    /// Active and finished tasks, minus the ones without torrent metadata yet.
    fn list_tasks(&self) -> Result<Vec<Task>>;

    /// Hands a cached payload (`.txt` link or binary `.torrent`) to the daemon.
    ///
    /// Returns the key the task is known by for renaming, or `None` when the
    /// task never showed up after submission.
    fn submit(&self, item: &Item, save_path: &Path, payload: &Path) -> Result<Option<String>>;

    /// Removes the task, keeping downloaded data.
    fn delete(&self, task: &Task) -> Result<()>;

    /// Applies the pending ledger entry of `task`, if any, and drops the entry
    /// once the daemon confirms.
    fn rename(&self, task: &Task, ledger: &mut RenameLedger) -> Result<()>;

    /// Returns `Ok(false)` when the backend has no notion of tags.
    fn add_tags(&self, task: &Task, tag: &str) -> Result<bool>;
}

/// Builds the backend named by the configuration.
pub fn from_config(cfg: &Downloader) -> Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match cfg.kind {
        BackendKind::Transmission => Box::new(Transmission::new(cfg)?),
        BackendKind::Aria2 => Box::new(Aria2::new(cfg)?),
    };
    Ok(backend)
}

/// A cached torrent payload, told apart by its file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Link(String),
    Torrent(Vec<u8>),
}

impl Payload {
    /// `None` for files without an extension.
    pub fn read(path: &Path) -> Result<Option<Payload>> {
        let payload = match path.extension().and_then(|ext| ext.to_str()) {
            Some("txt") => Payload::Link(
                fs::read_to_string(path)
                    .map_err(|err| Error::io(path, err))?
                    .trim()
                    .to_string(),
            ),
            Some(_) => Payload::Torrent(fs::read(path).map_err(|err| Error::io(path, err))?),
            None => return Ok(None),
        };
        Ok(Some(payload))
    }
}

/// Both backends track tasks by info hash. A magnet submitted to aria2 gets a
/// new gid once its metadata arrives, while the hash stays put.
pub fn ledger_key(info_hash: &str) -> String {
    info_hash.trim().to_lowercase()
}

/// Whether `backend` lists a task for `hash`. Listing errors count as absent.
fn reports_hash(backend: &impl Backend, hash: &str) -> bool {
    match backend.list_tasks() {
        Ok(tasks) => tasks.iter().any(|task| task.hash.eq_ignore_ascii_case(hash)),
        Err(err) => {
            log::error!("Unable to list {} tasks: {err}", backend.name());
            false
        }
    }
}

/// Name already carries the `S..E..` pattern, so it was renamed before.
pub fn already_renamed(name: &str) -> bool {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    SEASON_EPISODE.is_match(stem)
}

/// `target` with the extension of `original`. Subtitles keep their language
/// tag: `[Grp] Show - 05.sc.ass` becomes `Show S01E05.sc.ass`.
pub fn renamed_file_name(original: &str, target: &str) -> String {
    let Some((stem, ext)) = original.rsplit_once('.') else {
        return target.to_string();
    };
    if ext.is_empty() || ext.contains('/') {
        return target.to_string();
    }

    if SUBTITLE_FORMATS.iter().any(|s| s.eq_ignore_ascii_case(ext)) {
        if let Some((_, lang)) = stem.rsplit_once('.') {
            let is_tag = !lang.is_empty()
                && lang.len() <= 8
                && lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if is_tag {
                return format!("{target}.{lang}.{ext}");
            }
        }
    }
    format!("{target}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_extension_and_language_tag() {
        assert_eq!(
            renamed_file_name("[Grp] Show - 05 [1080p].mkv", "Show S01E05"),
            "Show S01E05.mkv"
        );
        assert_eq!(
            renamed_file_name("[Grp] Show - 05.sc.ass", "Show S01E05"),
            "Show S01E05.sc.ass"
        );
        assert_eq!(renamed_file_name("Show - 05", "Show S01E05"), "Show S01E05");
    }

    #[test]
    fn detects_renamed_names() {
        assert!(already_renamed("Show S01E05.mkv"));
        assert!(already_renamed("Show S01E05.5"));
        assert!(!already_renamed("[Grp] Show - 05.mkv"));
    }

    #[test]
    fn payload_kind_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("abc.txt");
        let torrent = dir.path().join("abc.torrent");
        let bare = dir.path().join("abc");
        fs::write(&link, "magnet:?xt=urn:btih:abc\n").unwrap();
        fs::write(&torrent, [0xd8u8, 0x00]).unwrap();
        fs::write(&bare, "x").unwrap();

        assert_eq!(
            Payload::read(&link).unwrap(),
            Some(Payload::Link("magnet:?xt=urn:btih:abc".to_string()))
        );
        assert_eq!(
            Payload::read(&torrent).unwrap(),
            Some(Payload::Torrent(vec![0xd8, 0x00]))
        );
        assert_eq!(Payload::read(&bare).unwrap(), None);
        assert!(Payload::read(&dir.path().join("missing.txt")).is_err());
    }
}

use std::fmt::Display;
use std::future::Future;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use transmission_rpc::types::{
    BasicAuth, Id, Torrent, TorrentAddArgs, TorrentGetField, TorrentSetArgs,
};
use transmission_rpc::SharableTransClient;
use url::Url;

use super::{already_renamed, ledger_key, renamed_file_name, reports_hash, Backend, Payload, TAG};
use crate::config::Downloader;
use crate::error::{Error, Result};
use crate::ledger::RenameLedger;
use crate::retry::Poll;
use crate::{Item, Task, TaskState, TIMEOUT};

const NAME: &str = "Transmission";

/// Transmission over its RPC endpoint. `transmission-rpc` takes care of the
/// `X-Transmission-Session-Id` handshake; this wrapper drives it from
/// blocking code on a private current-thread runtime.
pub struct Transmission {
    inner: Option<SharableTransClient>,
    runtime: Runtime,
    verify: Option<Poll>,
}

impl Transmission {
    pub fn new(cfg: &Downloader) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;

        let configured = !cfg.username.trim().is_empty() && !cfg.password.trim().is_empty();
        let inner = cfg.url.as_ref().filter(|_| configured).map(|url| {
            let basic_auth = BasicAuth {
                user: cfg.username.clone(),
                password: cfg.password.clone(),
            };
            SharableTransClient::with_auth(rpc_url(url), basic_auth)
        });

        Ok(Transmission {
            inner,
            runtime,
            verify: cfg.watch_error_torrent.then_some(Poll::SUBMISSION),
        })
    }

    fn client(&self) -> Result<&SharableTransClient> {
        self.inner.as_ref().ok_or(Error::NotConfigured)
    }

    fn block_on<T, E: Display>(
        &self,
        method: &'static str,
        request: impl Future<Output = std::result::Result<T, E>>,
    ) -> Result<T> {
        match self.runtime.block_on(async { timeout(TIMEOUT, request).await }) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(rpc_error(method, err)),
            Err(_) => Err(Error::Timeout(NAME)),
        }
    }
}

fn rpc_url(host: &Url) -> Url {
    if host.path().ends_with("/rpc") {
        return host.clone();
    }
    // `join` replaces the last segment unless the base ends with a slash.
    let mut base = host.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base.join("transmission/rpc").unwrap_or_else(|_| host.clone())
}

fn rpc_error(method: &'static str, reason: impl Display) -> Error {
    Error::Rpc {
        backend: NAME,
        method,
        reason: reason.to_string(),
    }
}

fn task_id(task: &Task) -> Id {
    match task.id.parse() {
        Ok(id) => Id::Id(id),
        Err(_) => Id::Hash(task.hash.clone()),
    }
}

/// Tasks not labelled by us are invisible.
fn to_task(torrent: Torrent) -> Option<Task> {
    let labels = torrent.labels.unwrap_or_default();
    if !labels.iter().any(|label| label == TAG) {
        return None;
    }
    let state = if torrent.is_finished.unwrap_or(false) {
        TaskState::PausedUp
    } else {
        TaskState::Downloading
    };
    Some(Task {
        id: torrent.id?.to_string(),
        name: torrent.name?,
        hash: torrent.hash_string?,
        state,
        download_dir: torrent.download_dir.unwrap_or_default(),
        files: torrent
            .files
            .unwrap_or_default()
            .into_iter()
            .map(|file| file.name)
            .collect(),
        tags: labels,
    })
}

impl Backend for Transmission {
    fn name(&self) -> &'static str {
        NAME
    }

    fn login(&self) -> bool {
        if self.inner.is_none() {
            log::warn!("Transmission is not fully configured");
            return false;
        }
        match self.list_tasks() {
            Ok(_) => true,
            Err(err) => {
                log::error!("Transmission login failed: {err}");
                false
            }
        }
    }

    fn list_tasks(&self) -> Result<Vec<Task>> {
        let client = self.client()?;
        let fields = vec![
            TorrentGetField::Id,
            TorrentGetField::Name,
            TorrentGetField::HashString,
            TorrentGetField::IsFinished,
            TorrentGetField::DownloadDir,
            TorrentGetField::Files,
            TorrentGetField::Labels,
        ];
        let response = self.block_on("torrent-get", client.torrent_get(Some(fields), None))?;
        if !response.is_ok() {
            return Err(rpc_error("torrent-get", response.result));
        }
        Ok(response
            .arguments
            .torrents
            .into_iter()
            .filter_map(to_task)
            .collect())
    }

    fn submit(&self, item: &Item, save_path: &Path, payload: &Path) -> Result<Option<String>> {
        let client = self.client()?;
        let hash = ledger_key(&item.info_hash);
        let Some(payload) = Payload::read(payload)? else {
            return Ok(None);
        };

        let subgroup = match item.subgroup.trim() {
            "" => "Unknown subgroup",
            subgroup => subgroup,
        };
        let mut add = TorrentAddArgs {
            download_dir: Some(save_path.to_string_lossy().to_string()),
            labels: Some(vec![TAG.to_string(), subgroup.to_string()]),
            ..TorrentAddArgs::default()
        };
        match payload {
            Payload::Link(link) => add.filename = Some(link),
            Payload::Torrent(bytes) => add.metainfo = Some(STANDARD.encode(bytes)),
        }

        let response = self.block_on("torrent-add", client.torrent_add(add))?;
        if !response.is_ok() {
            return Err(rpc_error("torrent-add", response.result));
        }

        match self.verify {
            None => Ok(Some(hash)),
            Some(poll) => Ok(poll.until(|| reports_hash(self, &hash)).then_some(hash)),
        }
    }

    fn delete(&self, task: &Task) -> Result<()> {
        let client = self.client()?;
        let response = self.block_on(
            "torrent-remove",
            client.torrent_remove(vec![task_id(task)], false),
        )?;
        if !response.is_ok() {
            return Err(rpc_error("torrent-remove", response.result));
        }
        Ok(())
    }

    fn rename(&self, task: &Task, ledger: &mut RenameLedger) -> Result<()> {
        if already_renamed(&task.name) {
            return Ok(());
        }
        let key = ledger_key(&task.hash);
        let Some(target) = ledger.get(&key) else {
            return Ok(());
        };
        let renamed = renamed_file_name(&task.name, target);
        log::info!("Renaming `{}` to `{renamed}`", task.name);

        let client = self.client()?;
        let response = self.block_on(
            "torrent-rename-path",
            client.torrent_rename_path(vec![task_id(task)], task.name.clone(), renamed),
        )?;
        if !response.is_ok() {
            return Err(rpc_error("torrent-rename-path", response.result));
        }
        ledger.remove(&key);
        Ok(())
    }

    fn add_tags(&self, task: &Task, tag: &str) -> Result<bool> {
        let client = self.client()?;
        let mut labels = task.tags.clone();
        if !labels.iter().any(|label| label == tag) {
            labels.push(tag.to_string());
        }
        let args = TorrentSetArgs {
            labels: Some(labels),
            ..TorrentSetArgs::default()
        };
        let response = self.block_on("torrent-set", client.torrent_set(args, Some(vec![task_id(task)])))?;
        Ok(response.is_ok())
    }
}

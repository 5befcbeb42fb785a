use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{already_renamed, ledger_key, renamed_file_name, reports_hash, Backend, Payload, TAG};
use crate::config::Downloader;
use crate::error::{Error, Result};
use crate::ledger::RenameLedger;
use crate::retry::Poll;
use crate::{Item, Task, TaskState, TIMEOUT};

const NAME: &str = "Aria2";

/// aria2 through its JSON-RPC interface. The RPC secret travels as the first
/// parameter of every call.
pub struct Aria2 {
    http: Client,
    endpoint: Option<Url>,
    secret: String,
    verify: Option<Poll>,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    gid: String,
    status: String,
    #[serde(default)]
    dir: String,
    #[serde(default)]
    info_hash: Option<String>,
    #[serde(default)]
    files: Vec<StatusFile>,
    #[serde(default)]
    bittorrent: Option<Bittorrent>,
}

#[derive(Deserialize)]
struct StatusFile {
    path: String,
}

#[derive(Deserialize)]
struct Bittorrent {
    #[serde(default)]
    info: Option<BittorrentInfo>,
}

#[derive(Deserialize)]
struct BittorrentInfo {
    name: String,
}

impl Aria2 {
    pub fn new(cfg: &Downloader) -> Result<Self> {
        let http = Client::builder().timeout(TIMEOUT).build()?;
        let endpoint = cfg.url.as_ref().and_then(|url| url.join("jsonrpc").ok());
        Ok(Aria2 {
            http,
            endpoint,
            secret: cfg.password.clone(),
            verify: cfg.watch_error_torrent.then_some(Poll::SUBMISSION),
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &'static str, params: Vec<Value>) -> Result<T> {
        let endpoint = self.endpoint.as_ref().ok_or(Error::NotConfigured)?;

        let mut all = vec![json!(format!("token:{}", self.secret))];
        all.extend(params);
        let body = json!({
            "jsonrpc": "2.0",
            "id": TAG,
            "method": method,
            "params": all,
        });

        // Errors come back as JSON with a 4xx status, so the body is read regardless.
        let response: RpcResponse<T> = self.http.post(endpoint.clone()).json(&body).send()?.json()?;
        match response {
            RpcResponse {
                result: Some(result),
                ..
            } => Ok(result),
            RpcResponse {
                error: Some(err), ..
            } => Err(Error::Rpc {
                backend: NAME,
                method,
                reason: err.message,
            }),
            _ => Err(Error::Rpc {
                backend: NAME,
                method,
                reason: "empty response".to_string(),
            }),
        }
    }

    fn tasks(&self, method: &'static str, params: Vec<Value>) -> Result<Vec<Task>> {
        let statuses: Vec<Status> = self.call(method, params)?;
        Ok(statuses.into_iter().filter_map(to_task).collect())
    }
}

fn to_task(status: Status) -> Option<Task> {
    // Magnets still fetching metadata carry no torrent info yet.
    let name = status.bittorrent?.info?.name;
    let hash = status.info_hash?;
    let state = if status.status == "complete" {
        TaskState::PausedUp
    } else {
        TaskState::Downloading
    };
    Some(Task {
        id: status.gid,
        name,
        hash,
        state,
        download_dir: status.dir,
        files: status.files.into_iter().map(|f| f.path).collect(),
        tags: Vec::new(),
    })
}

impl Backend for Aria2 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn login(&self) -> bool {
        if self.endpoint.is_none() || self.secret.trim().is_empty() {
            log::warn!("Aria2 is not fully configured");
            return false;
        }
        match self.call::<Value>("aria2.getGlobalStat", Vec::new()) {
            Ok(_) => true,
            Err(err) => {
                log::error!("Aria2 login failed: {err}");
                false
            }
        }
    }

    fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks = self.tasks("aria2.tellActive", Vec::new())?;
        tasks.extend(self.tasks("aria2.tellStopped", vec![json!(0), json!(1000)])?);
        Ok(tasks)
    }

    fn submit(&self, item: &Item, save_path: &Path, payload: &Path) -> Result<Option<String>> {
        let Some(payload) = Payload::read(payload)? else {
            return Ok(None);
        };
        let options = json!({ "dir": save_path.to_string_lossy() });

        let gid: String = match payload {
            Payload::Link(uri) => self.call("aria2.addUri", vec![json!([uri]), options])?,
            Payload::Torrent(bytes) => self.call(
                "aria2.addTorrent",
                vec![json!(STANDARD.encode(bytes)), json!([]), options],
            )?,
        };
        log::debug!("Aria2 accepted `{}` as {gid}", item.re_name);

        // Magnets get a metadata gid first, the real download is only known by hash.
        let hash = ledger_key(&item.info_hash);
        match self.verify {
            None => Ok(Some(hash)),
            Some(poll) => Ok(poll.until(|| reports_hash(self, &hash)).then_some(hash)),
        }
    }

    fn delete(&self, task: &Task) -> Result<()> {
        self.call::<Value>("aria2.removeDownloadResult", vec![json!(task.id)])?;
        Ok(())
    }

    /// aria2 cannot rename, so finished files are moved on the local filesystem.
    fn rename(&self, task: &Task, ledger: &mut RenameLedger) -> Result<()> {
        if !task.state.is_terminal() {
            return Ok(());
        }
        let key = ledger_key(&task.hash);
        let Some(target) = ledger.get(&key).map(str::to_string) else {
            return Ok(());
        };

        let dir = Path::new(&task.download_dir);
        let mut failure = None;
        for file in &task.files {
            let src = Path::new(file);
            if !src.exists() {
                continue;
            }
            let Some(name) = src.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if already_renamed(name) {
                continue;
            }
            let dst = dir.join(renamed_file_name(name, &target));
            if dst == src {
                continue;
            }
            match fs::rename(src, &dst) {
                Ok(()) => log::info!("Renamed `{name}` to {dst:?}"),
                Err(err) => {
                    log::error!("Unable to rename `{name}` to {dst:?}: {err}");
                    failure = Some(Error::io(src, err));
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => {
                ledger.remove(&key);
                Ok(())
            }
        }
    }

    fn add_tags(&self, _task: &Task, _tag: &str) -> Result<bool> {
        Ok(false)
    }
}

//! Reconciliation of subscriptions against the active download backend.
//!
//! Every operation runs under one process-wide lock: a pass never races
//! another pass, a rename sweep, or a backend switch, so the counts it reads
//! at the start stay true until it ends.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use reqwest::blocking::Client;

use crate::backend::Backend;
use crate::cache;
use crate::collab::{Feed, MessageKind, Notifier, Persist};
use crate::config::Config;
use crate::error::Result;
use crate::paths;
use crate::selector::Selector;
use crate::{Ani, Item, Task, TIMEOUT};

pub struct Engine {
    inner: Mutex<Inner>,
}

struct Inner {
    cfg: Config,
    selector: Selector,
    http: Client,
    feed: Box<dyn Feed>,
    notifier: Box<dyn Notifier>,
    store: Box<dyn Persist>,
}

fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

impl Engine {
    /// Builds the engine with the backend named in `cfg`.
    pub fn new(
        cfg: Config,
        feed: impl Feed + 'static,
        notifier: impl Notifier + 'static,
        store: impl Persist + 'static,
    ) -> Result<Self> {
        let mut selector = Selector::new();
        selector.load(&cfg.downloader)?;
        Self::build(cfg, selector, feed, notifier, store)
    }

    /// Builds the engine around an already constructed backend.
    pub fn with_backend(
        cfg: Config,
        backend: Box<dyn Backend>,
        feed: impl Feed + 'static,
        notifier: impl Notifier + 'static,
        store: impl Persist + 'static,
    ) -> Result<Self> {
        let mut selector = Selector::new();
        selector.select(backend);
        Self::build(cfg, selector, feed, notifier, store)
    }

    fn build(
        cfg: Config,
        selector: Selector,
        feed: impl Feed + 'static,
        notifier: impl Notifier + 'static,
        store: impl Persist + 'static,
    ) -> Result<Self> {
        let http = Client::builder().timeout(TIMEOUT).build()?;
        Ok(Engine {
            inner: Mutex::new(Inner {
                cfg,
                selector,
                http,
                feed: Box::new(feed),
                notifier: Box::new(notifier),
                store: Box::new(store),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a new configuration, rebuilding the backend. Pending renames
    /// are dropped.
    pub fn reload(&self, cfg: Config) -> Result<()> {
        let mut inner = self.lock();
        inner.selector.load(&cfg.downloader)?;
        inner.cfg = cfg;
        Ok(())
    }

    /// Swaps the backend. Pending renames are dropped.
    pub fn select(&self, backend: Box<dyn Backend>) {
        self.lock().selector.select(backend);
    }

    pub fn login(&self) -> bool {
        self.lock().login()
    }

    pub fn tasks(&self) -> Result<Vec<Task>> {
        self.lock().tasks()
    }

    /// One reconciliation pass for `ani`. Counters and the enabled flag are
    /// updated in place and persisted when they change.
    pub fn download_ani(&self, ani: &mut Ani) {
        self.lock().download_ani(ani);
    }

    pub fn rename(&self, task: &Task) {
        self.lock().rename(task);
    }

    /// Removes `task` from the backend if it is finished and deletion is on.
    pub fn delete(&self, task: &Task) {
        self.lock().delete(task);
    }

    pub fn add_tags(&self, task: &Task, tag: &str) -> bool {
        self.lock().add_tags(task, tag)
    }

    /// Renames and cleans up every task the backend reports.
    pub fn sweep(&self) {
        self.lock().sweep();
    }

    /// A full round: every enabled subscription, then a sweep. Returns false
    /// without touching anything when the backend refuses the login.
    ///
    /// Pending renames survive between rounds for as long as the engine does,
    /// which is what lets finished downloads get their names.
    pub fn pass(&self, subscriptions: &mut [Ani]) -> bool {
        if !self.login() {
            log::error!("Unable to log into the download backend");
            return false;
        }
        for ani in subscriptions.iter_mut().filter(|ani| ani.enable) {
            self.download_ani(ani);
        }
        self.sweep();
        true
    }

    /// Name the task behind `key` is waiting to be renamed to.
    pub fn pending_rename(&self, key: &str) -> Option<String> {
        self.lock().selector.ledger().get(key).map(str::to_string)
    }
}

impl Inner {
    /// Daemons batch their state updates, give them a moment between calls.
    fn settle(&self) {
        let delay = self.cfg.settle_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    fn login(&self) -> bool {
        self.settle();
        if self.cfg.download_path.trim().is_empty() {
            log::warn!("Download path is not set");
            return false;
        }
        match self.selector.backend() {
            Ok(backend) => backend.login(),
            Err(err) => {
                log::warn!("{err}");
                false
            }
        }
    }

    fn tasks(&self) -> Result<Vec<Task>> {
        self.settle();
        self.selector.backend()?.list_tasks()
    }

    fn download_ani(&mut self, ani: &mut Ani) {
        let tasks = match self.tasks() {
            Ok(tasks) => tasks,
            Err(err) => {
                log::error!("Unable to list tasks for `{}`: {err}", ani.title);
                return;
            }
        };
        let names: HashSet<String> = tasks.iter().map(|task| fold(&task.name)).collect();
        let hashes: HashSet<String> = tasks.iter().map(|task| fold(&task.hash)).collect();

        let mut items = self.feed.items(ani);
        log::debug!("`{}` has {} candidates", ani.title, items.len());
        if ani.download_new {
            if let Some(newest) = items.pop() {
                log::debug!("`{}` only fetches the newest episode", ani.title);
                items = vec![newest];
            }
        }

        // Read again so the ceiling accounts for tasks added meanwhile.
        let mut in_flight = match self.tasks() {
            Ok(tasks) => tasks.iter().filter(|task| !task.state.is_terminal()).count(),
            Err(err) => {
                log::error!("Unable to list tasks for `{}`: {err}", ani.title);
                return;
            }
        };
        let mut satisfied = 0;

        for item in &items {
            let counted = item.master && !item.is_special();

            if self.already_have(ani, item, &names, &hashes) {
                if counted {
                    satisfied += 1;
                }
                continue;
            }

            let ceiling = self.cfg.download_count;
            if ceiling > 0 && in_flight >= ceiling {
                log::debug!("Reached the limit of {ceiling} simultaneous downloads");
                continue;
            }

            log::info!("Adding `{}`", item.re_name);
            if self.fetch(ani, item) {
                if !item.is_special() {
                    in_flight += 1;
                }
                if counted {
                    satisfied += 1;
                }
            }
        }

        let mut changed = false;

        let episodes = items.iter().filter(|item| !item.is_special()).count();
        let episodes = u32::try_from(episodes).unwrap_or(u32::MAX);
        if episodes > ani.current_episode_number {
            ani.current_episode_number = episodes;
            changed = true;
        }

        let total = ani.total_episode_number;
        if self.cfg.auto_disabled && ani.enable && total > 0 && satisfied >= total {
            ani.enable = false;
            changed = true;
            log::info!(
                "`{}` season {}: all {total} episodes downloaded, disabling the subscription",
                ani.title,
                ani.season
            );
        }

        if changed {
            self.store.persist(ani);
        }
    }

    /// The episode is in the backend, in the torrent cache, or on disk.
    fn already_have(
        &self,
        ani: &Ani,
        item: &Item,
        names: &HashSet<String>,
        hashes: &HashSet<String>,
    ) -> bool {
        if hashes.contains(&fold(&item.info_hash)) || names.contains(&fold(&item.re_name)) {
            log::debug!("Task already exists for `{}`", item.re_name);
            return true;
        }

        if cache::torrent_file(&self.cfg, ani, item).exists() {
            log::debug!("Torrent already cached for `{}`", item.re_name);
            return true;
        }

        let probe = self.cfg.rename
            && self.cfg.file_exist
            && !self.cfg.download_path.trim().is_empty();
        if probe && paths::already_materialized(&self.cfg, ani, item) {
            log::info!("`{}` already exists locally", item.re_name);
            // Cached so later passes stop at the cache instead of walking the library.
            if let Err(err) = cache::save_torrent(&self.cfg, ani, item, &self.http) {
                log::error!("Unable to cache torrent for `{}`: {err}", item.re_name);
            }
            return true;
        }

        false
    }

    fn fetch(&mut self, ani: &Ani, item: &Item) -> bool {
        let payload = match cache::save_torrent(&self.cfg, ani, item, &self.http) {
            Ok(payload) if payload.exists() => payload,
            Ok(payload) => return self.payload_missing(ani, item, &payload),
            Err(err) => {
                log::error!("Unable to save torrent for `{}`: {err}", item.re_name);
                let payload = cache::torrent_file(&self.cfg, ani, item);
                return self.payload_missing(ani, item, &payload);
            }
        };

        let save_path = paths::download_paths(&self.cfg, ani)
            .into_iter()
            .next()
            .unwrap_or_default();
        paths::delete_back_rss(&self.cfg, ani, item);

        self.submit(ani, item, &save_path, &payload)
    }

    fn payload_missing(&self, ani: &Ani, item: &Item, payload: &Path) -> bool {
        let text = format!("Torrent download failed for {} {}", item.re_name, payload.display());
        log::error!("{text}");
        self.notifier.send(&self.cfg, ani, &text, MessageKind::Error);
        false
    }

    fn submit(&mut self, ani: &Ani, item: &Item, save_path: &Path, payload: &Path) -> bool {
        self.settle();
        let save_path = PathBuf::from(save_path.to_string_lossy().replace('\\', "/"));

        let mut text = format!("[{}] {} updated", item.subgroup, item.re_name);
        if self.cfg.back_rss && !ani.back_rss_list.is_empty() {
            let feed = if item.master { "primary RSS" } else { "backup RSS" };
            text = format!("({feed}) {text}");
        }
        self.notifier
            .send(&self.cfg, ani, &text, MessageKind::DownloadStart);

        let submitted = self
            .selector
            .backend()
            .and_then(|backend| backend.submit(item, &save_path, payload));
        match submitted {
            Ok(Some(key)) => {
                if self.cfg.rename && !ani.ova {
                    self.selector.ledger_mut().insert(key, item.re_name.clone());
                }
                return true;
            }
            Ok(None) => (),
            Err(err) => log::error!("Error while adding `{}`: {err}", item.re_name),
        }

        let text = format!("Failed to add {}, the torrent looks broken", item.re_name);
        log::error!("{text}");
        self.notifier.send(&self.cfg, ani, &text, MessageKind::Error);
        // Without the cached payload the next pass starts over.
        cache::forget(payload);
        false
    }

    fn rename(&mut self, task: &Task) {
        if !self.cfg.rename {
            return;
        }
        self.settle();
        let renamed = self
            .selector
            .parts()
            .and_then(|(backend, ledger)| backend.rename(task, ledger));
        if let Err(err) = renamed {
            log::error!("Failed to rename `{}`: {err}", task.name);
        }
    }

    fn delete(&self, task: &Task) {
        if !task.state.is_terminal() || !self.cfg.delete {
            return;
        }
        log::info!("Removing finished task `{}`", task.name);
        self.settle();
        if let Err(err) = self
            .selector
            .backend()
            .and_then(|backend| backend.delete(task))
        {
            log::warn!("Unable to remove `{}`: {err}", task.name);
        }
    }

    fn add_tags(&self, task: &Task, tag: &str) -> bool {
        if tag.trim().is_empty() {
            return false;
        }
        match self
            .selector
            .backend()
            .and_then(|backend| backend.add_tags(task, tag))
        {
            Ok(added) => added,
            Err(err) => {
                log::error!("Unable to tag `{}`: {err}", task.name);
                false
            }
        }
    }

    fn sweep(&mut self) {
        let tasks = match self.tasks() {
            Ok(tasks) => tasks,
            Err(err) => {
                log::error!("Unable to list tasks: {err}");
                return;
            }
        };
        for task in &tasks {
            self.rename(task);
            self.delete(task);
        }
    }
}

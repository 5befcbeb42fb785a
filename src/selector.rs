use crate::backend::{self, Backend};
use crate::config::Downloader;
use crate::error::{Error, Result};
use crate::ledger::RenameLedger;

/// The active download backend together with its pending renames.
///
/// Task keys mean nothing to another backend, so every switch starts from an
/// empty ledger.
#[derive(Default)]
pub struct Selector {
    backend: Option<Box<dyn Backend>>,
    ledger: RenameLedger,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, backend: Box<dyn Backend>) {
        log::info!("Download backend `{}`", backend.name());
        self.backend = Some(backend);
        self.ledger.clear();
    }

    /// Builds and activates the backend named by the configuration.
    pub fn load(&mut self, cfg: &Downloader) -> Result<()> {
        self.select(backend::from_config(cfg)?);
        Ok(())
    }

    pub fn backend(&self) -> Result<&dyn Backend> {
        self.backend.as_deref().ok_or(Error::NotConfigured)
    }

    pub fn ledger(&self) -> &RenameLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut RenameLedger {
        &mut self.ledger
    }

    /// Both halves at once, for operations that consult the ledger.
    pub fn parts(&mut self) -> Result<(&dyn Backend, &mut RenameLedger)> {
        let backend = self.backend.as_deref().ok_or(Error::NotConfigured)?;
        Ok((backend, &mut self.ledger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    #[test]
    fn switching_backends_clears_the_ledger() {
        let mut selector = Selector::new();
        assert!(matches!(selector.backend(), Err(Error::NotConfigured)));

        selector.load(&Downloader::default()).unwrap();
        assert_eq!(selector.backend().unwrap().name(), "Transmission");
        selector.ledger_mut().insert("abc123", "Show S01E05");
        selector.ledger_mut().insert("def456", "Show S01E06");

        let aria2 = Downloader {
            kind: BackendKind::Aria2,
            ..Downloader::default()
        };
        selector.load(&aria2).unwrap();
        assert_eq!(selector.backend().unwrap().name(), "Aria2");
        assert!(selector.ledger().is_empty());
    }

    #[test]
    fn reloading_the_same_backend_also_clears() {
        let mut selector = Selector::new();
        selector.load(&Downloader::default()).unwrap();
        selector.ledger_mut().insert("abc123", "Show S01E05");
        selector.load(&Downloader::default()).unwrap();
        assert!(selector.ledger().is_empty());
    }
}

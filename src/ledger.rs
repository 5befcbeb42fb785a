use rustc_hash::FxHashMap;

/// Pending renames: lower-cased info hash to the name the task should end up with.
///
/// The ledger lives and dies with the active backend and is never persisted.
#[derive(Debug, Default)]
pub struct RenameLedger {
    entries: FxHashMap<String, String>,
}

impl RenameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, target: impl Into<String>) {
        self.entries.insert(key.into(), target.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

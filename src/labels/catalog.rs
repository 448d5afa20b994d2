//! The raw label to class name catalog.

use crate::collector::types::RawLabel;
use crate::labels::resolver::{AutoResolver, LabelResolver};
use crate::labels::store::LabelStore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Maps raw labels to class names, extending itself on first sight of a label.
///
/// One catalog is shared (behind an `Arc`) by every pipeline call in a
/// process. The lookup, the resolver call and the extension happen under one
/// lock, so a new label is resolved exactly once.
pub struct LabelCatalog {
    entries: Mutex<BTreeMap<RawLabel, String>>,
    store: Option<LabelStore>,
    resolver: Arc<dyn LabelResolver>,
}

impl LabelCatalog {
    /// A catalog with no backing store and no resolver.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            store: None,
            resolver: Arc::new(AutoResolver),
        }
    }

    /// Populate from a store. A missing or unreadable store gives an empty catalog.
    pub fn load(store: LabelStore) -> Self {
        let mut entries = BTreeMap::new();
        match store.load() {
            Ok(rows) => {
                // Later rows win
                entries.extend(rows);
            }
            Err(e) => warn!(error = %e, "label store unreadable, starting empty"),
        }
        info!(path = %store.path().display(), labels = entries.len(), "label catalog loaded");

        Self {
            entries: Mutex::new(entries),
            store: Some(store),
            resolver: Arc::new(AutoResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LabelResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RawLabel, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Class name for a raw label, asking the resolver if it is new.
    ///
    /// A new name is recorded in memory and appended to the store. A failed
    /// append is logged; the in-memory entry is kept.
    pub fn resolve(&self, raw: &RawLabel) -> String {
        let mut entries = self.lock();
        if let Some(name) = entries.get(raw) {
            return name.clone();
        }

        let name = self
            .resolver
            .ask(raw)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| raw.to_string());

        if let Some(store) = &self.store {
            if let Err(e) = store.append(raw, &name) {
                warn!(error = %e, label = %raw, "could not persist new label");
            }
        }
        info!(label = %raw, class = %name, "new label recorded");
        entries.insert(raw.clone(), name.clone());
        name
    }

    /// Class name for a raw label without extending the catalog.
    pub fn get(&self, raw: &RawLabel) -> Option<String> {
        self.lock().get(raw).cloned()
    }

    /// All entries, ordered by raw label.
    pub fn entries(&self) -> Vec<(RawLabel, String)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn store(&self) -> Option<&LabelStore> {
        self.store.as_ref()
    }
}

impl fmt::Debug for LabelCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelCatalog")
            .field("labels", &self.len())
            .field("store", &self.store)
            .finish()
    }
}

impl Default for LabelCatalog {
    fn default() -> Self {
        Self::in_memory()
    }
}

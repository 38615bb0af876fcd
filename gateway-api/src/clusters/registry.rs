use arc_swap::ArcSwap;
use gateway_telemetry::metrics::REGISTRY_CLUSTERS;
use metrics::gauge;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::clusters::client::ClusterClient;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("The cluster code {0} appears more than once")]
    DuplicateCode(String),

    #[error("The clusters {first} and {second} share the identity {id}")]
    DuplicateIdentity {
        id: String,
        first: String,
        second: String,
    },
}

/// A live cluster: its routing code, its identity and a client bound to it.
pub struct RegistryEntry {
    pub code: String,
    pub id: String,
    pub client: Arc<dyn ClusterClient>,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("code", &self.code)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistrySnapshot {
    by_code: HashMap<String, Arc<RegistryEntry>>,
    by_id: HashMap<String, Arc<RegistryEntry>>,
}

/// The set of live clusters, indexed by code and by identity.
///
/// Both indexes live in one immutable snapshot that is swapped atomically, so lookups
/// never block and always see both indexes from the same rebuild. Entries handed out by
/// a lookup stay usable after a later [`ClusterRegistry::replace_all`] evicts them.
pub struct ClusterRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    replace_lock: Mutex<()>,
}

impl ClusterRegistry {
    pub fn new() -> ClusterRegistry {
        ClusterRegistry {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            replace_lock: Mutex::new(()),
        }
    }

    pub fn lookup_by_code(&self, code: &str) -> Option<Arc<RegistryEntry>> {
        self.snapshot.load().by_code.get(code).cloned()
    }

    pub fn lookup_by_identity(&self, id: &str) -> Option<Arc<RegistryEntry>> {
        self.snapshot.load().by_id.get(id).cloned()
    }

    /// Returns the codes of all live clusters, sorted.
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.snapshot.load().by_code.keys().cloned().collect();
        codes.sort_unstable();
        codes
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces every live cluster with `entries`.
    ///
    /// Fails without touching the current set if two entries share a code or an identity.
    /// Concurrent calls are serialized.
    pub fn replace_all(&self, entries: Vec<RegistryEntry>) -> Result<(), RegistryError> {
        let _guard = self
            .replace_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut snapshot = RegistrySnapshot {
            by_code: HashMap::with_capacity(entries.len()),
            by_id: HashMap::with_capacity(entries.len()),
        };

        for entry in entries {
            let entry = Arc::new(entry);

            if snapshot.by_code.contains_key(&entry.code) {
                return Err(RegistryError::DuplicateCode(entry.code.clone()));
            }
            if let Some(existing) = snapshot.by_id.get(&entry.id) {
                return Err(RegistryError::DuplicateIdentity {
                    id: entry.id.clone(),
                    first: existing.code.clone(),
                    second: entry.code.clone(),
                });
            }

            snapshot.by_code.insert(entry.code.clone(), entry.clone());
            snapshot.by_id.insert(entry.id.clone(), entry);
        }

        gauge!(REGISTRY_CLUSTERS).set(snapshot.by_code.len() as f64);
        self.snapshot.store(Arc::new(snapshot));

        Ok(())
    }
}

impl Default for ClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

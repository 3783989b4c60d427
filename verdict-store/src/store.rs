//! The document and policy store.
//!
//! State lives behind a `tokio::sync::RwLock`; a transaction is an owned
//! guard, so it can be held across handler await points and is released on
//! every exit path when dropped. Writers are exclusive, readers share.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tokio::sync::RwLock;
use tracing::debug;

use verdict_ast::{parse_module, Module};

use crate::error::{Result, StoreError};
use crate::txn::{StoreState, StoredPolicy, Transaction};

/// Handle to the shared store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    state: Arc<RwLock<StoreState>>,
    policy_dir: Option<Arc<PathBuf>>,
}

impl Store {
    /// An empty in-memory store.
    pub fn new() -> Store {
        Store {
            state: Arc::new(RwLock::new(StoreState {
                data: JsonValue::Object(Map::new()),
                policies: BTreeMap::new(),
            })),
            policy_dir: None,
        }
    }

    /// A store that persists policy module sources under `policy_dir`,
    /// loading any modules already present. Document data stays in memory.
    pub fn open(policy_dir: PathBuf) -> Result<Store> {
        std::fs::create_dir_all(&policy_dir)?;
        let mut policies = BTreeMap::new();
        for entry in std::fs::read_dir(&policy_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let raw = std::fs::read(entry.path())?;
            let src = String::from_utf8_lossy(&raw);
            let module = parse_module(&src).map_err(|e| StoreError::BadPolicy {
                id: id.clone(),
                message: e.to_string(),
            })?;
            debug!(id = %id, "loaded persisted policy");
            policies.insert(id, StoredPolicy { module, raw });
        }
        Ok(Store {
            state: Arc::new(RwLock::new(StoreState {
                data: JsonValue::Object(Map::new()),
                policies,
            })),
            policy_dir: Some(Arc::new(policy_dir)),
        })
    }

    /// Open a read transaction. Concurrent readers do not block each other.
    pub async fn begin_read(&self) -> Transaction {
        Transaction::from_read_guard(self.state.clone().read_owned().await)
    }

    /// Open a write transaction, exclusive for its lifetime.
    pub async fn begin_write(&self) -> Transaction {
        Transaction::from_write_guard(
            self.state.clone().write_owned().await,
            self.policy_dir.clone(),
        )
    }

    /// The modules currently stored, parsed. Used at startup to seed the
    /// first compiled snapshot.
    pub async fn modules(&self) -> BTreeMap<String, Module> {
        let state = self.state.read().await;
        state
            .policies
            .iter()
            .map(|(id, p)| (id.clone(), p.module.clone()))
            .collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

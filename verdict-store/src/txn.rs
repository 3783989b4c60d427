//! Transactions over the store state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

use verdict_ast::Module;

use crate::error::{Result, StoreError};
use crate::path::Path;

/// A stored policy module: parsed form plus the raw source bytes.
#[derive(Debug, Clone)]
pub struct StoredPolicy {
    pub module: Module,
    pub raw: Vec<u8>,
}

/// Shared store state guarded by the store lock.
pub(crate) struct StoreState {
    pub(crate) data: JsonValue,
    pub(crate) policies: BTreeMap<String, StoredPolicy>,
}

/// A patch operation against the document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

enum Guard {
    Read(OwnedRwLockReadGuard<StoreState>),
    Write(OwnedRwLockWriteGuard<StoreState>),
}

/// A transaction: an owned lock guard over the store state. Reads within a
/// write transaction observe prior writes of the same transaction; the
/// transaction ends when the value is dropped.
pub struct Transaction {
    guard: Guard,
    policy_dir: Option<Arc<PathBuf>>,
}

impl Transaction {
    pub(crate) fn from_read_guard(guard: OwnedRwLockReadGuard<StoreState>) -> Transaction {
        Transaction {
            guard: Guard::Read(guard),
            policy_dir: None,
        }
    }

    pub(crate) fn from_write_guard(
        guard: OwnedRwLockWriteGuard<StoreState>,
        policy_dir: Option<Arc<PathBuf>>,
    ) -> Transaction {
        Transaction {
            guard: Guard::Write(guard),
            policy_dir,
        }
    }

    fn state(&self) -> &StoreState {
        match &self.guard {
            Guard::Read(g) => g,
            Guard::Write(g) => g,
        }
    }

    fn state_mut(&mut self) -> Result<&mut StoreState> {
        match &mut self.guard {
            Guard::Read(_) => Err(StoreError::ReadOnly),
            Guard::Write(g) => Ok(g),
        }
    }

    // -- documents ----------------------------------------------------------

    /// Read the document at `path`. The empty path is the whole document.
    pub fn read(&self, path: &Path) -> Result<&JsonValue> {
        let mut node = &self.state().data;
        for seg in path.segments() {
            node = match node {
                JsonValue::Object(map) => map
                    .get(seg)
                    .ok_or_else(|| StoreError::not_found(path))?,
                JsonValue::Array(items) => {
                    let idx: usize = seg
                        .parse()
                        .map_err(|_| StoreError::not_found(path))?;
                    items.get(idx).ok_or_else(|| StoreError::not_found(path))?
                }
                _ => return Err(StoreError::not_found(path)),
            };
        }
        Ok(node)
    }

    /// Apply one patch operation.
    pub fn write(&mut self, op: PatchOp, path: &Path, value: JsonValue) -> Result<()> {
        let state = self.state_mut()?;

        if path.is_empty() {
            return match op {
                PatchOp::Add | PatchOp::Replace => {
                    if !value.is_object() {
                        return Err(StoreError::invalid_patch(
                            "root document must be an object",
                        ));
                    }
                    state.data = value;
                    Ok(())
                }
                PatchOp::Remove => Err(StoreError::invalid_patch(
                    "cannot remove the root document",
                )),
            };
        }

        // Navigate to the parent of the final segment.
        let mut node = &mut state.data;
        for seg in &path.segments()[..path.len() - 1] {
            node = match node {
                JsonValue::Object(map) => map
                    .get_mut(seg)
                    .ok_or_else(|| StoreError::not_found(path))?,
                JsonValue::Array(items) => {
                    let idx: usize = seg
                        .parse()
                        .map_err(|_| StoreError::not_found(path))?;
                    items
                        .get_mut(idx)
                        .ok_or_else(|| StoreError::not_found(path))?
                }
                _ => return Err(StoreError::not_found(path)),
            };
        }

        let last = path.last().expect("non-empty path");
        match node {
            JsonValue::Object(map) => match op {
                PatchOp::Add => {
                    map.insert(last.to_string(), value);
                    Ok(())
                }
                PatchOp::Remove => map
                    .shift_remove(last)
                    .map(|_| ())
                    .ok_or_else(|| StoreError::not_found(path)),
                PatchOp::Replace => {
                    if !map.contains_key(last) {
                        return Err(StoreError::not_found(path));
                    }
                    map.insert(last.to_string(), value);
                    Ok(())
                }
            },
            JsonValue::Array(items) => match op {
                PatchOp::Add if last == "-" => {
                    items.push(value);
                    Ok(())
                }
                PatchOp::Add => {
                    let idx = parse_index(last)?;
                    if idx > items.len() {
                        return Err(StoreError::invalid_patch(format!(
                            "array index out of range: {}",
                            path
                        )));
                    }
                    items.insert(idx, value);
                    Ok(())
                }
                PatchOp::Remove => {
                    let idx = parse_index(last)?;
                    if idx >= items.len() {
                        return Err(StoreError::not_found(path));
                    }
                    items.remove(idx);
                    Ok(())
                }
                PatchOp::Replace => {
                    let idx = parse_index(last)?;
                    match items.get_mut(idx) {
                        Some(slot) => {
                            *slot = value;
                            Ok(())
                        }
                        None => Err(StoreError::not_found(path)),
                    }
                }
            },
            _ => Err(StoreError::not_found(path)),
        }
    }

    // -- policies -----------------------------------------------------------

    /// All stored policies, by id.
    pub fn list_policies(&self) -> impl Iterator<Item = (&String, &StoredPolicy)> {
        self.state().policies.iter()
    }

    /// The parsed module set — the input to a whole-set recompilation.
    pub fn policy_modules(&self) -> BTreeMap<String, Module> {
        self.state()
            .policies
            .iter()
            .map(|(id, p)| (id.clone(), p.module.clone()))
            .collect()
    }

    pub fn get_policy(&self, id: &str) -> Result<&StoredPolicy> {
        self.state()
            .policies
            .get(id)
            .ok_or_else(|| StoreError::PolicyNotFound(id.to_string()))
    }

    /// Install or replace a policy module, persisting its source when the
    /// store has a policy directory.
    pub fn insert_policy(&mut self, id: &str, module: Module, raw: Vec<u8>) -> Result<()> {
        let dir = self.policy_dir.clone();
        let state = self.state_mut()?;
        if let Some(dir) = dir {
            std::fs::write(dir.join(id), &raw)?;
        }
        state
            .policies
            .insert(id.to_string(), StoredPolicy { module, raw });
        Ok(())
    }

    pub fn delete_policy(&mut self, id: &str) -> Result<()> {
        let dir = self.policy_dir.clone();
        let state = self.state_mut()?;
        if state.policies.remove(id).is_none() {
            return Err(StoreError::PolicyNotFound(id.to_string()));
        }
        if let Some(dir) = dir {
            match std::fs::remove_file(dir.join(id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn parse_index(seg: &str) -> Result<usize> {
    seg.parse().map_err(|_| {
        StoreError::invalid_patch(format!("array index must be an integer: {}", seg))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use serde_json::json;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[tokio::test]
    async fn read_your_writes() {
        let store = Store::new();
        let mut txn = store.begin_write().await;
        txn.write(PatchOp::Add, &path("/a"), json!({"b": 1})).unwrap();
        assert_eq!(txn.read(&path("/a/b")).unwrap(), &json!(1));
        drop(txn);

        let txn = store.begin_read().await;
        assert_eq!(txn.read(&path("/a/b")).unwrap(), &json!(1));
        assert!(txn.read(&path("/a/c")).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn array_patch_semantics() {
        let store = Store::new();
        let mut txn = store.begin_write().await;
        txn.write(PatchOp::Add, &path("/x"), json!({})).unwrap();
        txn.write(PatchOp::Add, &path("/x/y"), json!([1, 2])).unwrap();
        txn.write(PatchOp::Replace, &path("/x/y/0"), json!(9)).unwrap();
        assert_eq!(txn.read(&path("/x/y")).unwrap(), &json!([9, 2]));

        txn.write(PatchOp::Add, &path("/x/y/-"), json!(7)).unwrap();
        assert_eq!(txn.read(&path("/x/y")).unwrap(), &json!([9, 2, 7]));

        txn.write(PatchOp::Add, &path("/x/y/1"), json!(5)).unwrap();
        assert_eq!(txn.read(&path("/x/y")).unwrap(), &json!([9, 5, 2, 7]));

        txn.write(PatchOp::Remove, &path("/x/y/0"), JsonValue::Null)
            .unwrap();
        assert_eq!(txn.read(&path("/x/y")).unwrap(), &json!([5, 2, 7]));

        let err = txn
            .write(PatchOp::Add, &path("/x/y/9"), json!(0))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch(_)));

        let err = txn
            .write(PatchOp::Add, &path("/x/y/nope"), json!(0))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch(_)));
    }

    #[tokio::test]
    async fn replace_and_remove_require_target() {
        let store = Store::new();
        let mut txn = store.begin_write().await;
        let err = txn
            .write(PatchOp::Replace, &path("/missing"), json!(1))
            .unwrap_err();
        assert!(err.is_not_found());
        let err = txn
            .write(PatchOp::Remove, &path("/missing"), JsonValue::Null)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn root_writes() {
        let store = Store::new();
        let mut txn = store.begin_write().await;
        let err = txn
            .write(PatchOp::Add, &path("/"), json!([1]))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPatch(_)));
        txn.write(PatchOp::Add, &path("/"), json!({"a": 1})).unwrap();
        assert_eq!(txn.read(&path("/a")).unwrap(), &json!(1));
    }

    #[tokio::test]
    async fn write_through_read_txn_fails() {
        let store = Store::new();
        let mut txn = store.begin_read().await;
        let err = txn
            .write(PatchOp::Add, &path("/a"), json!(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
    }

    #[tokio::test]
    async fn policy_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = "package a\nb = 1 :- true";
        {
            let store = Store::open(dir.path().to_path_buf()).unwrap();
            let mut txn = store.begin_write().await;
            let module = verdict_ast::parse_module(src).unwrap();
            txn.insert_policy("p1", module, src.as_bytes().to_vec())
                .unwrap();
        }
        {
            let store = Store::open(dir.path().to_path_buf()).unwrap();
            let txn = store.begin_read().await;
            let policy = txn.get_policy("p1").unwrap();
            assert_eq!(policy.raw, src.as_bytes());
            drop(txn);
            let mut txn = store.begin_write().await;
            txn.delete_policy("p1").unwrap();
        }
        {
            let store = Store::open(dir.path().to_path_buf()).unwrap();
            let txn = store.begin_read().await;
            assert!(txn.get_policy("p1").is_err());
        }
    }
}

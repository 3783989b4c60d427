//! Shared application state: the store and the compiler holder.

use std::sync::Arc;

use parking_lot::RwLock;

use verdict_ast::Compiler;
use verdict_store::Store;

use crate::config::ServerConfig;

/// State shared by every handler.
pub struct AppState {
    pub store: Store,
    pub compiler: CompilerHolder,
    pub config: ServerConfig,
}

/// Holds the current compiled snapshot under a readers-writer discipline.
///
/// `current()` clones the `Arc`, so a handler that snapshotted before a
/// publish keeps its snapshot alive for the rest of its lifetime; readers
/// never block each other, and the writer holds the lock only for the
/// pointer swap — recompilation happens outside on a local value.
pub struct CompilerHolder {
    current: RwLock<Arc<Compiler>>,
}

impl CompilerHolder {
    pub fn new(compiler: Compiler) -> Self {
        CompilerHolder {
            current: RwLock::new(Arc::new(compiler)),
        }
    }

    /// A stable reference to the most recently published snapshot.
    pub fn current(&self) -> Arc<Compiler> {
        self.current.read().clone()
    }

    /// Atomically replace the current snapshot.
    pub fn publish(&self, next: Arc<Compiler>) {
        *self.current.write() = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn superseded_snapshots_stay_valid() {
        let holder = CompilerHolder::new(Compiler::empty());
        let before = holder.current();

        let mut modules = BTreeMap::new();
        modules.insert(
            "m".to_string(),
            verdict_ast::parse_module("package a\nb = 1 :- true").unwrap(),
        );
        holder.publish(Arc::new(Compiler::compile(modules).unwrap()));

        // The old snapshot still answers from its own module set.
        assert!(before.modules().is_empty());
        assert_eq!(holder.current().modules().len(), 1);
    }
}

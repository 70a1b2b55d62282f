//! Persisted infrastructure variables.
//!
//! Arbitrary named values an infrastructure keeps durable across restarts
//! (counters, issued identifiers). The map lives behind its own guard,
//! independent of the node tracker's. Durable flushing is the manager's
//! concern; this type only guarantees that mutations are exclusive and
//! all-or-nothing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::InfraResult;

/// The variable store of one infrastructure instance.
#[derive(Debug, Default)]
pub struct InfraVariables {
    values: Mutex<HashMap<String, Value>>,
}

impl InfraVariables {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        // The map is never left mid-mutation; a poisoned guard still holds
        // consistent state.
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a mutator under exclusive access.
    ///
    /// The mutator operates on a working copy; it is committed only when it
    /// returns `Ok`. A failing mutator leaves the store unchanged.
    pub fn set_scoped<R>(
        &self,
        mutator: impl FnOnce(&mut HashMap<String, Value>) -> InfraResult<R>,
    ) -> InfraResult<R> {
        let mut guard = self.guard();
        let mut working = guard.clone();
        let result = mutator(&mut working)?;
        *guard = working;
        Ok(result)
    }

    /// Look up a single value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.guard().get(name).cloned()
    }

    /// Snapshot the whole map, for persistence.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.guard().clone()
    }

    /// Replace the whole map, for recovery.
    pub fn restore(&self, values: HashMap<String, Value>) {
        *self.guard() = values;
    }

    /// Number of stored variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Returns true if no variables are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InfraError;

    #[test]
    fn scoped_mutation_commits_on_ok() {
        let vars = InfraVariables::new();

        let next = vars
            .set_scoped(|values| {
                let index = values
                    .get("node_index")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                values.insert("node_index".to_owned(), Value::from(index + 1));
                Ok(index + 1)
            })
            .unwrap();

        assert_eq!(next, 1);
        assert_eq!(vars.get("node_index"), Some(Value::from(1)));
    }

    #[test]
    fn failing_mutator_leaves_store_unchanged() {
        let vars = InfraVariables::new();
        vars.restore(HashMap::from([("key".to_owned(), Value::from("old"))]));

        let result: InfraResult<()> = vars.set_scoped(|values| {
            values.insert("key".to_owned(), Value::from("new"));
            values.insert("extra".to_owned(), Value::from(1));
            Err(InfraError::internal("mutator failed"))
        });

        assert!(result.is_err());
        assert_eq!(vars.get("key"), Some(Value::from("old")));
        assert!(vars.get("extra").is_none());
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let vars = InfraVariables::new();
        vars.set_scoped(|values| {
            values.insert("a".to_owned(), Value::from(1));
            values.insert("b".to_owned(), Value::from("two"));
            Ok(())
        })
        .unwrap();

        let snapshot = vars.snapshot();

        let recovered = InfraVariables::new();
        recovered.restore(snapshot);
        assert_eq!(recovered.get("a"), Some(Value::from(1)));
        assert_eq!(recovered.get("b"), Some(Value::from("two")));
    }
}

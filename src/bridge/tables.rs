//! Method and variable registries.
//!
//! Both tables are plain data structures; the [`Bridge`](super::Bridge) wraps
//! each in its own mutex and shares them across every connection.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::BridgeError;

/// A host function callable from the remote runtime.
///
/// Receives the frame's `params` in order. An `Err` is reported as a
/// handler diagnostic; nothing is sent back to the peer either way.
pub type MethodHandler = Arc<dyn Fn(&[Value]) -> anyhow::Result<()> + Send + Sync>;

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct MethodTable {
    handlers: HashMap<String, MethodHandler>,
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods())
            .finish()
    }
}

impl MethodTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register(&mut self, name: &str, handler: MethodHandler) {
        if self.handlers.insert(name.to_owned(), handler).is_some() {
            log::debug!("[Bridge] Replaced handler for method '{}'", name);
        }
    }

    /// Look up a handler by exact name.
    pub fn get(&self, name: &str) -> Option<MethodHandler> {
        self.handlers.get(name).cloned()
    }

    /// Registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// A stored variable value whose encoding is deferred to snapshot time.
pub trait WireValue: Send + Sync {
    /// Encode the value as JSON.
    fn to_wire(&self) -> serde_json::Result<Value>;
}

impl<T: Serialize + Send + Sync> WireValue for T {
    fn to_wire(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Result of [`VariableTable::snapshot`].
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Successfully encoded `(name, value)` pairs, in insertion order.
    pub entries: Vec<(String, Value)>,
    /// One error per variable that failed to encode.
    pub errors: Vec<BridgeError>,
}

/// Registry of named values served to `poll` requests.
///
/// Iteration follows first-insertion order; overwriting a name keeps its
/// position.
#[derive(Default)]
pub struct VariableTable {
    values: IndexMap<String, Arc<dyn WireValue>>,
}

impl std::fmt::Debug for VariableTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableTable")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl VariableTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`, overwriting in place.
    pub fn push(&mut self, name: &str, value: Arc<dyn WireValue>) {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
        } else {
            self.values.insert(name.to_owned(), value);
        }
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no variable has been pushed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode every variable. A value that fails to encode is left out and
    /// reported in [`Snapshot::errors`]; the others are unaffected.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for (name, value) in &self.values {
            match value.to_wire() {
                Ok(encoded) => snapshot.entries.push((name.clone(), encoded)),
                Err(source) => snapshot.errors.push(BridgeError::Serialization {
                    name: name.clone(),
                    source,
                }),
            }
        }
        snapshot
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;
    use std::sync::Mutex;

    /// A value whose `Serialize` impl always fails.
    pub(crate) struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not representable"))
        }
    }

    #[test]
    fn test_push_overwrites_single_entry() {
        let mut table = VariableTable::new();
        table.push("x", Arc::new(1));
        table.push("x", Arc::new("two"));

        let snap = table.snapshot();
        assert_eq!(snap.entries, vec![("x".to_string(), json!("two"))]);
        assert!(snap.errors.is_empty());
    }

    #[test]
    fn test_snapshot_keeps_first_insertion_order() {
        let mut table = VariableTable::new();
        table.push("b", Arc::new(1));
        table.push("a", Arc::new(2));
        table.push("b", Arc::new(3));

        let names: Vec<String> = table.snapshot().entries.into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_snapshot_isolates_encoding_failures() {
        let mut table = VariableTable::new();
        table.push("ok1", Arc::new(1.5));
        table.push("bad", Arc::new(Unencodable));
        table.push("ok2", Arc::new(true));

        let snap = table.snapshot();
        assert_eq!(
            snap.entries,
            vec![("ok1".to_string(), json!(1.5)), ("ok2".to_string(), json!(true))]
        );
        assert_eq!(snap.errors.len(), 1);
        assert!(matches!(
            &snap.errors[0],
            BridgeError::Serialization { name, .. } if name == "bad"
        ));
    }

    #[test]
    fn test_snapshot_is_side_effect_free() {
        let mut table = VariableTable::new();
        table.push("PI", Arc::new(3.141_592_653_6));
        let first = table.snapshot().entries;
        let second = table.snapshot().entries;
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let mut table = VariableTable::new();
        table.push("pi", Arc::new(1));
        table.push("PI", Arc::new(2));
        assert_eq!(table.len(), 2);

        let mut methods = MethodTable::new();
        methods.register("write", Arc::new(|_: &[Value]| -> anyhow::Result<()> { Ok(()) }));
        assert!(methods.get("Write").is_none());
        assert!(methods.get("write").is_some());
    }

    #[test]
    fn test_register_last_write_wins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut methods = MethodTable::new();

        let c1 = Arc::clone(&calls);
        methods.register("m", Arc::new(move |_: &[Value]| -> anyhow::Result<()> {
            c1.lock().unwrap().push("first");
            Ok(())
        }));
        let c2 = Arc::clone(&calls);
        methods.register("m", Arc::new(move |_: &[Value]| -> anyhow::Result<()> {
            c2.lock().unwrap().push("second");
            Ok(())
        }));

        let handler = methods.get("m").unwrap();
        handler(&[]).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
        assert_eq!(methods.methods(), vec!["m"]);
    }
}

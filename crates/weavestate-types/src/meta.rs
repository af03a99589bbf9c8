//! Per-source execution metadata.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Permanent classification of a contract source.
///
/// A source is `Recursive` when its handler can read other contracts' state
/// mid-execution; classification happens once per distinct source id and
/// never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Plain,
    Recursive,
}

impl SourceKind {
    pub fn is_recursive(self) -> bool {
        matches!(self, SourceKind::Recursive)
    }
}

/// Opaque handle to a compiled contract handler.
///
/// The cache/replay core never looks inside: the loader produces it and the
/// execution engine downcasts it back to whatever its execution technology
/// uses (embedded interpreter, subprocess sandbox, plugin). Not serializable;
/// cache exports persist the source id instead and the handler is recompiled
/// on import.
#[derive(Clone)]
pub struct Handler(Arc<dyn Any + Send + Sync>);

impl Handler {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// Execution metadata for one distinct contract source.
///
/// Shared by `Arc` across every contract id that references the same source;
/// immutable after creation, which is what makes sharing across snapshot
/// clones safe.
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    /// Ledger id of the source the handler was compiled from.
    pub source_id: String,
    /// Address that published the source.
    pub owner: String,
    pub kind: SourceKind,
    pub handler: Handler,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_downcasts_to_its_concrete_type() {
        let handler = Handler::new(42u64);
        assert_eq!(handler.downcast_ref::<u64>(), Some(&42));
        assert!(handler.downcast_ref::<String>().is_none());
    }

    #[test]
    fn source_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SourceKind::Recursive).unwrap(),
            "\"recursive\""
        );
    }
}

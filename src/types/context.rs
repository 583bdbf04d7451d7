//! Deduplication keys for submitted tasks.
//!
//! A [`TaskContext`] is any value with equality. The manager refuses a new
//! submission while a live task holds an equal context. Contexts of different
//! concrete types are never equal.

use std::any::Any;
use std::fmt::Debug;

/// Equality-comparable key identifying "logically the same" task.
///
/// Implemented automatically for every `PartialEq + Debug + Send + Sync + 'static`
/// type, so plain structs, enums, and strings work as contexts.
///
/// # Examples
///
/// ```
/// use background_tasks::TaskContext;
///
/// #[derive(Debug, PartialEq)]
/// struct ReindexProject(&'static str);
///
/// let a = ReindexProject("ALPHA");
/// let b = ReindexProject("ALPHA");
/// let c = ReindexProject("BETA");
///
/// assert!(a.same_context(&b));
/// assert!(!a.same_context(&c));
/// assert!(!a.same_context(&"ALPHA".to_string()));
/// ```
pub trait TaskContext: Debug + Send + Sync + 'static {
    /// Returns `true` if `other` is the same concrete type and equal.
    fn same_context(&self, other: &dyn TaskContext) -> bool;

    /// Upcast for downcasting to the concrete context type.
    fn as_any(&self) -> &dyn Any;
}

impl<T> TaskContext for T
where
    T: PartialEq + Debug + Send + Sync + 'static,
{
    fn same_context(&self, other: &dyn TaskContext) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Import {
        source: String,
    }

    #[derive(Debug, PartialEq)]
    struct Export {
        source: String,
    }

    #[test]
    fn equal_values_match_through_trait_objects() {
        let a: Arc<dyn TaskContext> = Arc::new(Import {
            source: "csv".to_string(),
        });
        let b: Arc<dyn TaskContext> = Arc::new(Import {
            source: "csv".to_string(),
        });
        assert!(a.same_context(b.as_ref()));
        assert!(b.same_context(a.as_ref()));
    }

    #[test]
    fn different_types_never_match() {
        let import = Import {
            source: "csv".to_string(),
        };
        let export = Export {
            source: "csv".to_string(),
        };
        assert!(!import.same_context(&export));
    }

    #[test]
    fn downcast_recovers_concrete_context() {
        let ctx: Arc<dyn TaskContext> = Arc::new(Import {
            source: "xml".to_string(),
        });
        let import = ctx.as_any().downcast_ref::<Import>().unwrap();
        assert_eq!(import.source, "xml");
    }
}

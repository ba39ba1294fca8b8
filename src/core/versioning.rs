//! Versioning strategy: decides which scope fields take part in undo/redo.
//!
//! A strategy is a pure predicate over field names. Only mutations of fields the
//! strategy accepts are recorded by [`ProcessHistory`](super::ProcessHistory).

use std::fmt;
use std::sync::Arc;

/// Default prefix marking a scope field as versioned.
pub const DEFAULT_VERSIONING_PREFIX: &str = "v_";

/// Pure predicate that decides whether a field is versioned.
///
/// # Example
///
/// ```rust
/// use flowstate::core::VersioningStrategy;
///
/// let strategy = VersioningStrategy::prefixed("v_");
///
/// assert!(strategy.check("v_amount"));
/// assert!(!strategy.check("amount"));
/// ```
#[derive(Clone)]
pub struct VersioningStrategy {
    predicate: Arc<dyn Fn(&str) -> bool + Send + Sync>,
}

impl VersioningStrategy {
    /// Create a strategy from a predicate. The predicate must be deterministic.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Version every field whose name starts with `prefix`.
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(move |name| name.starts_with(prefix.as_str()))
    }

    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn check(&self, field: &str) -> bool {
        (self.predicate)(field)
    }
}

impl Default for VersioningStrategy {
    fn default() -> Self {
        Self::prefixed(DEFAULT_VERSIONING_PREFIX)
    }
}

impl fmt::Debug for VersioningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersioningStrategy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_uses_prefix() {
        let strategy = VersioningStrategy::default();

        assert!(strategy.check("v_title"));
        assert!(!strategy.check("title"));
        assert!(!strategy.check("_v_title"));
    }

    #[test]
    fn custom_predicate_is_used() {
        let strategy = VersioningStrategy::new(|name| name.ends_with("Draft"));

        assert!(strategy.check("orderDraft"));
        assert!(!strategy.check("order"));
    }

    #[test]
    fn all_accepts_every_field() {
        let strategy = VersioningStrategy::all();
        assert!(strategy.check(""));
        assert!(strategy.check("anything"));
    }

    #[test]
    fn strategy_is_deterministic() {
        let strategy = VersioningStrategy::prefixed("x");
        assert_eq!(strategy.check("xa"), strategy.check("xa"));
    }
}

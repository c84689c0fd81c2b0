//! Idempotency keys: the semantic identity of a unit of work.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TaskError;
use crate::types::task::TaskKind;

/// Deterministic identity derived from scope + kind + optional sub-scope.
///
/// Two requests with equal keys describe the same semantic unit of work, so
/// at most one live task may exist per key.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::domain::IdempotencyKey;
/// use aiwrite_tasks::TaskKind;
///
/// let key = IdempotencyKey::new("P1", TaskKind::Draft, Some("ch2"));
/// assert_eq!(key.to_string(), "P1:draft:ch2");
///
/// let parent = key.parent();
/// assert_eq!(parent.to_string(), "P1:draft");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    scope_id: String,
    kind: TaskKind,
    sub_scope_id: Option<String>,
}

impl IdempotencyKey {
    /// Builds a key. Use [`validate_id`] on caller-supplied identifiers first.
    pub fn new(scope_id: &str, kind: TaskKind, sub_scope_id: Option<&str>) -> Self {
        Self {
            scope_id: scope_id.to_string(),
            kind,
            sub_scope_id: sub_scope_id.map(str::to_string),
        }
    }

    /// The scope component.
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// The kind component.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The sub-scope component, if any.
    pub fn sub_scope_id(&self) -> Option<&str> {
        self.sub_scope_id.as_deref()
    }

    /// The key of the document-scope unit this key belongs to.
    pub fn parent(&self) -> Self {
        Self {
            scope_id: self.scope_id.clone(),
            kind: self.kind,
            sub_scope_id: None,
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_scope_id {
            Some(sub) => write!(f, "{}:{}:{}", self.scope_id, self.kind, sub),
            None => write!(f, "{}:{}", self.scope_id, self.kind),
        }
    }
}

/// Checks that a scope or sub-scope identifier can be embedded in keys.
///
/// Identifiers must be non-empty and free of `:` and `/`, which delimit
/// idempotency keys and storage keys.
///
/// # Errors
///
/// Returns [`TaskError::InvalidRequest`] naming the offending identifier.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::domain::validate_id;
///
/// assert!(validate_id("scope", "paper-42").is_ok());
/// assert!(validate_id("scope", "").is_err());
/// assert!(validate_id("sub-scope", "ch1:2").is_err());
/// ```
pub fn validate_id(what: &str, id: &str) -> Result<(), TaskError> {
    if id.is_empty() {
        return Err(TaskError::InvalidRequest(format!("{what} id is empty")));
    }
    if id.contains(':') || id.contains('/') {
        return Err(TaskError::InvalidRequest(format!(
            "{what} id {id:?} must not contain ':' or '/'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_give_equal_keys() {
        let a = IdempotencyKey::new("P1", TaskKind::Refine, Some("ch3"));
        let b = IdempotencyKey::new("P1", TaskKind::Refine, Some("ch3"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn kind_and_sub_scope_distinguish_keys() {
        let draft = IdempotencyKey::new("P1", TaskKind::Draft, Some("ch3"));
        let refine = IdempotencyKey::new("P1", TaskKind::Refine, Some("ch3"));
        let other = IdempotencyKey::new("P1", TaskKind::Draft, Some("ch4"));
        assert_ne!(draft.to_string(), refine.to_string());
        assert_ne!(draft.to_string(), other.to_string());
        assert_ne!(draft.to_string(), draft.parent().to_string());
    }

    #[test]
    fn document_scope_key_has_two_components() {
        let key = IdempotencyKey::new("P1", TaskKind::Abstract, None);
        assert_eq!(key.to_string(), "P1:abstract");
        assert_eq!(key.sub_scope_id(), None);
    }
}

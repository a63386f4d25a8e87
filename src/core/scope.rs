use crate::core::{Result, SyncError};
use std::fmt;
use std::str::FromStr;

const NAMESPACE_SEPARATOR: &str = "::";

/// The signed-in identity consulted by the sandbox predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            email: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// The tenant whose entities are being synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParentScope {
    id: String,
    sandboxed: bool,
}

impl ParentScope {
    pub fn new(id: impl Into<String>, sandboxed: bool) -> Self {
        Self {
            id: id.into(),
            sandboxed,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }
}

/// Explicit initialization record handed to the engine when a scope is activated.
///
/// The sandbox decision is taken from this record exactly once per activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInit {
    pub scope_id: String,
    pub identity: Identity,
    /// Forces sandbox mode regardless of the configured rules.
    pub force_sandbox: bool,
}

impl ScopeInit {
    pub fn new(scope_id: impl Into<String>, identity: Identity) -> Self {
        Self {
            scope_id: scope_id.into(),
            identity,
            force_sandbox: false,
        }
    }

    pub fn sandboxed(mut self) -> Self {
        self.force_sandbox = true;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.scope_id.trim().is_empty() {
            return Err(SyncError::validation("scope id must not be empty"));
        }
        Ok(())
    }
}

/// Cache key derived from `(entity kind, parent scope id)`, rendered `kind::scope`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheNamespace {
    kind: String,
    scope_id: String,
}

impl CacheNamespace {
    pub fn new(kind: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope_id: scope_id.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, NAMESPACE_SEPARATOR, self.scope_id)
    }
}

impl FromStr for CacheNamespace {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, scope_id) = s.split_once(NAMESPACE_SEPARATOR).ok_or_else(|| {
            SyncError::validation(format!(
                "namespace '{}' must look like '<kind>{}<scope>'",
                s, NAMESPACE_SEPARATOR
            ))
        })?;
        if kind.is_empty() || scope_id.is_empty() {
            return Err(SyncError::validation(format!(
                "namespace '{}' has an empty kind or scope",
                s
            )));
        }
        Ok(Self::new(kind, scope_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_renders_kind_and_scope() {
        let ns = CacheNamespace::new("tasks", "w2");
        assert_eq!(ns.to_string(), "tasks::w2");
        assert_eq!("tasks::w2".parse::<CacheNamespace>().unwrap(), ns);
    }

    #[test]
    fn namespace_parse_rejects_missing_separator() {
        assert!("tasks-w2".parse::<CacheNamespace>().is_err());
        assert!("::w2".parse::<CacheNamespace>().is_err());
    }

    #[test]
    fn blank_scope_id_is_rejected() {
        let init = ScopeInit::new("  ", Identity::anonymous());
        assert!(matches!(init.validate(), Err(SyncError::Validation(_))));
    }
}

//! Local-only mode for demo identities and reserved scopes.

use crate::core::{CacheNamespace, Entity, EntityKind, Identity, Result, ScopeInit, Timestamp};
use crate::storage::LocalCache;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Identities and scopes that must never reach the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRules {
    #[serde(default)]
    pub reserved_user_ids: Vec<String>,
    #[serde(default)]
    pub reserved_emails: Vec<String>,
    #[serde(default)]
    pub reserved_scope_ids: Vec<String>,
}

impl Default for SandboxRules {
    fn default() -> Self {
        Self {
            reserved_user_ids: vec!["demo-user-id".to_string()],
            reserved_emails: vec!["demo@svatbot.cz".to_string()],
            reserved_scope_ids: vec!["demo-wedding".to_string()],
        }
    }
}

impl SandboxRules {
    pub fn none() -> Self {
        Self {
            reserved_user_ids: Vec::new(),
            reserved_emails: Vec::new(),
            reserved_scope_ids: Vec::new(),
        }
    }

    pub fn reserve_user(mut self, user_id: impl Into<String>) -> Self {
        self.reserved_user_ids.push(user_id.into());
        self
    }

    pub fn reserve_email(mut self, email: impl Into<String>) -> Self {
        self.reserved_emails.push(email.into());
        self
    }

    pub fn reserve_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.reserved_scope_ids.push(scope_id.into());
        self
    }
}

/// Outcome of preparing a sandboxed scope's working set.
#[derive(Debug, Clone, PartialEq)]
pub enum SeedOutcome<T> {
    /// The namespace did not exist; fixtures were written.
    Seeded(Vec<Entity<T>>),
    /// The namespace already existed and was loaded as-is.
    Existing(Vec<Entity<T>>),
}

impl<T> SeedOutcome<T> {
    pub fn was_seeded(&self) -> bool {
        matches!(self, Self::Seeded(_))
    }

    pub fn into_entities(self) -> Vec<Entity<T>> {
        match self {
            Self::Seeded(entities) | Self::Existing(entities) => entities,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DemoSandbox {
    rules: SandboxRules,
}

impl DemoSandbox {
    pub fn new(rules: SandboxRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &SandboxRules {
        &self.rules
    }

    pub fn is_sandboxed(&self, identity: &Identity, scope_id: &str) -> bool {
        let reserved_user = identity
            .user_id
            .as_ref()
            .is_some_and(|id| self.rules.reserved_user_ids.contains(id));
        let reserved_email = identity.email.as_ref().is_some_and(|email| {
            self.rules
                .reserved_emails
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(email))
        });
        let reserved_scope = self.rules.reserved_scope_ids.iter().any(|id| id == scope_id);
        reserved_user || reserved_email || reserved_scope
    }

    /// Sandbox decision for an activation record.
    pub fn evaluate(&self, init: &ScopeInit) -> bool {
        init.force_sandbox || self.is_sandboxed(&init.identity, &init.scope_id)
    }

    /// Loads the scope's working set, writing fixtures the first time the
    /// namespace is seen. Seeding is keyed on namespace existence, so a scope
    /// is never re-seeded while its cache entry survives.
    pub fn seed_if_absent<T: EntityKind>(
        &self,
        cache: &LocalCache,
        scope_id: &str,
        now: Timestamp,
    ) -> Result<SeedOutcome<T>> {
        let namespace = CacheNamespace::new(T::KIND, scope_id);
        if cache.contains(&namespace)? {
            return Ok(SeedOutcome::Existing(cache.load_or_empty(&namespace)));
        }

        let fixtures = T::fixtures(scope_id, now);
        if let Err(err) = cache.set(&namespace, &fixtures) {
            warn!(
                "sandbox seed for '{}' is not durable: {}",
                namespace, err
            );
        }
        info!(
            "seeded sandbox namespace '{}' with {} fixture entities",
            namespace,
            fixtures.len()
        );
        Ok(SeedOutcome::Seeded(fixtures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_identities_are_sandboxed() {
        let sandbox = DemoSandbox::default();
        assert!(sandbox.is_sandboxed(&Identity::new("demo-user-id"), "w1"));
        assert!(sandbox.is_sandboxed(
            &Identity::new("u1").with_email("DEMO@svatbot.cz"),
            "w1"
        ));
        assert!(sandbox.is_sandboxed(&Identity::new("u1"), "demo-wedding"));
        assert!(!sandbox.is_sandboxed(&Identity::new("u1"), "w1"));
        assert!(!sandbox.is_sandboxed(&Identity::anonymous(), "w1"));
    }

    #[test]
    fn forced_sandbox_wins() {
        let sandbox = DemoSandbox::new(SandboxRules::none());
        let init = ScopeInit::new("w1", Identity::new("u1")).sandboxed();
        assert!(sandbox.evaluate(&init));
        assert!(!sandbox.evaluate(&ScopeInit::new("w1", Identity::new("u1"))));
    }
}

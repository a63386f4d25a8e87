use super::policy::ConsistencyPolicy;
use crate::core::{ParentScope, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Captured `(scope, generation)` of one activation.
///
/// Async work holds a lease and checks [`ScopeLease::is_current`] before it
/// touches the entity store, so results of a superseded activation are dropped.
#[derive(Debug, Clone)]
pub struct ScopeLease {
    scope: ParentScope,
    generation: u64,
    current: Arc<AtomicU64>,
    policy: Arc<Mutex<ConsistencyPolicy>>,
}

impl ScopeLease {
    pub fn scope(&self) -> &ParentScope {
        &self.scope
    }

    pub fn scope_id(&self) -> &str {
        self.scope.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }

    pub fn policy(&self) -> Result<ConsistencyPolicy> {
        Ok(*self.policy.lock()?)
    }

    pub fn update_policy(
        &self,
        update: impl FnOnce(&mut ConsistencyPolicy),
    ) -> Result<ConsistencyPolicy> {
        let mut policy = self.policy.lock()?;
        update(&mut policy);
        Ok(*policy)
    }
}

/// Hands out leases; issuing or revoking invalidates every earlier lease.
#[derive(Debug, Default)]
pub struct LeaseIssuer {
    current: Arc<AtomicU64>,
}

impl LeaseIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, scope: ParentScope) -> ScopeLease {
        let generation = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        let policy = ConsistencyPolicy::new(scope.is_sandboxed());
        ScopeLease {
            scope,
            generation,
            current: Arc::clone(&self.current),
            policy: Arc::new(Mutex::new(policy)),
        }
    }

    pub fn revoke(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issuing_supersedes_previous_lease() {
        let issuer = LeaseIssuer::new();
        let first = issuer.issue(ParentScope::new("a", false));
        assert!(first.is_current());

        let second = issuer.issue(ParentScope::new("b", false));
        assert!(!first.is_current());
        assert!(second.is_current());

        issuer.revoke();
        assert!(!second.is_current());
    }

    #[test]
    fn clones_share_policy() {
        let issuer = LeaseIssuer::new();
        let lease = issuer.issue(ParentScope::new("a", false));
        let clone = lease.clone();
        clone.update_policy(|p| p.record_write(false)).unwrap();
        assert_eq!(
            lease.policy().unwrap().write_health(),
            crate::sync::RemoteHealth::Degraded
        );
    }
}

//! Which source is authoritative for a scope at a given moment.

/// Last observed state of one remote channel (live query or writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteHealth {
    #[default]
    Unknown,
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Sandboxed scope: the local cache, forever.
    SandboxCache,
    /// The last remote snapshot; local optimistic state is transient.
    RemoteSnapshot,
    /// Local cache plus fallback mutations, until the remote path succeeds again.
    LocalFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    RemoteFirst,
    LocalOnly,
}

/// How an incoming snapshot treats optimistic entities it does not mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    RemoteWins,
    RetainUnsynced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyPolicy {
    sandboxed: bool,
    subscription: RemoteHealth,
    writes: RemoteHealth,
}

impl ConsistencyPolicy {
    pub fn new(sandboxed: bool) -> Self {
        Self {
            sandboxed,
            subscription: RemoteHealth::Unknown,
            writes: RemoteHealth::Unknown,
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }

    pub fn subscription_health(&self) -> RemoteHealth {
        self.subscription
    }

    pub fn write_health(&self) -> RemoteHealth {
        self.writes
    }

    pub fn record_subscription(&mut self, ok: bool) {
        self.subscription = if ok {
            RemoteHealth::Healthy
        } else {
            RemoteHealth::Degraded
        };
    }

    pub fn record_write(&mut self, ok: bool) {
        self.writes = if ok {
            RemoteHealth::Healthy
        } else {
            RemoteHealth::Degraded
        };
    }

    pub fn authority(&self) -> Authority {
        if self.sandboxed {
            Authority::SandboxCache
        } else if self.subscription == RemoteHealth::Degraded || self.writes == RemoteHealth::Degraded {
            Authority::LocalFallback
        } else {
            Authority::RemoteSnapshot
        }
    }

    /// Sandboxed scopes never reach the remote store. Everything else tries it
    /// first; a degraded channel is retried by the next user mutation.
    pub fn write_route(&self) -> WriteRoute {
        if self.sandboxed {
            WriteRoute::LocalOnly
        } else {
            WriteRoute::RemoteFirst
        }
    }

    pub fn merge_mode(&self) -> MergeMode {
        match self.authority() {
            Authority::LocalFallback => MergeMode::RetainUnsynced,
            Authority::RemoteSnapshot | Authority::SandboxCache => MergeMode::RemoteWins,
        }
    }

    /// A remote write that succeeded must also be applied locally when no
    /// snapshot is going to carry it back.
    pub fn echo_remote_writes(&self) -> bool {
        !self.sandboxed && self.subscription == RemoteHealth::Degraded
    }
}

//! Scope-bound synchronization of entity collections.

pub mod coordinator;
pub mod engine;
pub mod lease;
pub mod policy;
pub mod sandbox;
pub mod store;
pub mod subscription;

pub use coordinator::{LocalIdGenerator, OperationResult, OperationSource, WritePathCoordinator};
pub use engine::{ScopeActivation, SyncEngine, WarmStart};
pub use lease::{LeaseIssuer, ScopeLease};
pub use policy::{Authority, ConsistencyPolicy, MergeMode, RemoteHealth, WriteRoute};
pub use sandbox::{DemoSandbox, SandboxRules, SeedOutcome};
pub use store::{EntityStore, ViewState};
pub use subscription::{RemoteSubscriptionManager, SubscriptionHandle};

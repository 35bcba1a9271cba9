pub mod adapter;
pub mod effect;
pub mod enforcer;
pub mod errors;
pub mod loader;
pub mod matcher;
pub mod model;
pub mod policy;
pub mod roles;
pub mod store;
pub mod types;
pub mod web;

pub use adapter::{KdlFileAdapter, MemoryAdapter, PolicyAdapter};
pub use enforcer::Enforcer;
pub use errors::AuthzError;
pub use model::Model;
pub use types::{Effect, GroupingRule, PolicyRule, Request};

use roles::RoleManager;
use store::PolicyStore;

/// Published authorization state: the rule index and the role graph built
/// from it. Immutable once published; changes produce a new snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub store: PolicyStore,
    pub roles: RoleManager,
    /// Bumped on every committed change or reload.
    pub generation: u64,
}

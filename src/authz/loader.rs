use crate::authz::adapter::PolicyAdapter;
use crate::authz::errors::AuthzError;
use crate::authz::model::Model;
use crate::authz::roles::RoleManager;
use crate::authz::store::PolicyStore;
use crate::authz::types::PolicySet;
use crate::authz::Snapshot;

/// Read every rule from the durable store and compile a fresh snapshot.
pub fn load_snapshot(
    model: &Model,
    adapter: &dyn PolicyAdapter,
    generation: u64,
) -> Result<Snapshot, AuthzError> {
    let set = adapter.load_all()?;
    let snapshot = compile_snapshot(model, set, generation);

    tracing::info!(
        generation,
        policies = snapshot.store.policy_count(),
        groupings = snapshot.store.grouping_count(),
        links = snapshot.roles.link_count(),
        domain_scoped = model.domain_scoped(),
        "Loaded authorization policies"
    );

    Ok(snapshot)
}

/// Build the in-memory store and role graph from a rule set.
///
/// Later rows that repeat an identity tuple are dropped, so the first
/// occurrence in the durable store wins.
pub fn compile_snapshot(model: &Model, set: PolicySet, generation: u64) -> Snapshot {
    let mut store = PolicyStore::new();
    let mut roles = RoleManager::new(model.domain_scoped());

    for rule in set.policies {
        let shown = rule.to_string();
        if !store.add_policy(rule) {
            tracing::warn!(rule = %shown, "duplicate policy row ignored");
        }
    }

    for edge in set.groupings {
        if store.add_grouping(edge.clone()) {
            roles.add_link(&edge.user, &edge.role, &edge.domain);
        } else {
            tracing::warn!(rule = %edge, "duplicate grouping row ignored");
        }
    }

    Snapshot {
        store,
        roles,
        generation,
    }
}

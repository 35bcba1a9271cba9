use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::authz::adapter::PolicyAdapter;
use crate::authz::effect::{combine, MatchedEffects};
use crate::authz::errors::AuthzError;
use crate::authz::loader::load_snapshot;
use crate::authz::matcher::{matches, EvalContext};
use crate::authz::model::Model;
use crate::authz::types::*;
use crate::authz::Snapshot;

/// The policy decision point.
///
/// Readers load the current snapshot without locking. Writers are serialized
/// on `writer`, build the next snapshot from a clone, persist the change and
/// only then publish it, so a failed persist leaves the published state
/// untouched.
pub struct Enforcer {
    model: Arc<Model>,
    adapter: Box<dyn PolicyAdapter>,
    snapshot: ArcSwapOption<Snapshot>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("model", &self.model)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    /// Create an uninitialized enforcer. Call [`Enforcer::load`] before use.
    pub fn new(model: Model, adapter: impl PolicyAdapter + 'static) -> Self {
        Self {
            model: Arc::new(model),
            adapter: Box::new(adapter),
            snapshot: ArcSwapOption::empty(),
            writer: Mutex::new(()),
        }
    }

    /// Create an enforcer and perform the initial load.
    pub fn open(model: Model, adapter: impl PolicyAdapter + 'static) -> Result<Self, AuthzError> {
        let enforcer = Self::new(model, adapter);
        enforcer.load()?;
        Ok(enforcer)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot.load().is_some()
    }

    /// Generation of the published snapshot. Bumped by every committed change.
    pub fn generation(&self) -> Result<u64, AuthzError> {
        Ok(self.current()?.generation)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Initial load. Identical to [`Enforcer::reload`].
    pub fn load(&self) -> Result<LoadSummary, AuthzError> {
        self.reload()
    }

    /// Re-read every rule from the durable store and swap in a fresh
    /// snapshot. On failure the previous snapshot (or lack of one) stays.
    pub fn reload(&self) -> Result<LoadSummary, AuthzError> {
        let _guard = self.writer.lock();
        let generation = self
            .snapshot
            .load()
            .as_ref()
            .map_or(0, |s| s.generation + 1);
        let next = load_snapshot(&self.model, self.adapter.as_ref(), generation)
            .map_err(into_store_error)?;
        let summary = LoadSummary {
            policies: next.store.policy_count(),
            groupings: next.store.grouping_count(),
        };
        self.snapshot.store(Some(Arc::new(next)));
        Ok(summary)
    }

    /// Drop the published snapshot. Every call except `load`/`reload` fails
    /// with `NotReady` afterwards.
    pub fn teardown(&self) {
        let _guard = self.writer.lock();
        self.snapshot.store(None);
        tracing::info!("Enforcer torn down");
    }

    fn current(&self) -> Result<Arc<Snapshot>, AuthzError> {
        self.snapshot.load_full().ok_or(AuthzError::NotReady)
    }

    // ─── Decisions ──────────────────────────────────────────────────────

    /// Decide whether the request is allowed.
    pub fn enforce(&self, request: &Request) -> Result<bool, AuthzError> {
        let snap = self.current()?;
        let seen: MatchedEffects = self
            .matched_rules(&snap, request)
            .map(|rule| self.effect_of(rule))
            .collect();
        let allowed = combine(self.model.effect(), seen);
        tracing::trace!(
            subject = %request.subject,
            domain = %request.domain,
            object = %request.object,
            action = %request.action,
            allowed,
            "enforce"
        );
        Ok(allowed)
    }

    /// Decide and also report which rules matched, in store order.
    pub fn explain(&self, request: &Request) -> Result<Explanation, AuthzError> {
        let snap = self.current()?;
        let matched: Vec<PolicyRule> = self.matched_rules(&snap, request).cloned().collect();
        let seen: MatchedEffects = matched.iter().map(|rule| self.effect_of(rule)).collect();
        Ok(Explanation {
            allowed: combine(self.model.effect(), seen),
            matched,
        })
    }

    fn matched_rules<'a>(
        &'a self,
        snap: &'a Snapshot,
        request: &'a Request,
    ) -> impl Iterator<Item = &'a PolicyRule> + 'a {
        snap.store.policies().iter().filter(move |rule| {
            let ctx = EvalContext {
                request,
                rule,
                roles: &snap.roles,
            };
            matches(self.model.matcher(), &ctx)
        })
    }

    fn effect_of(&self, rule: &PolicyRule) -> Effect {
        if self.model.has_effect_field() {
            rule.effect
        } else {
            Effect::Allow
        }
    }

    // ─── Mutations ──────────────────────────────────────────────────────

    /// Add a policy rule. Returns `false` if a rule with the same
    /// (subject, domain, object, action) already exists.
    pub fn add_policy(&self, rule: PolicyRule) -> Result<bool, AuthzError> {
        rule.validate()?;
        self.mutate(PersistOp::Add, |snap| {
            snap.store
                .add_policy(rule.clone())
                .then(|| StoredRule::Policy(rule))
        })
    }

    /// Remove the rule with the same identity tuple, whatever its effect.
    /// Returns `false` if no such rule exists.
    pub fn remove_policy(&self, rule: &PolicyRule) -> Result<bool, AuthzError> {
        self.mutate(PersistOp::Remove, |snap| {
            snap.store.remove_policy(rule).map(StoredRule::Policy)
        })
    }

    pub fn add_grouping(&self, rule: GroupingRule) -> Result<bool, AuthzError> {
        rule.validate()?;
        self.mutate(PersistOp::Add, |snap| {
            if !snap.store.add_grouping(rule.clone()) {
                return None;
            }
            snap.roles.add_link(&rule.user, &rule.role, &rule.domain);
            Some(StoredRule::Grouping(rule))
        })
    }

    pub fn remove_grouping(&self, rule: &GroupingRule) -> Result<bool, AuthzError> {
        let domain_scoped = self.model.domain_scoped();
        self.mutate(PersistOp::Remove, |snap| {
            if !snap.store.remove_grouping(rule) {
                return None;
            }
            // Without domain scoping, edges from different domains share one link.
            let still_linked = !domain_scoped
                && snap
                    .store
                    .groupings()
                    .iter()
                    .any(|g| g.user == rule.user && g.role == rule.role);
            if !still_linked {
                snap.roles.remove_link(&rule.user, &rule.role, &rule.domain);
            }
            Some(StoredRule::Grouping(rule.clone()))
        })
    }

    /// Apply a change to a copy of the current snapshot, persist it and
    /// publish. `apply` returns `None` when the change is a no-op.
    fn mutate<F>(&self, op: PersistOp, apply: F) -> Result<bool, AuthzError>
    where
        F: FnOnce(&mut Snapshot) -> Option<StoredRule>,
    {
        let _guard = self.writer.lock();
        let current = self.current()?;
        let mut next = Snapshot::clone(&current);

        let Some(stored) = apply(&mut next) else {
            return Ok(false);
        };

        self.adapter
            .persist(&stored, op)
            .map_err(into_store_error)?;

        next.generation += 1;
        tracing::debug!(
            ?op,
            rule = %stored,
            generation = next.generation,
            "Committed policy change"
        );
        self.snapshot.store(Some(Arc::new(next)));
        Ok(true)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// All policy rules in insertion order.
    pub fn policies(&self) -> Result<Vec<PolicyRule>, AuthzError> {
        Ok(self.current()?.store.policies().to_vec())
    }

    pub fn policies_for_domain(&self, domain: &str) -> Result<Vec<PolicyRule>, AuthzError> {
        Ok(self
            .current()?
            .store
            .policies()
            .iter()
            .filter(|p| p.domain == domain)
            .cloned()
            .collect())
    }

    /// All grouping rules in insertion order.
    pub fn groupings(&self) -> Result<Vec<GroupingRule>, AuthzError> {
        Ok(self.current()?.store.groupings().to_vec())
    }

    pub fn has_policy(&self, rule: &PolicyRule) -> Result<bool, AuthzError> {
        Ok(self.current()?.store.has_policy(rule))
    }

    pub fn has_grouping(&self, rule: &GroupingRule) -> Result<bool, AuthzError> {
        Ok(self.current()?.store.has_grouping(rule))
    }

    pub fn has_link(&self, user: &str, role: &str, domain: &str) -> Result<bool, AuthzError> {
        Ok(self.current()?.roles.has_link(user, role, domain))
    }

    /// Every role `user` inherits in `domain`, directly or transitively.
    pub fn implicit_roles(&self, user: &str, domain: &str) -> Result<Vec<String>, AuthzError> {
        Ok(self.current()?.roles.implicit_roles(user, domain))
    }

    /// Policies granted to `user` directly or through an inherited role.
    /// With a domain-scoped model only rules of `domain` are returned.
    pub fn implicit_permissions(
        &self,
        user: &str,
        domain: &str,
    ) -> Result<Vec<PolicyRule>, AuthzError> {
        let snap = self.current()?;
        let roles = snap.roles.implicit_roles(user, domain);
        let domain_scoped = self.model.domain_scoped();
        Ok(snap
            .store
            .policies()
            .iter()
            .filter(|p| !domain_scoped || p.domain == domain)
            .filter(|p| p.subject == user || roles.contains(&p.subject))
            .cloned()
            .collect())
    }
}

fn into_store_error(err: AuthzError) -> AuthzError {
    match err {
        AuthzError::StoreUnavailable(_) => err,
        other => AuthzError::StoreUnavailable(other.to_string()),
    }
}

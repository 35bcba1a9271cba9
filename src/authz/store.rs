use std::collections::HashSet;

use crate::authz::types::{GroupingRule, PolicyRule, RuleKey};

/// In-memory index over policy and grouping rules.
///
/// Rules are kept in insertion order; a key set rejects a second rule with the
/// same identity tuple.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    policies: Vec<PolicyRule>,
    policy_keys: HashSet<RuleKey>,
    groupings: Vec<GroupingRule>,
    grouping_keys: HashSet<GroupingRule>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_policy(&mut self, rule: PolicyRule) -> bool {
        if !self.policy_keys.insert(rule.key()) {
            return false;
        }
        self.policies.push(rule);
        true
    }

    /// Removes the rule with the same identity tuple. Returns the stored rule,
    /// whose effect may differ from the one passed in.
    pub fn remove_policy(&mut self, rule: &PolicyRule) -> Option<PolicyRule> {
        if !self.policy_keys.remove(&rule.key()) {
            return None;
        }
        let idx = self.policies.iter().position(|p| p.same_identity(rule))?;
        Some(self.policies.remove(idx))
    }

    pub fn has_policy(&self, rule: &PolicyRule) -> bool {
        self.policy_keys.contains(&rule.key())
    }

    pub fn add_grouping(&mut self, rule: GroupingRule) -> bool {
        if !self.grouping_keys.insert(rule.clone()) {
            return false;
        }
        self.groupings.push(rule);
        true
    }

    pub fn remove_grouping(&mut self, rule: &GroupingRule) -> bool {
        if !self.grouping_keys.remove(rule) {
            return false;
        }
        self.groupings.retain(|g| g != rule);
        true
    }

    pub fn has_grouping(&self, rule: &GroupingRule) -> bool {
        self.grouping_keys.contains(rule)
    }

    pub fn policies(&self) -> &[PolicyRule] {
        &self.policies
    }

    pub fn groupings(&self) -> &[GroupingRule] {
        &self.groupings
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    pub fn grouping_count(&self) -> usize {
        self.groupings.len()
    }
}

//! Role inheritance graphs, one per domain.
//!
//! Reachability is answered with a breadth-first walk over the domain's
//! adjacency map and a visited set, so cyclic definitions are accepted and
//! every node on a cycle reaches every other.

use std::collections::{HashMap, HashSet, VecDeque};

/// Answers "does `user` is-or-inherit `role` within `domain`".
pub trait RoleLinks {
    fn has_link(&self, user: &str, role: &str, domain: &str) -> bool;
}

/// Adjacency map: node -> directly inherited roles.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    edges: HashMap<String, HashSet<String>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(&mut self, user: &str, role: &str) -> bool {
        self.edges
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string())
    }

    pub fn remove_link(&mut self, user: &str, role: &str) -> bool {
        let Some(roles) = self.edges.get_mut(user) else {
            return false;
        };
        let removed = roles.remove(role);
        if roles.is_empty() {
            self.edges.remove(user);
        }
        removed
    }

    pub fn has_link(&self, user: &str, role: &str) -> bool {
        if user == role {
            return true;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(user);
        queue.push_back(user);

        while let Some(node) = queue.pop_front() {
            let Some(next) = self.edges.get(node) else {
                continue;
            };
            for parent in next {
                if parent == role {
                    return true;
                }
                if visited.insert(parent.as_str()) {
                    queue.push_back(parent.as_str());
                }
            }
        }
        false
    }

    /// Every role reachable from `user`, excluding `user` itself unless it sits
    /// on a cycle back to itself. Sorted for stable output.
    pub fn reachable(&self, user: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(user);

        while let Some(node) = queue.pop_front() {
            let Some(next) = self.edges.get(node) else {
                continue;
            };
            for parent in next {
                if visited.insert(parent.as_str()) {
                    queue.push_back(parent.as_str());
                }
            }
        }

        let mut roles: Vec<String> = visited.into_iter().map(str::to_string).collect();
        roles.sort();
        roles
    }

    pub fn link_count(&self) -> usize {
        self.edges.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// One `RoleGraph` per domain key. When the model is not domain-scoped all
/// links live under the empty-string domain.
#[derive(Debug, Clone, Default)]
pub struct RoleManager {
    domain_scoped: bool,
    graphs: HashMap<String, RoleGraph>,
}

impl RoleManager {
    pub fn new(domain_scoped: bool) -> Self {
        Self {
            domain_scoped,
            graphs: HashMap::new(),
        }
    }

    fn domain_key<'a>(&self, domain: &'a str) -> &'a str {
        if self.domain_scoped {
            domain
        } else {
            ""
        }
    }

    pub fn add_link(&mut self, user: &str, role: &str, domain: &str) -> bool {
        let key = self.domain_key(domain).to_string();
        self.graphs.entry(key).or_default().add_link(user, role)
    }

    pub fn remove_link(&mut self, user: &str, role: &str, domain: &str) -> bool {
        let key = self.domain_key(domain);
        let Some(graph) = self.graphs.get_mut(key) else {
            return false;
        };
        let removed = graph.remove_link(user, role);
        if graph.is_empty() {
            self.graphs.remove(key);
        }
        removed
    }

    pub fn has_link(&self, user: &str, role: &str, domain: &str) -> bool {
        if user == role {
            return true;
        }
        self.graphs
            .get(self.domain_key(domain))
            .is_some_and(|g| g.has_link(user, role))
    }

    pub fn implicit_roles(&self, user: &str, domain: &str) -> Vec<String> {
        self.graphs
            .get(self.domain_key(domain))
            .map(|g| g.reachable(user))
            .unwrap_or_default()
    }

    pub fn link_count(&self) -> usize {
        self.graphs.values().map(RoleGraph::link_count).sum()
    }
}

impl RoleLinks for RoleManager {
    fn has_link(&self, user: &str, role: &str, domain: &str) -> bool {
        RoleManager::has_link(self, user, role, domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflexive() {
        let rm = RoleManager::new(true);
        assert!(rm.has_link("a", "a", "d"));
        assert!(rm.has_link("ghost", "ghost", ""));
    }

    #[test]
    fn test_transitive() {
        let mut rm = RoleManager::new(true);
        rm.add_link("a", "b", "d");
        rm.add_link("b", "c", "d");
        assert!(rm.has_link("a", "c", "d"));
        assert!(!rm.has_link("c", "a", "d"));
    }

    #[test]
    fn test_cycle_terminates_and_reaches_both_ways() {
        let mut rm = RoleManager::new(true);
        rm.add_link("a", "b", "d");
        rm.add_link("b", "a", "d");
        assert!(rm.has_link("a", "b", "d"));
        assert!(rm.has_link("b", "a", "d"));
        assert!(!rm.has_link("a", "z", "d"));
        assert_eq!(rm.implicit_roles("a", "d"), vec!["a", "b"]);
    }

    #[test]
    fn test_domains_are_disjoint() {
        let mut rm = RoleManager::new(true);
        rm.add_link("alice", "admin", "tenant-a");
        assert!(rm.has_link("alice", "admin", "tenant-a"));
        assert!(!rm.has_link("alice", "admin", "tenant-b"));
        assert!(!rm.has_link("alice", "admin", ""));
    }

    #[test]
    fn test_unscoped_manager_ignores_domain() {
        let mut rm = RoleManager::new(false);
        rm.add_link("alice", "admin", "tenant-a");
        assert!(rm.has_link("alice", "admin", ""));
        assert!(rm.has_link("alice", "admin", "tenant-b"));
    }

    #[test]
    fn test_remove_link() {
        let mut rm = RoleManager::new(false);
        assert!(rm.add_link("alice", "admin", ""));
        assert!(!rm.add_link("alice", "admin", ""));
        assert!(rm.remove_link("alice", "admin", ""));
        assert!(!rm.remove_link("alice", "admin", ""));
        assert!(!rm.has_link("alice", "admin", ""));
        assert_eq!(rm.link_count(), 0);
    }

    #[test]
    fn test_implicit_roles_sorted() {
        let mut rm = RoleManager::new(false);
        rm.add_link("alice", "editor", "");
        rm.add_link("editor", "viewer", "");
        rm.add_link("alice", "auditor", "");
        assert_eq!(
            rm.implicit_roles("alice", ""),
            vec!["auditor", "editor", "viewer"]
        );
        assert!(rm.implicit_roles("nobody", "").is_empty());
    }

    #[test]
    fn test_long_chain() {
        let mut rm = RoleManager::new(false);
        for i in 0..50 {
            rm.add_link(&format!("r{i}"), &format!("r{}", i + 1), "");
        }
        assert!(rm.has_link("r0", "r50", ""));
    }
}

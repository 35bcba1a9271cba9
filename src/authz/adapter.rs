//! Durable policy stores the enforcer loads from and persists to.

use std::path::PathBuf;
use std::sync::Arc;

use kdl::KdlDocument;
use parking_lot::Mutex;

use crate::authz::errors::AuthzError;
use crate::authz::policy::{apply_to_document, parse_document, parse_kdl_document};
use crate::authz::types::{PersistOp, PolicySet, StoredRule};

/// The durable side of the policy store.
///
/// `load_all` feeds the initial load and every reload; `persist` is called
/// once per committed mutation, before the change becomes visible. Any error
/// must be reported as `AuthzError::StoreUnavailable`.
pub trait PolicyAdapter: Send + Sync {
    fn load_all(&self) -> Result<PolicySet, AuthzError>;

    fn persist(&self, rule: &StoredRule, op: PersistOp) -> Result<(), AuthzError>;
}

impl<T: PolicyAdapter + ?Sized> PolicyAdapter for Arc<T> {
    fn load_all(&self) -> Result<PolicySet, AuthzError> {
        (**self).load_all()
    }

    fn persist(&self, rule: &StoredRule, op: PersistOp) -> Result<(), AuthzError> {
        (**self).persist(rule, op)
    }
}

/// Apply one persisted change to a rule set, keyed by rule identity.
pub(crate) fn apply_change(set: &mut PolicySet, rule: &StoredRule, op: PersistOp) {
    match (rule, op) {
        (StoredRule::Policy(p), PersistOp::Add) => {
            if !set.policies.iter().any(|q| q.same_identity(p)) {
                set.policies.push(p.clone());
            }
        }
        (StoredRule::Policy(p), PersistOp::Remove) => {
            set.policies.retain(|q| !q.same_identity(p));
        }
        (StoredRule::Grouping(g), PersistOp::Add) => {
            if !set.groupings.contains(g) {
                set.groupings.push(g.clone());
            }
        }
        (StoredRule::Grouping(g), PersistOp::Remove) => {
            set.groupings.retain(|q| q != g);
        }
    }
}

/// Keeps rules in process memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    set: Mutex<PolicySet>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(set: PolicySet) -> Self {
        Self {
            set: Mutex::new(set),
        }
    }

    /// Current durable contents.
    pub fn contents(&self) -> PolicySet {
        self.set.lock().clone()
    }

    /// Overwrite the durable contents without going through the enforcer.
    pub fn replace(&self, set: PolicySet) {
        *self.set.lock() = set;
    }
}

impl PolicyAdapter for MemoryAdapter {
    fn load_all(&self) -> Result<PolicySet, AuthzError> {
        Ok(self.set.lock().clone())
    }

    fn persist(&self, rule: &StoredRule, op: PersistOp) -> Result<(), AuthzError> {
        apply_change(&mut self.set.lock(), rule, op);
        Ok(())
    }
}

/// Stores rules in a single KDL file. A missing file is an empty store.
///
/// Writes edit the parsed document, so comments, unknown nodes and rows that
/// fail to parse survive every mutation.
#[derive(Debug)]
pub struct KdlFileAdapter {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl KdlFileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_source(&self) -> Result<Option<String>, AuthzError> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path).map(Some).map_err(|e| {
            AuthzError::StoreUnavailable(format!("cannot read `{}`: {e}", self.path.display()))
        })
    }

    fn write(&self, doc: &KdlDocument) -> Result<(), AuthzError> {
        let tmp = self.path.with_extension("kdl.tmp");
        std::fs::write(&tmp, doc.to_string())
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                AuthzError::StoreUnavailable(format!(
                    "cannot write `{}`: {e}",
                    self.path.display()
                ))
            })
    }
}

impl PolicyAdapter for KdlFileAdapter {
    fn load_all(&self) -> Result<PolicySet, AuthzError> {
        match self.read_source()? {
            Some(source) => parse_kdl_document(&source),
            None => Ok(PolicySet::default()),
        }
    }

    fn persist(&self, rule: &StoredRule, op: PersistOp) -> Result<(), AuthzError> {
        let _guard = self.write_lock.lock();
        let mut doc = match self.read_source()? {
            Some(source) => parse_document(&source)?,
            None => KdlDocument::new(),
        };
        apply_to_document(&mut doc, rule, op);
        self.write(&doc)
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use warden::authz::adapter::{MemoryAdapter, PolicyAdapter};
use warden::authz::types::{PersistOp, PolicySet, StoredRule};
use warden::authz::AuthzError;

/// An in-memory store whose reads and writes can be switched off to simulate
/// an unavailable backend.
#[derive(Debug, Default)]
pub struct FlakyAdapter {
    inner: MemoryAdapter,
    fail_load: AtomicBool,
    fail_persist: AtomicBool,
}

impl FlakyAdapter {
    pub fn new(set: PolicySet) -> Self {
        Self {
            inner: MemoryAdapter::with_rules(set),
            ..Default::default()
        }
    }

    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn contents(&self) -> PolicySet {
        self.inner.contents()
    }

    pub fn replace(&self, set: PolicySet) {
        self.inner.replace(set);
    }
}

impl PolicyAdapter for FlakyAdapter {
    fn load_all(&self) -> Result<PolicySet, AuthzError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(AuthzError::StoreUnavailable("backend offline".into()));
        }
        self.inner.load_all()
    }

    fn persist(&self, rule: &StoredRule, op: PersistOp) -> Result<(), AuthzError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(AuthzError::StoreUnavailable("backend offline".into()));
        }
        self.inner.persist(rule, op)
    }
}

/// An in-memory store whose writes wait until released, to keep a mutation
/// in flight while other requests run.
#[derive(Debug, Default)]
pub struct GatedAdapter {
    inner: MemoryAdapter,
    entered: AtomicBool,
    released: AtomicBool,
    timed_out: AtomicBool,
}

impl GatedAdapter {
    const MAX_WAIT: Duration = Duration::from_secs(2);

    /// Whether a write is currently waiting on the gate (or has passed it).
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Whether a write gave up waiting before `release` was called.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

impl PolicyAdapter for GatedAdapter {
    fn load_all(&self) -> Result<PolicySet, AuthzError> {
        self.inner.load_all()
    }

    fn persist(&self, rule: &StoredRule, op: PersistOp) -> Result<(), AuthzError> {
        self.entered.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + Self::MAX_WAIT;
        while !self.released.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                self.timed_out.store(true, Ordering::SeqCst);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.inner.persist(rule, op)
    }
}

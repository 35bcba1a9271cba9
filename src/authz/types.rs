use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::authz::errors::AuthzError;

/// Effect carried by a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(AuthzError::InvalidRule(format!(
                "unknown effect `{other}` (expected \"allow\" or \"deny\")"
            ))),
        }
    }
}

/// Identity of a policy rule: (subject, domain, object, action). The effect is
/// not part of it.
pub(crate) type RuleKey = (String, String, String, String);

/// A stored permission or denial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    /// Empty string is the global domain.
    #[serde(default)]
    pub domain: String,
    pub object: String,
    pub action: String,
    #[serde(default)]
    pub effect: Effect,
}

impl PolicyRule {
    pub fn new(subject: &str, object: &str, action: &str, effect: Effect) -> Self {
        Self {
            subject: subject.to_string(),
            domain: String::new(),
            object: object.to_string(),
            action: action.to_string(),
            effect,
        }
    }

    pub fn allow(subject: &str, object: &str, action: &str) -> Self {
        Self::new(subject, object, action, Effect::Allow)
    }

    pub fn deny(subject: &str, object: &str, action: &str) -> Self {
        Self::new(subject, object, action, Effect::Deny)
    }

    pub fn in_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub(crate) fn key(&self) -> RuleKey {
        (
            self.subject.clone(),
            self.domain.clone(),
            self.object.clone(),
            self.action.clone(),
        )
    }

    pub fn same_identity(&self, other: &PolicyRule) -> bool {
        self.subject == other.subject
            && self.domain == other.domain
            && self.object == other.object
            && self.action == other.action
    }

    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.subject.trim().is_empty()
            || self.object.trim().is_empty()
            || self.action.trim().is_empty()
        {
            return Err(AuthzError::InvalidRule(
                "subject, object and action are required".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p({}, {}, {}, {}, {})",
            self.subject, self.domain, self.object, self.action, self.effect
        )
    }
}

/// A role inheritance edge `user -> role`, scoped to `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupingRule {
    pub user: String,
    pub role: String,
    #[serde(default)]
    pub domain: String,
}

impl GroupingRule {
    pub fn new(user: &str, role: &str) -> Self {
        Self {
            user: user.to_string(),
            role: role.to_string(),
            domain: String::new(),
        }
    }

    pub fn in_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.user.trim().is_empty() || self.role.trim().is_empty() {
            return Err(AuthzError::InvalidRule("user and role are required".into()));
        }
        Ok(())
    }
}

impl fmt::Display for GroupingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g({}, {}, {})", self.user, self.role, self.domain)
    }
}

/// Everything a durable store holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySet {
    pub policies: Vec<PolicyRule>,
    pub groupings: Vec<GroupingRule>,
}

/// A rule handed to the durable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRule {
    Policy(PolicyRule),
    Grouping(GroupingRule),
}

impl fmt::Display for StoredRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredRule::Policy(rule) => fmt::Display::fmt(rule, f),
            StoredRule::Grouping(rule) => fmt::Display::fmt(rule, f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOp {
    Add,
    Remove,
}

// ---------- Decision API ----------

/// An access request. An absent domain is the empty string.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Request {
    pub subject: String,
    #[serde(default)]
    pub domain: String,
    pub object: String,
    pub action: String,
    /// Optional attributes for ABAC clauses (`r.ctx.<path>`)
    #[serde(default)]
    pub context: serde_json::Value,
}

impl Request {
    pub fn new(subject: &str, object: &str, action: &str) -> Self {
        Self {
            subject: subject.to_string(),
            domain: String::new(),
            object: object.to_string(),
            action: action.to_string(),
            context: serde_json::Value::Null,
        }
    }

    pub fn in_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
}

/// A decision together with the rules whose matcher fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub allowed: bool,
    pub matched: Vec<PolicyRule>,
}

// ---------- Management API ----------

#[derive(Debug, Deserialize)]
pub struct PolicyQuery {
    pub domain: Option<String>,
}

/// A model as served to remote enforcers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelView {
    pub request: Vec<String>,
    pub policy: Vec<String>,
    pub role_arity: Option<usize>,
    pub effect: String,
    pub matcher: String,
}

/// The model together with the policies to enforce under it.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model: ModelView,
    pub policies: Vec<PolicyRule>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Rule counts of a freshly loaded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub policies: usize,
    pub groupings: usize,
}

#![allow(dead_code)]

pub mod adapters;
pub mod http;

pub use adapters::{FlakyAdapter, GatedAdapter};
pub use http::{empty_request, json_request, read_json};

use warden::authz::types::PolicySet;
use warden::authz::{Enforcer, MemoryAdapter, Model};

/// RBAC with a direct-subject fallback and `*` as a wildcard action.
pub const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = (g(r.sub, p.sub) || r.sub == p.sub) && r.obj == p.obj \
    && (r.act == p.act || p.act == "*")
"#;

/// Tenant-scoped RBAC: roles and policies only apply inside their domain.
pub const DOMAIN_MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act, eft

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch(r.obj, p.obj) && r.act == p.act
"#;

/// RBAC plus an attribute clause over the request context.
pub const ABAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act, ctx

[policy_definition]
p = sub, obj, act, eft

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act \
    && r.ctx.time.hour >= 9 && r.ctx.time.hour < 17
"#;

pub fn model(text: &str) -> Model {
    text.parse().expect("model")
}

pub fn enforcer_with(text: &str, set: PolicySet) -> Enforcer {
    Enforcer::open(model(text), MemoryAdapter::with_rules(set)).expect("enforcer")
}

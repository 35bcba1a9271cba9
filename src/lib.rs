//! Warden - RBAC/ABAC policy enforcement engine
//!
//! The `authz` module holds the engine (model, policy store, role graph,
//! matcher, effect combinator and enforcer) plus its HTTP surface.
//! It exposes all modules for testing purposes.

pub mod authz;
pub mod settings;

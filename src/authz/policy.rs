use kdl::{KdlDocument, KdlEntry, KdlNode};

use crate::authz::errors::AuthzError;
use crate::authz::types::*;

/// Parse a KDL policy document into policy and grouping rules.
///
/// ```kdl
/// policy "alice" obj="doc1" act="read" effect="allow"
/// policy "admin" dom="tenant-a" obj="doc1" act="delete" effect="deny"
/// grouping "alice" role="admin" dom="tenant-a"
/// ```
///
/// A syntax error fails the whole document. An individual malformed row is
/// skipped with a warning so it cannot block unrelated decisions.
pub fn parse_kdl_document(source: &str) -> Result<PolicySet, AuthzError> {
    Ok(rules_in(&parse_document(source)?))
}

/// Parse the raw document, keeping every node and its formatting.
pub fn parse_document(source: &str) -> Result<KdlDocument, AuthzError> {
    source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::StoreUnavailable(format!("KDL parse error: {e}")))
}

fn rules_in(doc: &KdlDocument) -> PolicySet {
    let mut set = PolicySet::default();

    for node in doc.nodes() {
        match node.name().value() {
            "policy" => match parse_policy_node(node) {
                Ok(rule) => set.policies.push(rule),
                Err(e) => tracing::warn!(error = %e, "skipping malformed policy row"),
            },
            "grouping" => match parse_grouping_node(node) {
                Ok(rule) => set.groupings.push(rule),
                Err(e) => tracing::warn!(error = %e, "skipping malformed grouping row"),
            },
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    set
}

/// Apply one persisted change to the document in place.
///
/// An add appends a node unless a row with the same identity already parses.
/// A remove drops only the rows that parse to the same identity. Anything
/// that does not parse as a rule is left as it was.
pub fn apply_to_document(doc: &mut KdlDocument, rule: &StoredRule, op: PersistOp) {
    let same = |node: &KdlNode| match (rule, node.name().value()) {
        (StoredRule::Policy(p), "policy") => {
            parse_policy_node(node).is_ok_and(|q| q.same_identity(p))
        }
        (StoredRule::Grouping(g), "grouping") => parse_grouping_node(node).is_ok_and(|q| &q == g),
        _ => false,
    };

    match op {
        PersistOp::Add => {
            if doc.nodes().iter().any(&same) {
                return;
            }
            // A last row without a terminator would run into the appended one.
            if let Some(format) = doc.nodes_mut().last_mut().and_then(KdlNode::format_mut) {
                if format.terminator.is_empty() {
                    format.terminator = "\n".into();
                }
            }
            let mut node = match rule {
                StoredRule::Policy(p) => policy_node(p),
                StoredRule::Grouping(g) => grouping_node(g),
            };
            node.autoformat();
            doc.nodes_mut().push(node);
        }
        PersistOp::Remove => doc.nodes_mut().retain(|node| !same(node)),
    }
}

fn parse_policy_node(node: &KdlNode) -> Result<PolicyRule, AuthzError> {
    let subject = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidRule(
            "policy node requires a subject argument (e.g. policy \"alice\" obj=\"doc1\" act=\"read\")"
                .into(),
        )
    })?;
    let object = string_prop(node, "obj")
        .ok_or_else(|| AuthzError::InvalidRule(format!("policy `{subject}` missing `obj`")))?;
    let action = string_prop(node, "act")
        .ok_or_else(|| AuthzError::InvalidRule(format!("policy `{subject}` missing `act`")))?;
    let effect = match string_prop(node, "effect") {
        Some(raw) => raw.parse::<Effect>()?,
        None => Effect::Allow,
    };
    let rule = PolicyRule {
        subject,
        domain: string_prop(node, "dom").unwrap_or_default(),
        object,
        action,
        effect,
    };
    rule.validate()?;
    Ok(rule)
}

fn parse_grouping_node(node: &KdlNode) -> Result<GroupingRule, AuthzError> {
    let user = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidRule(
            "grouping node requires a user argument (e.g. grouping \"alice\" role=\"admin\")".into(),
        )
    })?;
    let role = string_prop(node, "role")
        .ok_or_else(|| AuthzError::InvalidRule(format!("grouping `{user}` missing `role`")))?;
    let rule = GroupingRule {
        user,
        role,
        domain: string_prop(node, "dom").unwrap_or_default(),
    };
    rule.validate()?;
    Ok(rule)
}

fn policy_node(rule: &PolicyRule) -> KdlNode {
    let mut node = KdlNode::new("policy");
    let entries = node.entries_mut();
    entries.push(KdlEntry::new(rule.subject.as_str()));
    if !rule.domain.is_empty() {
        entries.push(KdlEntry::new_prop("dom", rule.domain.as_str()));
    }
    entries.push(KdlEntry::new_prop("obj", rule.object.as_str()));
    entries.push(KdlEntry::new_prop("act", rule.action.as_str()));
    entries.push(KdlEntry::new_prop("effect", rule.effect.as_str()));
    node
}

fn grouping_node(rule: &GroupingRule) -> KdlNode {
    let mut node = KdlNode::new("grouping");
    let entries = node.entries_mut();
    entries.push(KdlEntry::new(rule.user.as_str()));
    entries.push(KdlEntry::new_prop("role", rule.role.as_str()));
    if !rule.domain.is_empty() {
        entries.push(KdlEntry::new_prop("dom", rule.domain.as_str()));
    }
    node
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

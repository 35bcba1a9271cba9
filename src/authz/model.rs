//! Model definition: request/policy shape, role arity, effect algebra and matcher.
//!
//! The text format is INI-like:
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act, eft
//!
//! [role_definition]
//! g = _, _
//!
//! [policy_effect]
//! e = some(where (p.eft == allow)) && !some(where (p.eft == deny))
//!
//! [matchers]
//! m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
//! ```
//!
//! A model is parsed and validated once; the matcher and effect expressions are
//! compiled into ASTs at that point and never re-parsed.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::authz::effect::{parse_effect, EffectExpr};
use crate::authz::errors::AuthzError;
use crate::authz::matcher::{parse_matcher, Expr, Schema};
use crate::authz::types::ModelView;

/// A named slot of a request or policy tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Subject,
    Domain,
    Object,
    Action,
    /// Policy only: the rule's effect.
    Effect,
    /// Request only: ABAC attribute document.
    Context,
}

impl Field {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "sub" => Some(Field::Subject),
            "dom" => Some(Field::Domain),
            "obj" => Some(Field::Object),
            "act" => Some(Field::Action),
            "eft" => Some(Field::Effect),
            "ctx" => Some(Field::Context),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Field::Subject => "sub",
            Field::Domain => "dom",
            Field::Object => "obj",
            Field::Action => "act",
            Field::Effect => "eft",
            Field::Context => "ctx",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

const REQUEST_SECTION: &str = "request_definition";
const POLICY_SECTION: &str = "policy_definition";
const ROLE_SECTION: &str = "role_definition";
const EFFECT_SECTION: &str = "policy_effect";
const MATCHER_SECTION: &str = "matchers";

/// Immutable, validated model.
#[derive(Debug, Clone)]
pub struct Model {
    request_fields: Vec<Field>,
    policy_fields: Vec<Field>,
    role_arity: Option<usize>,
    effect: EffectExpr,
    matcher: Expr,
    effect_source: String,
    matcher_source: String,
}

impl Model {
    /// Read and parse a model file.
    pub fn load(path: &Path) -> Result<Self, AuthzError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::Model(format!("cannot read model `{}`: {e}", path.display()))
        })?;
        let model: Model = text.parse()?;
        tracing::info!(
            path = %path.display(),
            domain_scoped = model.domain_scoped(),
            "Loaded authorization model"
        );
        Ok(model)
    }

    /// Whether role links are partitioned by domain.
    pub fn domain_scoped(&self) -> bool {
        self.role_arity == Some(3)
    }

    /// Whether stored effects take part in combination. Without an `eft`
    /// field every matched rule counts as `allow`.
    pub fn has_effect_field(&self) -> bool {
        self.policy_fields.contains(&Field::Effect)
    }

    pub fn matcher(&self) -> &Expr {
        &self.matcher
    }

    pub fn effect(&self) -> &EffectExpr {
        &self.effect
    }

    /// Field lists and expression sources, as handed to remote enforcers.
    /// `role_arity` is 2 for `g = _, _` and 3 for `g = _, _, _`.
    pub fn view(&self) -> ModelView {
        let tokens = |fields: &[Field]| -> Vec<String> {
            fields.iter().map(|f| f.token().to_string()).collect()
        };
        ModelView {
            request: tokens(&self.request_fields),
            policy: tokens(&self.policy_fields),
            role_arity: self.role_arity,
            effect: self.effect_source.clone(),
            matcher: self.matcher_source.clone(),
        }
    }
}

impl FromStr for Model {
    type Err = AuthzError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let sections = parse_sections(text)?;

        let request_fields = parse_fields(
            section_value(&sections, REQUEST_SECTION, "r")?,
            REQUEST_SECTION,
            &[Field::Subject, Field::Domain, Field::Object, Field::Action, Field::Context],
        )?;
        let policy_fields = parse_fields(
            section_value(&sections, POLICY_SECTION, "p")?,
            POLICY_SECTION,
            &[Field::Subject, Field::Domain, Field::Object, Field::Action, Field::Effect],
        )?;

        let role_arity = match sections.get(ROLE_SECTION) {
            None => None,
            Some(_) => Some(parse_role_arity(section_value(&sections, ROLE_SECTION, "g")?)?),
        };

        let effect_source = section_value(&sections, EFFECT_SECTION, "e")?.to_string();
        let effect = parse_effect(&effect_source).map_err(|e| in_section(e, EFFECT_SECTION))?;

        let matcher_source = section_value(&sections, MATCHER_SECTION, "m")?.to_string();
        let matcher = parse_matcher(
            &matcher_source,
            Schema {
                request: &request_fields,
                policy: &policy_fields,
                role_arity,
            },
        )
        .map_err(|e| in_section(e, MATCHER_SECTION))?;

        Ok(Model {
            request_fields,
            policy_fields,
            role_arity,
            effect,
            matcher,
            effect_source,
            matcher_source,
        })
    }
}

/// Expression errors found while loading a model are model errors.
fn in_section(err: AuthzError, section: &str) -> AuthzError {
    match err {
        AuthzError::InvalidExpression(msg) => AuthzError::Model(format!("[{section}] {msg}")),
        other => other,
    }
}

type Sections = HashMap<String, HashMap<String, String>>;

/// Split the text into `[section]` -> key -> value, joining `\` continuations.
fn parse_sections(text: &str) -> Result<Sections, AuthzError> {
    let mut sections: Sections = HashMap::new();
    let mut current: Option<String> = None;
    let mut pending = String::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped.trim_end());
            pending.push(' ');
            continue;
        }
        let line = if pending.is_empty() {
            line.to_string()
        } else {
            let joined = format!("{pending}{line}");
            pending.clear();
            joined
        };

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            if sections.contains_key(&name) {
                return Err(AuthzError::Model(format!("duplicate section [{name}]")));
            }
            sections.insert(name.clone(), HashMap::new());
            current = Some(name);
            continue;
        }

        let section = current.as_ref().ok_or_else(|| {
            AuthzError::Model(format!("line {}: entry outside of any section", lineno + 1))
        })?;
        let (key, value) = line.split_once('=').ok_or_else(|| {
            AuthzError::Model(format!("line {}: expected `key = value`", lineno + 1))
        })?;
        if let Some(entries) = sections.get_mut(section) {
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    if !pending.is_empty() {
        return Err(AuthzError::Model("dangling line continuation at end of model".into()));
    }
    Ok(sections)
}

fn section_value<'a>(sections: &'a Sections, section: &str, key: &str) -> Result<&'a str, AuthzError> {
    let entries = sections
        .get(section)
        .ok_or_else(|| AuthzError::Model(format!("missing section [{section}]")))?;
    entries
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthzError::Model(format!("section [{section}] must define `{key}`")))
}

fn parse_fields(value: &str, section: &str, allowed: &[Field]) -> Result<Vec<Field>, AuthzError> {
    let mut fields = Vec::new();
    for token in value.split(',').map(str::trim) {
        let field = Field::from_token(token)
            .filter(|f| allowed.contains(f))
            .ok_or_else(|| AuthzError::Model(format!("[{section}] unknown field `{token}`")))?;
        if fields.contains(&field) {
            return Err(AuthzError::Model(format!("[{section}] duplicate field `{token}`")));
        }
        fields.push(field);
    }
    for required in [Field::Subject, Field::Object, Field::Action] {
        if !fields.contains(&required) {
            return Err(AuthzError::Model(format!(
                "[{section}] must declare `{required}`"
            )));
        }
    }
    Ok(fields)
}

fn parse_role_arity(value: &str) -> Result<usize, AuthzError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.iter().any(|p| *p != "_") {
        return Err(AuthzError::Model(format!(
            "[{ROLE_SECTION}] expected `_, _` or `_, _, _`, got `{value}`"
        )));
    }
    match parts.len() {
        2 | 3 => Ok(parts.len()),
        n => Err(AuthzError::Model(format!(
            "[{ROLE_SECTION}] role links take 2 or 3 slots, got {n}"
        ))),
    }
}

//! Matcher expressions: parsed once per model, evaluated per policy row.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!` (short-circuiting, left to right)
//! - Membership: `x in list`
//! - Field references: `r.sub`, `p.obj`, and context paths such as `r.ctx.department`
//! - Role links: `g(r.sub, p.sub)` or `g(r.sub, p.sub, r.dom)`
//! - Wildcards: `keyMatch(r.obj, p.obj)` where `*` in the pattern matches any suffix
//! - Literals: integers, floats, `"strings"`, `true`, `false`
//! - Parentheses for grouping
//!
//! Evaluation never fails. Type mismatches, missing context paths and
//! non-string role-link arguments evaluate to `false`. A miss is an ordinary
//! `false`, so `!(r.ctx.blocked == true)` holds for a request without that
//! attribute. Write `r.ctx.blocked == false` to require it to be present.

use serde_json::Value as JsonValue;

use crate::authz::errors::AuthzError;
use crate::authz::model::Field;
use crate::authz::roles::RoleLinks;
use crate::authz::types::{PolicyRule, Request};

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LitValue),
    /// `r.<field>` or `p.<field>`
    Field { source: Source, field: Field },
    /// `r.ctx.<path>`
    Context(Vec<String>),
    /// `g(user, role[, domain])`
    RoleLink(Vec<Expr>),
    Call {
        func: Builtin,
        args: Vec<Expr>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryNot(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Request,
    Policy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    KeyMatch,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "keyMatch" => Some(Builtin::KeyMatch),
            _ => None,
        }
    }

    fn arity(&self) -> usize {
        match self {
            Builtin::KeyMatch => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LitValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

/// What a matcher may reference. Built from the model's definitions.
#[derive(Debug, Clone, Copy)]
pub struct Schema<'a> {
    pub request: &'a [Field],
    pub policy: &'a [Field],
    /// Number of arguments `g(...)` takes, if the model defines roles.
    pub role_arity: Option<usize>,
}

// ─── Tokenizer ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Dot,
    Comma,
    LParen,
    RParen,
    Eq,  // ==
    Ne,  // !=
    Gt,  // >
    Lt,  // <
    Ge,  // >=
    Le,  // <=
    And, // &&
    Or,  // ||
    Not, // !
    In,  // in
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, AuthzError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if i + 1 < chars.len() && chars[i + 1] == '=' => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(AuthzError::InvalidExpression(
                        "unterminated string literal".into(),
                    ));
                }
                tokens.push(Token::Str(s));
                i += 1; // closing quote
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                if num_str.contains('.') {
                    let f: f64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidExpression(format!("invalid float `{num_str}`"))
                    })?;
                    tokens.push(Token::Float(f));
                } else {
                    let n: i64 = num_str.parse().map_err(|_| {
                        AuthzError::InvalidExpression(format!("invalid integer `{num_str}`"))
                    })?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            c => {
                return Err(AuthzError::InvalidExpression(format!(
                    "unexpected character `{c}`"
                )));
            }
        }
    }
    Ok(tokens)
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser<'s> {
    tokens: Vec<Token>,
    pos: usize,
    schema: Schema<'s>,
}

impl<'s> Parser<'s> {
    fn new(tokens: Vec<Token>, schema: Schema<'s>) -> Self {
        Self {
            tokens,
            pos: 0,
            schema,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect_rparen(&mut self) -> Result<(), AuthzError> {
        if self.advance() != Some(Token::RParen) {
            return Err(AuthzError::InvalidExpression(
                "expected closing parenthesis `)`".into(),
            ));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, AuthzError> {
        self.parse_or()
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, AuthzError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// comparison = unary (("==" | "!=" | ">" | "<" | ">=" | "<=" | "in") unary)?
    fn parse_comparison(&mut self) -> Result<Expr, AuthzError> {
        let left = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::Le) => BinOp::Le,
            Some(Token::In) => {
                self.advance();
                let right = self.parse_unary()?;
                return Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, AuthzError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::UnaryNot(Box::new(expr)));
        }
        self.parse_primary()
    }

    /// primary = literal | field | call | "(" expr ")"
    fn parse_primary(&mut self) -> Result<Expr, AuthzError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(LitValue::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(LitValue::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(LitValue::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(LitValue::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(LitValue::Bool(false))),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    return self.resolve_call(&name, args);
                }
                let mut path = vec![name];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => {
                            return Err(AuthzError::InvalidExpression(
                                "expected identifier after `.`".into(),
                            ));
                        }
                    }
                }
                self.resolve_path(path)
            }
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            other => Err(AuthzError::InvalidExpression(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }

    /// args = expr ("," expr)* ")"
    fn parse_args(&mut self) -> Result<Vec<Expr>, AuthzError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => {
                    return Err(AuthzError::InvalidExpression(
                        "expected `,` or `)` in argument list".into(),
                    ));
                }
            }
        }
    }

    fn resolve_call(&self, name: &str, args: Vec<Expr>) -> Result<Expr, AuthzError> {
        if name == "g" {
            let arity = self.schema.role_arity.ok_or_else(|| {
                AuthzError::Model("matcher calls `g` but the model has no [role_definition]".into())
            })?;
            if args.len() != arity {
                return Err(AuthzError::Model(format!(
                    "`g` takes {arity} arguments, matcher passes {}",
                    args.len()
                )));
            }
            return Ok(Expr::RoleLink(args));
        }
        let func = Builtin::lookup(name)
            .ok_or_else(|| AuthzError::Model(format!("unknown function `{name}`")))?;
        if args.len() != func.arity() {
            return Err(AuthzError::Model(format!(
                "`{name}` takes {} arguments, matcher passes {}",
                func.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call { func, args })
    }

    fn resolve_path(&self, path: Vec<String>) -> Result<Expr, AuthzError> {
        let (source, declared) = match path[0].as_str() {
            "r" => (Source::Request, self.schema.request),
            "p" => (Source::Policy, self.schema.policy),
            other => {
                return Err(AuthzError::Model(format!(
                    "unknown identifier `{other}` (fields are referenced as r.<field> or p.<field>)"
                )));
            }
        };
        let joined = path.join(".");
        let name = path
            .get(1)
            .ok_or_else(|| AuthzError::Model(format!("`{joined}` does not name a field")))?;
        let field = Field::from_token(name)
            .filter(|f| declared.contains(f))
            .ok_or_else(|| AuthzError::Model(format!("`{joined}` references an undeclared field")))?;

        if field == Field::Context {
            return Ok(Expr::Context(path[2..].to_vec()));
        }
        if path.len() > 2 {
            return Err(AuthzError::Model(format!(
                "`{joined}`: only r.ctx supports nested paths"
            )));
        }
        Ok(Expr::Field { source, field })
    }
}

/// Parse a matcher string into an AST, checking every reference against `schema`.
pub fn parse_matcher(input: &str, schema: Schema<'_>) -> Result<Expr, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AuthzError::InvalidExpression("empty expression".into()));
    }
    let mut parser = Parser::new(tokens, schema);
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(AuthzError::InvalidExpression(format!(
            "unexpected trailing token: {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// Everything one matcher evaluation can see.
pub struct EvalContext<'a> {
    pub request: &'a Request,
    pub rule: &'a PolicyRule,
    pub roles: &'a dyn RoleLinks,
}

/// Evaluate the matcher for one request/rule pair.
pub fn matches(expr: &Expr, ctx: &EvalContext<'_>) -> bool {
    eval_value(expr, ctx).is_true()
}

#[derive(Debug, Clone)]
enum Value<'a> {
    Int(i64),
    Float(f64),
    Str(&'a str),
    Bool(bool),
    Array(Vec<Value<'a>>),
    Null,
}

impl Value<'_> {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

fn request_field<'a>(request: &'a Request, field: Field) -> Value<'a> {
    match field {
        Field::Subject => Value::Str(&request.subject),
        Field::Domain => Value::Str(&request.domain),
        Field::Object => Value::Str(&request.object),
        Field::Action => Value::Str(&request.action),
        Field::Effect | Field::Context => Value::Null,
    }
}

fn policy_field<'a>(rule: &'a PolicyRule, field: Field) -> Value<'a> {
    match field {
        Field::Subject => Value::Str(&rule.subject),
        Field::Domain => Value::Str(&rule.domain),
        Field::Object => Value::Str(&rule.object),
        Field::Action => Value::Str(&rule.action),
        Field::Effect => Value::Str(rule.effect.as_str()),
        Field::Context => Value::Null,
    }
}

fn eval_value<'a>(expr: &'a Expr, ctx: &EvalContext<'a>) -> Value<'a> {
    match expr {
        Expr::Literal(lit) => match lit {
            LitValue::Int(n) => Value::Int(*n),
            LitValue::Float(f) => Value::Float(*f),
            LitValue::Str(s) => Value::Str(s),
            LitValue::Bool(b) => Value::Bool(*b),
        },
        Expr::Field { source, field } => match source {
            Source::Request => request_field(ctx.request, *field),
            Source::Policy => policy_field(ctx.rule, *field),
        },
        Expr::Context(segments) => {
            let mut current = &ctx.request.context;
            for seg in segments {
                match current.get(seg) {
                    Some(next) => current = next,
                    None => return Value::Null,
                }
            }
            json_to_value(current)
        }
        Expr::RoleLink(args) => {
            let mut names = Vec::with_capacity(args.len());
            for arg in args {
                match eval_value(arg, ctx) {
                    Value::Str(s) => names.push(s),
                    _ => return Value::Bool(false),
                }
            }
            let domain = names.get(2).copied().unwrap_or("");
            Value::Bool(ctx.roles.has_link(names[0], names[1], domain))
        }
        Expr::Call { func, args } => match func {
            Builtin::KeyMatch => match (eval_value(&args[0], ctx), eval_value(&args[1], ctx)) {
                (Value::Str(key), Value::Str(pattern)) => Value::Bool(key_match(key, pattern)),
                _ => Value::Bool(false),
            },
        },
        Expr::UnaryNot(inner) => match eval_value(inner, ctx) {
            Value::Bool(b) => Value::Bool(!b),
            _ => Value::Bool(false),
        },
        Expr::In {
            element,
            collection,
        } => {
            let elem = eval_value(element, ctx);
            match eval_value(collection, ctx) {
                Value::Array(items) => Value::Bool(items.contains(&elem)),
                _ => Value::Bool(false),
            }
        }
        Expr::BinOp { op, left, right } => match op {
            BinOp::And => Value::Bool(eval_value(left, ctx).is_true() && eval_value(right, ctx).is_true()),
            BinOp::Or => Value::Bool(eval_value(left, ctx).is_true() || eval_value(right, ctx).is_true()),
            BinOp::Eq | BinOp::Ne => {
                let l = eval_value(left, ctx);
                let r = eval_value(right, ctx);
                if matches!(l, Value::Null) || matches!(r, Value::Null) {
                    return Value::Bool(false);
                }
                if *op == BinOp::Eq {
                    Value::Bool(l == r)
                } else {
                    Value::Bool(l != r)
                }
            }
            BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
                let (Some(lf), Some(rf)) = (
                    eval_value(left, ctx).as_f64(),
                    eval_value(right, ctx).as_f64(),
                ) else {
                    return Value::Bool(false);
                };
                Value::Bool(match op {
                    BinOp::Gt => lf > rf,
                    BinOp::Lt => lf < rf,
                    BinOp::Ge => lf >= rf,
                    _ => lf <= rf,
                })
            }
        },
    }
}

fn json_to_value(value: &JsonValue) -> Value<'_> {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::Null
            }
        }
        JsonValue::String(s) => Value::Str(s),
        JsonValue::Array(arr) => Value::Array(arr.iter().map(json_to_value).collect()),
        JsonValue::Object(_) => Value::Null, // objects not directly comparable
    }
}

/// `pattern` without `*` must equal `key`; otherwise everything up to the
/// first `*` must be a prefix of `key`.
pub fn key_match(key: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        None => key == pattern,
        Some(idx) => key.starts_with(&pattern[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::roles::RoleManager;
    use serde_json::json;
    use std::cell::Cell;

    const REQUEST: &[Field] = &[Field::Subject, Field::Object, Field::Action, Field::Context];
    const POLICY: &[Field] = &[Field::Subject, Field::Object, Field::Action, Field::Effect];

    fn schema() -> Schema<'static> {
        Schema {
            request: REQUEST,
            policy: POLICY,
            role_arity: Some(2),
        }
    }

    fn eval(src: &str, request: &Request, rule: &PolicyRule, roles: &dyn RoleLinks) -> bool {
        let expr = parse_matcher(src, schema()).unwrap();
        matches(
            &expr,
            &EvalContext {
                request,
                rule,
                roles,
            },
        )
    }

    struct CountingRoles {
        calls: Cell<usize>,
        answer: bool,
    }

    impl RoleLinks for CountingRoles {
        fn has_link(&self, _user: &str, _role: &str, _domain: &str) -> bool {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
    }

    #[test]
    fn test_parse_field_comparison() {
        let expr = parse_matcher("r.sub == p.sub", schema()).unwrap();
        assert_eq!(
            expr,
            Expr::BinOp {
                op: BinOp::Eq,
                left: Box::new(Expr::Field {
                    source: Source::Request,
                    field: Field::Subject
                }),
                right: Box::new(Expr::Field {
                    source: Source::Policy,
                    field: Field::Subject
                }),
            }
        );
    }

    #[test]
    fn test_parse_role_link() {
        let expr = parse_matcher("g(r.sub, p.sub)", schema()).unwrap();
        match expr {
            Expr::RoleLink(args) => assert_eq!(args.len(), 2),
            _ => panic!("expected RoleLink"),
        }
    }

    #[test]
    fn test_parse_context_path() {
        let expr = parse_matcher(r#"r.ctx.user.department == "finance""#, schema()).unwrap();
        match expr {
            Expr::BinOp { left, .. } => {
                assert_eq!(*left, Expr::Context(vec!["user".into(), "department".into()]))
            }
            _ => panic!("expected BinOp"),
        }
    }

    #[test]
    fn test_precedence_and_binds_tighter() {
        let expr = parse_matcher("r.sub == p.sub || r.obj == p.obj && r.act == p.act", schema())
            .unwrap();
        match expr {
            Expr::BinOp { op: BinOp::Or, right, .. } => match *right {
                Expr::BinOp { op: BinOp::And, .. } => {}
                _ => panic!("expected And on the right"),
            },
            _ => panic!("expected Or"),
        }
    }

    #[test]
    fn test_undeclared_field_is_model_error() {
        let err = parse_matcher("r.dom == p.dom", schema()).unwrap_err();
        assert!(matches!(err, AuthzError::Model(_)));
        let err = parse_matcher("p.ctx.x == 1", schema()).unwrap_err();
        assert!(matches!(err, AuthzError::Model(_)));
        let err = parse_matcher("q.sub == p.sub", schema()).unwrap_err();
        assert!(matches!(err, AuthzError::Model(_)));
    }

    #[test]
    fn test_role_link_arity_checked() {
        let err = parse_matcher("g(r.sub, p.sub, r.obj)", schema()).unwrap_err();
        assert!(matches!(err, AuthzError::Model(_)));
        let no_roles = Schema {
            role_arity: None,
            ..schema()
        };
        assert!(matches!(
            parse_matcher("g(r.sub, p.sub)", no_roles).unwrap_err(),
            AuthzError::Model(_)
        ));
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_matcher("regexMatch(r.obj, p.obj)", schema()).unwrap_err();
        assert!(matches!(err, AuthzError::Model(_)));
    }

    #[test]
    fn test_malformed_expressions() {
        assert!(matches!(
            parse_matcher("", schema()).unwrap_err(),
            AuthzError::InvalidExpression(_)
        ));
        assert!(matches!(
            parse_matcher("(r.sub == p.sub", schema()).unwrap_err(),
            AuthzError::InvalidExpression(_)
        ));
        assert!(matches!(
            parse_matcher("r.sub == p.sub p.obj", schema()).unwrap_err(),
            AuthzError::InvalidExpression(_)
        ));
        assert!(matches!(
            parse_matcher(r#"r.sub == "open"#, schema()).unwrap_err(),
            AuthzError::InvalidExpression(_)
        ));
    }

    #[test]
    fn test_evaluate_direct_match() {
        let roles = RoleManager::new(false);
        let rule = PolicyRule::allow("alice", "doc1", "read");
        let src = "r.sub == p.sub && r.obj == p.obj && r.act == p.act";
        assert!(eval(src, &Request::new("alice", "doc1", "read"), &rule, &roles));
        assert!(!eval(src, &Request::new("bob", "doc1", "read"), &rule, &roles));
    }

    #[test]
    fn test_evaluate_role_link() {
        let mut roles = RoleManager::new(false);
        roles.add_link("alice", "admin", "");
        let rule = PolicyRule::allow("admin", "doc1", "read");
        let src = "g(r.sub, p.sub) && r.obj == p.obj";
        assert!(eval(src, &Request::new("alice", "doc1", "read"), &rule, &roles));
        assert!(!eval(src, &Request::new("bob", "doc1", "read"), &rule, &roles));
    }

    #[test]
    fn test_and_short_circuits_role_lookup() {
        let roles = CountingRoles {
            calls: Cell::new(0),
            answer: true,
        };
        let rule = PolicyRule::allow("admin", "doc1", "read");
        let req = Request::new("alice", "doc2", "read");
        assert!(!eval("r.obj == p.obj && g(r.sub, p.sub)", &req, &rule, &roles));
        assert_eq!(roles.calls.get(), 0);
    }

    #[test]
    fn test_or_fallback_fires_one_lookup() {
        let roles = CountingRoles {
            calls: Cell::new(0),
            answer: true,
        };
        let rule = PolicyRule::allow("admin", "doc1", "read");
        let req = Request::new("alice", "doc1", "read");
        let src = "g(r.sub, p.sub) && r.obj == p.obj || r.sub == p.sub && r.obj == p.obj && g(p.sub, r.sub)";
        assert!(eval(src, &req, &rule, &roles));
        assert_eq!(roles.calls.get(), 1);
    }

    #[test]
    fn test_wildcard_via_literal_and_key_match() {
        let roles = RoleManager::new(false);
        let rule = PolicyRule::allow("admin", "docs/*", "*");
        let req = Request::new("admin", "docs/report", "delete");
        assert!(eval(
            r#"r.sub == p.sub && keyMatch(r.obj, p.obj) && (p.act == "*" || r.act == p.act)"#,
            &req,
            &rule,
            &roles
        ));
        assert!(!eval("r.act == p.act", &req, &rule, &roles));
    }

    #[test]
    fn test_key_match() {
        assert!(key_match("docs/a", "docs/*"));
        assert!(key_match("anything", "*"));
        assert!(key_match("docs", "docs"));
        assert!(!key_match("doc", "docs/*"));
        assert!(!key_match("docs/a", "docs"));
    }

    #[test]
    fn test_context_attributes() {
        let roles = RoleManager::new(false);
        let rule = PolicyRule::allow("alice", "doc1", "read");
        let src = r#"r.ctx.department == "finance" && r.ctx.hour >= 9 && r.ctx.ip in r.ctx.allowed"#;
        let req = Request::new("alice", "doc1", "read").with_context(json!({
            "department": "finance",
            "hour": 10,
            "ip": "10.0.0.1",
            "allowed": ["10.0.0.1", "10.0.0.2"]
        }));
        assert!(eval(src, &req, &rule, &roles));

        let late = Request::new("alice", "doc1", "read").with_context(json!({
            "department": "finance",
            "hour": 7,
            "ip": "10.0.0.1",
            "allowed": ["10.0.0.1"]
        }));
        assert!(!eval(src, &late, &rule, &roles));
    }

    #[test]
    fn test_runtime_misses_are_false() {
        let roles = RoleManager::new(false);
        let rule = PolicyRule::allow("alice", "doc1", "read");
        let req = Request::new("alice", "doc1", "read");
        assert!(!eval(r#"r.ctx.department == "finance""#, &req, &rule, &roles));
        assert!(!eval(r#"r.ctx.department != "finance""#, &req, &rule, &roles));
        assert!(!eval("r.ctx.hour > 3", &req, &rule, &roles));
        assert!(!eval("r.sub in r.ctx.list", &req, &rule, &roles));
        assert!(!eval("!r.sub", &req, &rule, &roles));
        assert!(!eval("g(r.ctx.user, p.sub)", &req, &rule, &roles));
    }

    #[test]
    fn test_negated_miss_is_true() {
        let roles = RoleManager::new(false);
        let rule = PolicyRule::allow("alice", "doc1", "read");
        let bare = Request::new("alice", "doc1", "read");
        assert!(eval("!(r.ctx.blocked == true)", &bare, &rule, &roles));
        assert!(!eval("r.ctx.blocked == false", &bare, &rule, &roles));

        let flagged = bare.clone().with_context(json!({ "blocked": true }));
        assert!(!eval("!(r.ctx.blocked == true)", &flagged, &rule, &roles));
        let cleared = bare.with_context(json!({ "blocked": false }));
        assert!(eval("r.ctx.blocked == false", &cleared, &rule, &roles));
    }

    #[test]
    fn test_effect_field_readable() {
        let roles = RoleManager::new(false);
        let rule = PolicyRule::deny("alice", "doc1", "read");
        assert!(eval(
            r#"p.eft == "deny""#,
            &Request::new("alice", "doc1", "read"),
            &rule,
            &roles
        ));
    }
}

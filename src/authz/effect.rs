//! Effect algebra: folds the effects of matched rules into one decision.
//!
//! The expression is built from quantifiers over the matched set,
//! `some(where (p.eft == allow))` and `some(where (p.eft == deny))`, combined
//! with `!`, `&&`, `||` and parentheses. Quantifiers only ask whether an effect
//! occurs in the matched set, so the result never depends on row order.

use crate::authz::errors::AuthzError;
use crate::authz::matcher::{tokenize, Token};
use crate::authz::types::Effect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectExpr {
    /// `some(where (p.eft == <effect>))`
    Some(Effect),
    Not(Box<EffectExpr>),
    And(Box<EffectExpr>, Box<EffectExpr>),
    Or(Box<EffectExpr>, Box<EffectExpr>),
}

impl EffectExpr {
    fn eval(&self, seen: &MatchedEffects) -> bool {
        match self {
            EffectExpr::Some(Effect::Allow) => seen.allow,
            EffectExpr::Some(Effect::Deny) => seen.deny,
            EffectExpr::Not(inner) => !inner.eval(seen),
            EffectExpr::And(l, r) => l.eval(seen) && r.eval(seen),
            EffectExpr::Or(l, r) => l.eval(seen) || r.eval(seen),
        }
    }
}

/// Which effects occur among the matched rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchedEffects {
    pub allow: bool,
    pub deny: bool,
}

impl MatchedEffects {
    pub fn record(&mut self, effect: Effect) {
        match effect {
            Effect::Allow => self.allow = true,
            Effect::Deny => self.deny = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.allow && !self.deny
    }
}

impl FromIterator<Effect> for MatchedEffects {
    fn from_iter<I: IntoIterator<Item = Effect>>(iter: I) -> Self {
        let mut seen = MatchedEffects::default();
        for effect in iter {
            seen.record(effect);
        }
        seen
    }
}

/// Combine matched effects. An empty matched set is always a denial.
pub fn combine(expr: &EffectExpr, seen: MatchedEffects) -> bool {
    if seen.is_empty() {
        return false;
    }
    expr.eval(&seen)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), AuthzError> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(AuthzError::Model(format!(
                "policy effect: expected {what}, got {other:?}"
            ))),
        }
    }

    fn expect_ident(&mut self, name: &str) -> Result<(), AuthzError> {
        self.expect(Token::Ident(name.to_string()), &format!("`{name}`"))
    }

    fn parse_or(&mut self) -> Result<EffectExpr, AuthzError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = EffectExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<EffectExpr, AuthzError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = EffectExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<EffectExpr, AuthzError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(EffectExpr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    /// primary = "(" or ")" | "some" "(" "where" "(" "p" "." "eft" "==" effect ")" ")"
    fn parse_primary(&mut self) -> Result<EffectExpr, AuthzError> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let inner = self.parse_or()?;
            self.expect(Token::RParen, "`)`")?;
            return Ok(inner);
        }
        self.expect_ident("some")?;
        self.expect(Token::LParen, "`(`")?;
        self.expect_ident("where")?;
        self.expect(Token::LParen, "`(`")?;
        self.expect_ident("p")?;
        self.expect(Token::Dot, "`.`")?;
        self.expect_ident("eft")?;
        self.expect(Token::Eq, "`==`")?;
        let effect = match self.advance() {
            Some(Token::Ident(name)) | Some(Token::Str(name)) => name.parse::<Effect>().map_err(
                |_| AuthzError::Model(format!("policy effect: unknown effect `{name}`")),
            )?,
            other => {
                return Err(AuthzError::Model(format!(
                    "policy effect: expected `allow` or `deny`, got {other:?}"
                )));
            }
        };
        self.expect(Token::RParen, "`)`")?;
        self.expect(Token::RParen, "`)`")?;
        Ok(EffectExpr::Some(effect))
    }
}

/// Parse a `[policy_effect]` expression.
pub fn parse_effect(input: &str) -> Result<EffectExpr, AuthzError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(AuthzError::Model("policy effect is empty".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(AuthzError::Model(format!(
            "policy effect: unexpected trailing token {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(expr)
}

//! Expression evaluation at the seam between templates and values.
//!
//! The engine only ever calls the two [`Evaluator`] operations: boolean
//! evaluation (field and variant conditions) and size evaluation (widths,
//! counts, derived fields). Nothing in the core hard-codes expression
//! syntax; [`BasicEvaluator`] is the bundled reference implementation, a
//! precedence-climbing parser over dotted paths, `#variables`, integer and
//! string literals, arithmetic, comparisons, and boolean connectives.

use std::collections::BTreeMap;

use crate::errors::{Error, Result};
use crate::value::{Message, Value};

/// Named variables scoped to one decode or encode call (`#prefix` and
/// friends). Set and cleared at well-defined points by the engine.
#[derive(Debug, Default)]
pub struct Context {
    vars: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `#name` to a value. The leading `#` is not part of the key.
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn remove_var(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

/// External expression interpreter, seen by the core as a black box.
pub trait Evaluator: Send + Sync {
    /// Evaluates a condition against the root message. An empty expression
    /// is true.
    fn evaluate_bool(&self, expr: &str, root: &Message, ctx: &Context) -> Result<bool>;

    /// Evaluates a size expression to a non-negative integer. An empty
    /// expression yields the `-1` sentinel meaning "unspecified". A pure
    /// decimal literal short-circuits the parser.
    fn evaluate_size(&self, expr: &str, root: &Message, ctx: &Context) -> Result<i64>;
}

/// What an expression reduces to.
#[derive(Debug, Clone, PartialEq)]
enum Evaluated {
    Int(i128),
    Str(String),
    Bool(bool),
}

impl Evaluated {
    fn kind(&self) -> &'static str {
        match self {
            Evaluated::Int(_) => "integer",
            Evaluated::Str(_) => "string",
            Evaluated::Bool(_) => "boolean",
        }
    }
}

/// Reference evaluator: small, total, and deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicEvaluator;

impl Evaluator for BasicEvaluator {
    fn evaluate_bool(&self, expr: &str, root: &Message, ctx: &Context) -> Result<bool> {
        if expr.trim().is_empty() {
            return Ok(true);
        }

        match Parser::evaluate(expr, root, ctx)? {
            Evaluated::Bool(b) => Ok(b),
            other => Err(Error::expression(
                expr,
                format!("expected a boolean, got {}", other.kind()),
            )),
        }
    }

    fn evaluate_size(&self, expr: &str, root: &Message, ctx: &Context) -> Result<i64> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(-1);
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<i64>()
                .map_err(|_| Error::expression(expr, "integer literal out of range"));
        }

        match Parser::evaluate(trimmed, root, ctx)? {
            Evaluated::Int(v) if v >= 0 => i64::try_from(v)
                .map_err(|_| Error::expression(expr, "size out of range")),
            Evaluated::Int(v) => Err(Error::expression(expr, format!("negative size {v}"))),
            other => Err(Error::expression(
                expr,
                format!("expected an integer, got {}", other.kind()),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i128),
    Str(String),
    Var(String),
    Path(Vec<String>),
    True,
    False,
    LParen,
    RParen,
    Not,
    Neg,
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

struct Parser<'a> {
    expr: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    root: &'a Message,
    ctx: &'a Context,
}

impl<'a> Parser<'a> {
    fn evaluate(expr: &'a str, root: &'a Message, ctx: &'a Context) -> Result<Evaluated> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            expr,
            tokens,
            pos: 0,
            root,
            ctx,
        };
        let value = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::expression(expr, "trailing tokens"));
        }

        Ok(value)
    }

    fn err(&self, reason: impl Into<String>) -> Error {
        Error::expression(self.expr, reason)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Evaluated> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            lhs = Evaluated::Bool(self.truthy(lhs)? || self.truthy(rhs)?);
        }

        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Evaluated> {
        let mut lhs = self.cmp_expr()?;
        while self.eat(&Token::And) {
            let rhs = self.cmp_expr()?;
            lhs = Evaluated::Bool(self.truthy(lhs)? && self.truthy(rhs)?);
        }

        Ok(lhs)
    }

    fn cmp_expr(&mut self) -> Result<Evaluated> {
        let lhs = self.add_expr()?;
        let op = match self.peek() {
            Some(Token::Eq) => Token::Eq,
            Some(Token::Ne) => Token::Ne,
            Some(Token::Lt) => Token::Lt,
            Some(Token::Le) => Token::Le,
            Some(Token::Gt) => Token::Gt,
            Some(Token::Ge) => Token::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.add_expr()?;

        let result = match (&op, &lhs, &rhs) {
            (Token::Eq, _, _) => lhs == rhs,
            (Token::Ne, _, _) => lhs != rhs,
            (_, Evaluated::Int(a), Evaluated::Int(b)) => match op {
                Token::Lt => a < b,
                Token::Le => a <= b,
                Token::Gt => a > b,
                Token::Ge => a >= b,
                _ => unreachable!(),
            },
            _ => {
                return Err(self.err(format!(
                    "cannot order {} and {}",
                    lhs.kind(),
                    rhs.kind()
                )));
            }
        };

        Ok(Evaluated::Bool(result))
    }

    fn add_expr(&mut self) -> Result<Evaluated> {
        let mut lhs = self.mul_expr()?;
        loop {
            let sub = if self.eat(&Token::Add) {
                false
            } else if self.eat(&Token::Sub) {
                true
            } else {
                return Ok(lhs);
            };
            let rhs = self.mul_expr()?;
            let (a, b) = (self.integer(lhs)?, self.integer(rhs)?);
            let combined = if sub {
                a.checked_sub(b)
            } else {
                a.checked_add(b)
            };
            lhs = Evaluated::Int(combined.ok_or_else(|| self.err("integer overflow"))?);
        }
    }

    fn mul_expr(&mut self) -> Result<Evaluated> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Mul) => Token::Mul,
                Some(Token::Div) => Token::Div,
                Some(Token::Rem) => Token::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary_expr()?;
            let (a, b) = (self.integer(lhs)?, self.integer(rhs)?);
            let combined = match op {
                Token::Mul => a.checked_mul(b),
                Token::Div => a.checked_div(b),
                Token::Rem => a.checked_rem(b),
                _ => unreachable!(),
            };
            lhs = Evaluated::Int(
                combined.ok_or_else(|| self.err("division by zero or overflow"))?,
            );
        }
    }

    fn unary_expr(&mut self) -> Result<Evaluated> {
        if self.eat(&Token::Not) {
            let value = self.unary_expr()?;
            return Ok(Evaluated::Bool(!self.truthy(value)?));
        }
        if self.eat(&Token::Neg) {
            let value = self.unary_expr()?;
            let v = self.integer(value)?;
            return Ok(Evaluated::Int(
                v.checked_neg().ok_or_else(|| self.err("integer overflow"))?,
            ));
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<Evaluated> {
        match self.bump() {
            Some(Token::Int(v)) => Ok(Evaluated::Int(v)),
            Some(Token::Str(s)) => Ok(Evaluated::Str(s)),
            Some(Token::True) => Ok(Evaluated::Bool(true)),
            Some(Token::False) => Ok(Evaluated::Bool(false)),
            Some(Token::Var(name)) => {
                let value = self
                    .ctx
                    .var(&name)
                    .ok_or_else(|| self.err(format!("unknown variable `#{name}`")))?;
                self.lower(value)
            }
            Some(Token::Path(segments)) => self.resolve_path(&segments),
            Some(Token::LParen) => {
                let value = self.or_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.err("missing `)`"));
                }
                Ok(value)
            }
            _ => Err(self.err("expected a value")),
        }
    }

    fn resolve_path(&self, segments: &[String]) -> Result<Evaluated> {
        // `self` refers to the message currently being filled.
        let rest = if segments[0] == "self" {
            &segments[1..]
        } else {
            segments
        };
        if rest.is_empty() {
            return Err(self.err("`self` is not a scalar"));
        }

        let path = rest.join(".");
        let value = self
            .root
            .path(&path)
            .ok_or_else(|| self.err(format!("unknown field `{path}`")))?;

        self.lower(value)
    }

    fn lower(&self, value: &Value) -> Result<Evaluated> {
        match value {
            Value::Int(v) => Ok(Evaluated::Int(*v)),
            Value::UInt(v) => i128::try_from(*v)
                .map(Evaluated::Int)
                .map_err(|_| self.err("integer too large for expressions")),
            Value::Str(s) => Ok(Evaluated::Str(s.clone())),
            other => Err(self.err(format!(
                "{} values cannot be used in expressions",
                other.kind_name()
            ))),
        }
    }

    fn truthy(&self, value: Evaluated) -> Result<bool> {
        match value {
            Evaluated::Bool(b) => Ok(b),
            other => Err(self.err(format!("expected a boolean, got {}", other.kind()))),
        }
    }

    fn integer(&self, value: Evaluated) -> Result<i128> {
        match value {
            Evaluated::Int(v) => Ok(v),
            other => Err(self.err(format!("expected an integer, got {}", other.kind()))),
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Mul);
                i += 1;
            }
            b'/' => {
                tokens.push(Token::Div);
                i += 1;
            }
            b'%' => {
                tokens.push(Token::Rem);
                i += 1;
            }
            b'+' => {
                tokens.push(Token::Add);
                i += 1;
            }
            b'-' => {
                // Unary when at the start or after another operator.
                let unary = !matches!(
                    tokens.last(),
                    Some(Token::Int(_))
                        | Some(Token::Str(_))
                        | Some(Token::Var(_))
                        | Some(Token::Path(_))
                        | Some(Token::RParen)
                        | Some(Token::True)
                        | Some(Token::False)
                );
                tokens.push(if unary { Token::Neg } else { Token::Sub });
                i += 1;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(Error::expression(expr, "single `=` is not an operator"));
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(Error::expression(expr, "single `&` is not an operator"));
                }
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(Error::expression(expr, "single `|` is not an operator"));
                }
            }
            b'\'' | b'"' => {
                let quote = b;
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != quote {
                    end += 1;
                }
                if end == bytes.len() {
                    return Err(Error::expression(expr, "unterminated string literal"));
                }
                let text = std::str::from_utf8(&bytes[start..end])
                    .map_err(|_| Error::expression(expr, "invalid string literal"))?;
                tokens.push(Token::Str(text.to_string()));
                i = end + 1;
            }
            b'#' => {
                let start = i + 1;
                let end = ident_end(bytes, start);
                if end == start {
                    return Err(Error::expression(expr, "`#` must prefix a variable name"));
                }
                tokens.push(Token::Var(expr[start..end].to_string()));
                i = end;
            }
            b'0'..=b'9' => {
                let (value, next) = lex_int(expr, bytes, i)?;
                tokens.push(Token::Int(value));
                i = next;
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let mut segments = Vec::new();
                loop {
                    let end = ident_end(bytes, i);
                    segments.push(expr[i..end].to_string());
                    i = end;
                    if bytes.get(i) == Some(&b'.') {
                        i += 1;
                        if !bytes
                            .get(i)
                            .is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_')
                        {
                            return Err(Error::expression(expr, "dangling `.` in path"));
                        }
                    } else {
                        break;
                    }
                }
                match segments.as_slice() {
                    [single] if single == "true" => tokens.push(Token::True),
                    [single] if single == "false" => tokens.push(Token::False),
                    _ => tokens.push(Token::Path(segments)),
                }
            }
            _ => {
                return Err(Error::expression(
                    expr,
                    format!("unexpected character `{}`", b as char),
                ));
            }
        }
    }

    Ok(tokens)
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }

    end
}

fn lex_int(expr: &str, bytes: &[u8], start: usize) -> Result<(i128, usize)> {
    let (radix, digits_start) = if bytes[start] == b'0' && bytes.get(start + 1) == Some(&b'x') {
        (16, start + 2)
    } else if bytes[start] == b'0' && bytes.get(start + 1) == Some(&b'b') {
        (2, start + 2)
    } else {
        (10, start)
    };

    let mut end = digits_start;
    while end < bytes.len() && (bytes[end] as char).is_digit(radix) {
        end += 1;
    }
    if end == digits_start {
        return Err(Error::expression(expr, "malformed integer literal"));
    }

    let value = i128::from_str_radix(&expr[digits_start..end], radix)
        .map_err(|_| Error::expression(expr, "integer literal out of range"))?;

    Ok((value, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Message {
        let inner = Message::new("Inner").with("count", Value::Int(3));
        Message::new("Outer")
            .with("version", Value::UInt(2))
            .with("kind", Value::Str("ack".into()))
            .with("inner", Value::Object(inner))
    }

    fn eval_bool(expr: &str) -> Result<bool> {
        BasicEvaluator.evaluate_bool(expr, &root(), &Context::new())
    }

    fn eval_size(expr: &str) -> Result<i64> {
        BasicEvaluator.evaluate_size(expr, &root(), &Context::new())
    }

    #[test]
    fn test_empty_condition_is_true() {
        assert!(eval_bool("").unwrap());
        assert!(eval_bool("  ").unwrap());
    }

    #[test]
    fn test_empty_size_is_sentinel() {
        assert_eq!(eval_size("").unwrap(), -1);
    }

    #[test]
    fn test_decimal_literal_fast_path() {
        assert_eq!(eval_size("16").unwrap(), 16);
    }

    #[test]
    fn test_field_paths() {
        assert!(eval_bool("version == 2").unwrap());
        assert!(eval_bool("self.version == 2").unwrap());
        assert_eq!(eval_size("inner.count * 8").unwrap(), 24);
        assert!(eval_bool("missing == 1").is_err());
    }

    #[test]
    fn test_string_comparison() {
        assert!(eval_bool("kind == 'ack'").unwrap());
        assert!(eval_bool("kind != \"nak\"").unwrap());
        assert!(eval_bool("kind < 'zzz'").is_err());
    }

    #[test]
    fn test_variables() {
        let mut ctx = Context::new();
        ctx.set_var("prefix", Value::UInt(0b10));
        assert!(
            BasicEvaluator
                .evaluate_bool("#prefix == 0b10", &root(), &ctx)
                .unwrap()
        );
        ctx.remove_var("prefix");
        assert!(
            BasicEvaluator
                .evaluate_bool("#prefix == 0b10", &root(), &ctx)
                .is_err()
        );
    }

    #[test]
    fn test_precedence_and_parens() {
        assert_eq!(eval_size("1 + 2 * 3").unwrap(), 7);
        assert_eq!(eval_size("(1 + 2) * 3").unwrap(), 9);
        assert!(eval_bool("1 + 1 == 2 && !(2 > 3)").unwrap());
        assert!(eval_bool("version == 1 || version == 2").unwrap());
    }

    #[test]
    fn test_hex_and_binary_literals() {
        assert_eq!(eval_size("0x10").unwrap(), 16);
        assert_eq!(eval_size("0b101").unwrap(), 5);
    }

    #[test]
    fn test_negative_size_rejected() {
        assert!(eval_size("1 - 2").is_err());
    }

    #[test]
    fn test_division_by_zero() {
        assert!(eval_size("1 / 0").is_err());
    }

    #[test]
    fn test_unary_minus() {
        assert!(eval_bool("-1 < 0").unwrap());
        assert!(eval_bool("2 - -1 == 3").unwrap());
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(eval_bool("1 == 1 2").is_err());
    }
}

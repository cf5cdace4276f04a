//! Selector expressions over filterable event properties
//!
//! [`Selector`] builds the equality/conjunction expressions clients attach to
//! receivers, e.g. `RUNID = 'abc' and ORIG_LOCALID = 1`. [`SelectorExpr`]
//! parses the SQL92-style subset a broker evaluates against message headers:
//! comparisons, `AND`/`OR`/`NOT`, parentheses and `IS [NOT] NULL`.

use crate::error::{EventError, Result};
use crate::property::{PropertySet, Value};
use std::cmp::Ordering;
use std::fmt;

/// Builder for equality/conjunction selector strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    clauses: Vec<String>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name` to equal a string literal
    pub fn eq_str(mut self, name: &str, value: &str) -> Self {
        self.clauses
            .push(format!("{name} = '{}'", value.replace('\'', "''")));
        self
    }

    /// Require `name` to equal an integer literal
    pub fn eq_int(mut self, name: &str, value: i64) -> Self {
        self.clauses.push(format!("{name} = {value}"));
        self
    }

    /// Require `name` to equal a floating point literal.
    ///
    /// NaN and infinities have no literal form and are rejected.
    pub fn eq_float(mut self, name: &str, value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(EventError::validation(format!(
                "cannot compare {name} against non-finite float {value}"
            )));
        }
        self.clauses.push(format!("{name} = {value:?}"));
        Ok(self)
    }

    /// Require `name` to equal a boolean literal
    pub fn eq_bool(mut self, name: &str, value: bool) -> Self {
        let literal = if value { "TRUE" } else { "FALSE" };
        self.clauses.push(format!("{name} = {literal}"));
        self
    }

    /// Require `name` to equal a scalar value, quoting strings
    pub fn eq_value(self, name: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(self.eq_int(name, *v)),
            Value::Float(v) => self.eq_float(name, *v),
            Value::String(v) => Ok(self.eq_str(name, v)),
            Value::Bool(v) => Ok(self.eq_bool(name, *v)),
            other => Err(EventError::validation(format!(
                "cannot compare {name} against a {} value",
                other.type_name()
            ))),
        }
    }

    /// Conjoin all clauses of `other`
    pub fn and(mut self, other: Selector) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The selector string; empty when no clause was added
    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clauses.join(" and "))
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Parsed selector expression
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorExpr {
    And(Box<SelectorExpr>, Box<SelectorExpr>),
    Or(Box<SelectorExpr>, Box<SelectorExpr>),
    Not(Box<SelectorExpr>),
    Compare {
        name: String,
        op: CompareOp,
        literal: Value,
    },
    IsNull {
        name: String,
        negated: bool,
    },
}

impl SelectorExpr {
    /// Parse a selector string
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(EventError::validation(format!(
                "unexpected {token:?} in selector '{input}'"
            ))),
        }
    }

    /// Whether `headers` satisfy this expression.
    ///
    /// Comparisons against absent fields or values of another type are
    /// unknown, and unknown never matches.
    pub fn matches(&self, headers: &PropertySet) -> bool {
        self.eval(headers) == Some(true)
    }

    fn eval(&self, headers: &PropertySet) -> Option<bool> {
        match self {
            SelectorExpr::And(lhs, rhs) => match (lhs.eval(headers), rhs.eval(headers)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            SelectorExpr::Or(lhs, rhs) => match (lhs.eval(headers), rhs.eval(headers)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            SelectorExpr::Not(inner) => inner.eval(headers).map(|v| !v),
            SelectorExpr::IsNull { name, negated } => Some(headers.exists(name) == *negated),
            SelectorExpr::Compare { name, op, literal } => {
                let value = headers.get(name).ok()?;
                compare(value, literal).map(|ordering| op.accepts(ordering))
            }
        }
    }
}

fn compare(value: &Value, literal: &Value) -> Option<Ordering> {
    match (value, literal) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        #[allow(clippy::cast_precision_loss)]
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        #[allow(clippy::cast_precision_loss)]
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Op(CompareOp),
    And,
    Or,
    Not,
    Is,
    Null,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 1;
            }
            '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('<', Some('>')) => (CompareOp::Ne, 2),
                    ('<', Some('=')) => (CompareOp::Le, 2),
                    ('>', Some('=')) => (CompareOp::Ge, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    _ => (CompareOp::Gt, 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '\'' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(EventError::validation(format!(
                                "unterminated string literal in selector '{input}'"
                            )));
                        }
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            text.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
                {
                    i += 1;
                }
                if chars.get(i).is_some_and(|ch| matches!(ch, 'e' | 'E')) {
                    let mut j = i + 1;
                    if chars.get(j).is_some_and(|ch| matches!(ch, '+' | '-')) {
                        j += 1;
                    }
                    if chars.get(j).is_some_and(char::is_ascii_digit) {
                        i = j;
                        while chars.get(i).is_some_and(char::is_ascii_digit) {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let literal = if text.contains(['.', 'e', 'E']) {
                    text.parse::<f64>().map(Value::Float).ok()
                } else {
                    text.parse::<i64>().map(Value::Int).ok()
                };
                let literal = literal.ok_or_else(|| {
                    EventError::validation(format!("bad numeric literal '{text}' in selector"))
                })?;
                tokens.push(Token::Literal(literal));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "NULL" => Token::Null,
                    "TRUE" => Token::Literal(Value::Bool(true)),
                    "FALSE" => Token::Literal(Value::Bool(false)),
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => {
                return Err(EventError::validation(format!(
                    "unexpected character '{other}' in selector '{input}'"
                )));
            }
        }
    }

    Ok(tokens)
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
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<SelectorExpr> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            lhs = SelectorExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<SelectorExpr> {
        let mut lhs = self.not_expr()?;
        while self.eat(&Token::And) {
            let rhs = self.not_expr()?;
            lhs = SelectorExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<SelectorExpr> {
        if self.eat(&Token::Not) {
            let inner = self.not_expr()?;
            return Ok(SelectorExpr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<SelectorExpr> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                if self.eat(&Token::RParen) {
                    Ok(expr)
                } else {
                    Err(EventError::validation("missing ')' in selector"))
                }
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::Is) {
                    let negated = self.eat(&Token::Not);
                    if !self.eat(&Token::Null) {
                        return Err(EventError::validation(format!(
                            "expected NULL after IS for {name}"
                        )));
                    }
                    return Ok(SelectorExpr::IsNull { name, negated });
                }
                let op = match self.advance() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(EventError::validation(format!(
                            "expected comparison after {name}, found {other:?}"
                        )));
                    }
                };
                match self.advance() {
                    Some(Token::Literal(literal)) => Ok(SelectorExpr::Compare { name, op, literal }),
                    other => Err(EventError::validation(format!(
                        "expected literal after {name} {op:?}, found {other:?}"
                    ))),
                }
            }
            other => Err(EventError::validation(format!(
                "expected property name or '(', found {other:?}"
            ))),
        }
    }
}

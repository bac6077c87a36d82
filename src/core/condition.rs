//! Guard expressions
//!
//! Guards are parsed once, at load time, into a small typed tree and then
//! evaluated against an [`InstanceContext`]. Evaluation is total: a reference
//! that does not resolve is undefined, and undefined is falsy.
//!
//! Grammar:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | compare
//! compare := primary ( ( "==" | "!=" ) primary )?
//! primary := "true" | "false" | "null" | string | number
//!          | "isSet" "(" name ")" | path | "(" expr ")"
//! ```

use crate::core::context::{is_truthy, InstanceContext, Value};
use std::fmt;

/// Field of the triggering event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Kind,
    Branch,
}

/// Field of the running job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobField {
    Id,
    Name,
}

/// A dotted-path reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `matrix.<axis>` or `matrix.<axis>.<field>`
    Matrix { axis: String, field: Option<String> },
    /// A single name: an axis, a variant field or an env variable
    Bare(String),
    /// `env.<NAME>`
    Env(String),
    /// `secrets.<NAME>`
    Secret(String),
    /// `steps.<id>.outputs.<name>`
    StepOutput { step: String, output: String },
    /// `event.kind` / `event.branch`
    Event(EventField),
    /// `job.id` / `job.name`
    Job(JobField),
}

impl Reference {
    /// Interpret a dotted path
    pub fn from_path(segments: &[String]) -> Result<Self, String> {
        let parts: Vec<&str> = segments.iter().map(String::as_str).collect();
        match parts.as_slice() {
            ["matrix", axis] => Ok(Reference::Matrix {
                axis: axis.to_string(),
                field: None,
            }),
            ["matrix", axis, field] => Ok(Reference::Matrix {
                axis: axis.to_string(),
                field: Some(field.to_string()),
            }),
            ["env", name] => Ok(Reference::Env(name.to_string())),
            ["secrets", name] => Ok(Reference::Secret(name.to_string())),
            ["steps", step, "outputs", output] => Ok(Reference::StepOutput {
                step: step.to_string(),
                output: output.to_string(),
            }),
            ["event", "kind"] => Ok(Reference::Event(EventField::Kind)),
            ["event", "branch"] => Ok(Reference::Event(EventField::Branch)),
            ["job", "id"] => Ok(Reference::Job(JobField::Id)),
            ["job", "name"] => Ok(Reference::Job(JobField::Name)),
            [name] => Ok(Reference::Bare(name.to_string())),
            _ => Err(format!("unknown reference '{}'", parts.join("."))),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Matrix { axis, field: None } => write!(f, "matrix.{}", axis),
            Reference::Matrix {
                axis,
                field: Some(field),
            } => write!(f, "matrix.{}.{}", axis, field),
            Reference::Bare(name) => f.write_str(name),
            Reference::Env(name) => write!(f, "env.{}", name),
            Reference::Secret(name) => write!(f, "secrets.{}", name),
            Reference::StepOutput { step, output } => write!(f, "steps.{}.outputs.{}", step, output),
            Reference::Event(EventField::Kind) => f.write_str("event.kind"),
            Reference::Event(EventField::Branch) => f.write_str("event.branch"),
            Reference::Job(JobField::Id) => f.write_str("job.id"),
            Reference::Job(JobField::Name) => f.write_str("job.name"),
        }
    }
}

/// Typed guard expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Reference(Reference),
    /// `isSet(NAME)`: secret presence, never its value
    IsSet(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse a guard, accepting an optional `${{ ... }}` wrapper
    pub fn parse(source: &str) -> Result<Self, String> {
        let trimmed = source.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|rest| rest.strip_suffix("}}"))
            .unwrap_or(trimmed);

        let tokens = tokenize(inner)?;
        if tokens.is_empty() {
            return Err("empty expression".to_string());
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected {}", token)),
        }
    }

    /// Evaluate as a guard
    pub fn evaluate(&self, ctx: &InstanceContext) -> bool {
        is_truthy(self.value(ctx).as_ref())
    }

    /// Evaluate to a value; `None` is undefined
    pub fn value(&self, ctx: &InstanceContext) -> Option<Value> {
        match self {
            Expr::Literal(value) => Some(value.clone()),
            Expr::Reference(reference) => ctx.lookup(reference),
            Expr::IsSet(name) => Some(Value::Bool(ctx.is_secret_set(name))),
            Expr::Not(inner) => Some(Value::Bool(!inner.evaluate(ctx))),
            Expr::And(lhs, rhs) => Some(Value::Bool(lhs.evaluate(ctx) && rhs.evaluate(ctx))),
            Expr::Or(lhs, rhs) => Some(Value::Bool(lhs.evaluate(ctx) || rhs.evaluate(ctx))),
            Expr::Eq(lhs, rhs) => Some(Value::Bool(loosely_equal(
                lhs.value(ctx).as_ref(),
                rhs.value(ctx).as_ref(),
            ))),
            Expr::Ne(lhs, rhs) => Some(Value::Bool(!loosely_equal(
                lhs.value(ctx).as_ref(),
                rhs.value(ctx).as_ref(),
            ))),
        }
    }

    /// Every reference in the tree, for load-time checks
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expr::Literal(_) | Expr::IsSet(_) => {}
            Expr::Reference(reference) => out.push(reference),
            Expr::Not(inner) => inner.collect_references(out),
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) | Expr::Eq(lhs, rhs) | Expr::Ne(lhs, rhs) => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
        }
    }
}

/// Values compare by their rendered text; undefined renders as the empty string
fn loosely_equal(lhs: Option<&Value>, rhs: Option<&Value>) -> bool {
    let render = |v: Option<&Value>| v.map(|v| v.to_string()).unwrap_or_default();
    render(lhs) == render(rhs)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(String),
    Dot,
    LParen,
    RParen,
    Not,
    And,
    Or,
    EqEq,
    NotEq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::Str(s) => write!(f, "string '{}'", s),
            Token::Number(s) => write!(f, "number {}", s),
            Token::Dot => f.write_str("'.'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Not => f.write_str("'!'"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::EqEq => f.write_str("'=='"),
            Token::NotEq => f.write_str("'!='"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
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
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|offset| start + offset)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
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

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {}, found {}", expected, token)),
            None => Err(format!("expected {}, found end of expression", expected)),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_primary()?;
        match self.peek() {
            Some(Token::EqEq) => {
                self.pos += 1;
                Ok(Expr::Eq(Box::new(lhs), Box::new(self.parse_primary()?)))
            }
            Some(Token::NotEq) => {
                self.pos += 1;
                Ok(Expr::Ne(Box::new(lhs), Box::new(self.parse_primary()?)))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Number(n)) => parse_number(&n).map(Expr::Literal),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "isSet" if self.peek() == Some(&Token::LParen) => self.parse_is_set(),
                _ => self.parse_path(ident),
            },
            Some(token) => Err(format!("unexpected {}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_is_set(&mut self) -> Result<Expr, String> {
        self.expect(Token::LParen)?;
        let name = match self.next() {
            Some(Token::Str(s)) => s,
            Some(Token::Ident(first)) => match self.parse_path(first)? {
                Expr::Reference(Reference::Bare(name)) | Expr::Reference(Reference::Secret(name)) => name,
                other => return Err(format!("isSet expects a secret name, found {:?}", other)),
            },
            Some(token) => return Err(format!("isSet expects a secret name, found {}", token)),
            None => return Err("unexpected end of expression".to_string()),
        };
        self.expect(Token::RParen)?;
        Ok(Expr::IsSet(name))
    }

    fn parse_path(&mut self, first: String) -> Result<Expr, String> {
        let mut segments = vec![first];
        while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(segment)) => segments.push(segment),
                Some(Token::Number(segment)) => segments.push(segment),
                Some(token) => return Err(format!("expected a name after '.', found {}", token)),
                None => return Err("expected a name after '.'".to_string()),
            }
        }
        Reference::from_path(&segments).map(Expr::Reference)
    }
}

fn parse_number(text: &str) -> Result<Value, String> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| format!("invalid number '{}'", text))
}

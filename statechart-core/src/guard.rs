//! Guard expressions.
//!
//! A guard may be given as a closure or as a boolean expression evaluated
//! against the event being processed and the extended state:
//!
//! - `vars.field` - extended state variable (truthy check)
//! - `vars.field.nested` - nested access into a JSON variable
//! - `headers.name` - event header
//! - `event` - the event id (`null` for triggerless and timer transitions)
//! - `== != > >= < <=` - comparisons (ordering operators are numeric only)
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)`
//!
//! Examples:
//! - `vars.foo == 1`
//! - `headers.amount > 100 && !vars.locked`
//! - `event == "E1" || vars.override`

use crate::error::CoreError;
use serde_json::Value;

const ROOTS: [&str; 3] = ["vars", "headers", "event"];

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    Truthy(String),
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, f64),
    Ge(String, f64),
    Lt(String, f64),
    Le(String, f64),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty guard expression"));
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(invalid(format!(
                "unexpected trailing input '{}'",
                &s[parser.pos..]
            )));
        }
        Ok(expr)
    }

    /// Evaluates against a root object holding `vars`, `headers` and `event`.
    pub fn evaluate(&self, root: &Value) -> bool {
        match self {
            GuardExpr::Truthy(path) => is_truthy(lookup(root, path)),
            GuardExpr::Eq(path, expected) => values_equal(lookup(root, path), expected),
            GuardExpr::Ne(path, expected) => !values_equal(lookup(root, path), expected),
            GuardExpr::Gt(path, n) => as_f64(lookup(root, path)).is_some_and(|v| v > *n),
            GuardExpr::Ge(path, n) => as_f64(lookup(root, path)).is_some_and(|v| v >= *n),
            GuardExpr::Lt(path, n) => as_f64(lookup(root, path)).is_some_and(|v| v < *n),
            GuardExpr::Le(path, n) => as_f64(lookup(root, path)).is_some_and(|v| v <= *n),
            GuardExpr::And(l, r) => l.evaluate(root) && r.evaluate(root),
            GuardExpr::Or(l, r) => l.evaluate(root) || r.evaluate(root),
            GuardExpr::Not(inner) => !inner.evaluate(root),
        }
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidGuard {
        reason: reason.into(),
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> &'a Value {
    path.split('.').try_fold(root, |current, part| match current {
        Value::Object(map) => map.get(part),
        _ => None,
    })
    .unwrap_or(&Value::Null)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .is_some_and(|(a, b)| (a - b).abs() < f64::EPSILON),
        _ => a == b,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Recursive descent parser; `&&` binds tighter than `||`.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_expr(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();
        while self.eat("||") {
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();
        while self.eat("&&") {
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();
        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }
        if self.eat("(") {
            let expr = self.parse_expr()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(invalid("expected ')'"));
            }
            return Ok(expr);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        let path = self.parse_path()?;
        self.skip_whitespace();

        if self.eat("==") {
            return Ok(GuardExpr::Eq(path, self.parse_value()?));
        }
        if self.eat("!=") {
            return Ok(GuardExpr::Ne(path, self.parse_value()?));
        }
        if self.eat(">=") {
            return Ok(GuardExpr::Ge(path, self.parse_number()?));
        }
        if self.eat("<=") {
            return Ok(GuardExpr::Le(path, self.parse_number()?));
        }
        if self.eat(">") {
            return Ok(GuardExpr::Gt(path, self.parse_number()?));
        }
        if self.eat("<") {
            return Ok(GuardExpr::Lt(path, self.parse_number()?));
        }
        Ok(GuardExpr::Truthy(path))
    }

    fn parse_path(&mut self) -> Result<String, CoreError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let path = &self.input[start..self.pos];
        let (root, rest) = match path.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (path, None),
        };

        if !ROOTS.contains(&root) {
            return Err(invalid(format!(
                "'{}' must start with one of vars., headers. or event",
                path
            )));
        }
        match (root, rest) {
            ("event", Some(_)) => Err(invalid("'event' has no fields")),
            ("event", None) => Ok(path.to_string()),
            (_, Some(rest)) if !rest.is_empty() && !rest.split('.').any(str::is_empty) => {
                Ok(path.to_string())
            }
            _ => Err(invalid(format!("missing field name after '{}.'", root))),
        }
    }

    fn parse_value(&mut self) -> Result<Value, CoreError> {
        self.skip_whitespace();
        for (word, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.eat(word) {
                return Ok(value);
            }
        }
        if self.peek_char() == Some('"') {
            return self.parse_string();
        }
        let num = self.parse_number()?;
        serde_json::Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("number out of range: {}", num)))
    }

    fn parse_string(&mut self) -> Result<Value, CoreError> {
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(invalid("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<f64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;
        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| invalid(format!("invalid number: '{}'", num_str)))
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.peek_str(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}

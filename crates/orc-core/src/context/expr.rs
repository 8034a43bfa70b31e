//! A small expression language for `when`/`unless` guards: literals, names
//! resolved from the plan context, subscripts, boolean/comparison/arithmetic
//! operators, and calls to a fixed allow-list of pure functions.
//!
//! There is no Python `ast` module to lean on here, so forbidden constructs
//! (imports, attribute access, assignment, arbitrary calls, lambdas,
//! comprehensions) are rejected structurally: the grammar simply has no
//! production for them, and a handful of reserved words are rejected
//! explicitly so the error is legible rather than a generic "unexpected
//! token". Every rejection happens during parsing, before any evaluation.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

const ALLOWED_FUNCTIONS: &[&str] = &["len", "abs", "max", "min", "round", "bool", "int", "float", "str"];
const RESERVED_WORDS: &[&str] = &[
    "import", "from", "lambda", "exec", "eval", "del", "class", "def", "global", "nonlocal",
    "yield", "async", "await",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("forbidden construct: {0}")]
    Forbidden(String),
    #[error("forbidden function call: {0:?} is not in the allow-list")]
    ForbiddenCall(String),
    #[error("unexpected token: {0:?}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number literal: {0:?}")]
    InvalidNumber(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("undefined name: {0:?}")]
    UndefinedName(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("type error: {0}")]
    TypeError(String),
    #[error("wrong number of arguments to {func:?}: expected {expected}, got {got}")]
    Arity {
        func: String,
        expected: String,
        got: usize,
    },
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

fn lex(src: &str) -> Result<Vec<Tok>, ParseError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                toks.push(Tok::Percent);
                i += 1;
            }
            '.' => {
                return Err(ParseError::Forbidden("attribute access".into()));
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Eq);
                    i += 2;
                } else {
                    return Err(ParseError::Forbidden("assignment".into()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Neq);
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedToken("!".into()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Lte);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Gte);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(ParseError::UnexpectedEnd),
                    }
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
                toks.push(Tok::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                toks.push(Tok::Ident(text));
            }
            other => return Err(ParseError::UnexpectedToken(other.to_string())),
        }
    }

    Ok(toks)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Subscript(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

// ---------------------------------------------------------------------------
// Parser: precedence climbing, or < and < not < comparison < additive
// < multiplicative < unary < postfix (subscript/call) < primary.
// ---------------------------------------------------------------------------

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn advance(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: &Tok) -> Result<(), ParseError> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(ParseError::UnexpectedToken(format!("{t:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Tok::Ident(w)) if w == "or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Tok::Ident(w)) if w == "and") {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Tok::Ident(w)) if w == "not") {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Tok::Eq) => Some(BinOp::Eq),
            Some(Tok::Neq) => Some(BinOp::Neq),
            Some(Tok::Lt) => Some(BinOp::Lt),
            Some(Tok::Lte) => Some(BinOp::Lte),
            Some(Tok::Gt) => Some(BinOp::Gt),
            Some(Tok::Gte) => Some(BinOp::Gte),
            Some(Tok::Ident(w)) if w == "in" => Some(BinOp::In),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let right = self.parse_additive()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Tok::Minus)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::Subscript(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Tok::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Ident(name)) => {
                if RESERVED_WORDS.contains(&name.as_str()) {
                    return Err(ParseError::Forbidden(name));
                }
                match name.as_str() {
                    "True" | "true" => return Ok(Expr::Literal(Value::Bool(true))),
                    "False" | "false" => return Ok(Expr::Literal(Value::Bool(false))),
                    "None" | "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                if matches!(self.peek(), Some(Tok::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Tok::RParen)) {
                        loop {
                            args.push(self.parse_expr()?);
                            if matches!(self.peek(), Some(Tok::Comma)) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&Tok::RParen)?;
                    if !ALLOWED_FUNCTIONS.contains(&name.as_str()) {
                        return Err(ParseError::ForbiddenCall(name));
                    }
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Name(name))
            }
            Some(t) => Err(ParseError::UnexpectedToken(format!("{t:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

/// Parse `src` into an [`Expr`], rejecting any forbidden construct before
/// returning. Never evaluates anything.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let toks = lex(src)?;
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.toks.len() {
        let remaining = &parser.toks[parser.pos];
        return Err(ParseError::UnexpectedToken(format!("{remaining:?}")));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Python-like truthiness: `null`/`false`/`0`/empty string/empty
/// array/object are falsy, everything else is truthy.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_f64(v: &Value) -> Result<f64, EvalError> {
    match v {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EvalError::TypeError("not a finite number".into())),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(EvalError::TypeError(format!(
            "expected a number, got {other:?}"
        ))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Ok(x), Ok(y)) = (as_f64(a), as_f64(b)) {
        return x == y;
    }
    a == b
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, EvalError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => {
            let x = as_f64(a)?;
            let y = as_f64(b)?;
            x.partial_cmp(&y)
                .ok_or_else(|| EvalError::TypeError("values are not comparable".into()))
        }
    }
}

/// Evaluate `expr` against `context`. `context` maps names directly to
/// values; there is no surrounding scope or closure.
pub fn eval(expr: &Expr, context: &HashMap<String, Value>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedName(name.clone())),
        Expr::Subscript(base, index) => {
            let base_val = eval(base, context)?;
            let index_val = eval(index, context)?;
            match (&base_val, &index_val) {
                (Value::Object(map), Value::String(key)) => {
                    Ok(map.get(key).cloned().unwrap_or(Value::Null))
                }
                (Value::Array(arr), idx) => {
                    let i = as_f64(idx)? as i64;
                    let idx = if i < 0 { arr.len() as i64 + i } else { i };
                    Ok(arr
                        .get(idx.max(0) as usize)
                        .cloned()
                        .unwrap_or(Value::Null))
                }
                (Value::String(s), idx) => {
                    let i = as_f64(idx)? as i64;
                    let chars: Vec<char> = s.chars().collect();
                    let idx = if i < 0 { chars.len() as i64 + i } else { i };
                    Ok(chars
                        .get(idx.max(0) as usize)
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or(Value::Null))
                }
                _ => Err(EvalError::TypeError("value is not subscriptable".into())),
            }
        }
        Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!is_truthy(&eval(inner, context)?))),
        Expr::Unary(UnaryOp::Neg, inner) => {
            let v = eval(inner, context)?;
            Ok(Value::from(-as_f64(&v)?))
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, context),
        Expr::Call(name, args) => eval_call(name, args, context),
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    context: &HashMap<String, Value>,
) -> Result<Value, EvalError> {
    // Short-circuit and/or before evaluating the right side.
    if op == BinOp::Or {
        let l = eval(lhs, context)?;
        if is_truthy(&l) {
            return Ok(Value::Bool(true));
        }
        return Ok(Value::Bool(is_truthy(&eval(rhs, context)?)));
    }
    if op == BinOp::And {
        let l = eval(lhs, context)?;
        if !is_truthy(&l) {
            return Ok(Value::Bool(false));
        }
        return Ok(Value::Bool(is_truthy(&eval(rhs, context)?)));
    }

    let l = eval(lhs, context)?;
    let r = eval(rhs, context)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Neq => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt => Ok(Value::Bool(compare(&l, &r)? == std::cmp::Ordering::Less)),
        BinOp::Lte => Ok(Value::Bool(compare(&l, &r)? != std::cmp::Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(compare(&l, &r)? == std::cmp::Ordering::Greater)),
        BinOp::Gte => Ok(Value::Bool(compare(&l, &r)? != std::cmp::Ordering::Less)),
        BinOp::In => match &r {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| values_equal(v, &l)))),
            Value::String(s) => match &l {
                Value::String(needle) => Ok(Value::Bool(s.contains(needle.as_str()))),
                _ => Err(EvalError::TypeError("`in` on a string needs a string left-hand side".into())),
            },
            Value::Object(map) => match &l {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Err(EvalError::TypeError("`in` on an object needs a string key".into())),
            },
            _ => Err(EvalError::TypeError("right-hand side of `in` must be a collection".into())),
        },
        BinOp::Add => match (&l, &r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => Ok(Value::from(as_f64(&l)? + as_f64(&r)?)),
        },
        BinOp::Sub => Ok(Value::from(as_f64(&l)? - as_f64(&r)?)),
        BinOp::Mul => Ok(Value::from(as_f64(&l)? * as_f64(&r)?)),
        BinOp::Div => {
            let divisor = as_f64(&r)?;
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::from(as_f64(&l)? / divisor))
        }
        BinOp::Mod => {
            let divisor = as_f64(&r)?;
            if divisor == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::from(as_f64(&l)? % divisor))
        }
        BinOp::Or | BinOp::And => unreachable!("handled above"),
    }
}

fn eval_call(name: &str, args: &[Expr], context: &HashMap<String, Value>) -> Result<Value, EvalError> {
    let values: Result<Vec<Value>, EvalError> = args.iter().map(|a| eval(a, context)).collect();
    let values = values?;

    let arity_error = |expected: &str| EvalError::Arity {
        func: name.to_string(),
        expected: expected.to_string(),
        got: values.len(),
    };

    match name {
        "len" => {
            let [v] = values.as_slice() else {
                return Err(arity_error("1"));
            };
            let n = match v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                _ => return Err(EvalError::TypeError("len() needs a string, array, or object".into())),
            };
            Ok(Value::from(n as f64))
        }
        "abs" => {
            let [v] = values.as_slice() else {
                return Err(arity_error("1"));
            };
            Ok(Value::from(as_f64(v)?.abs()))
        }
        "round" => match values.as_slice() {
            [v] => Ok(Value::from(as_f64(v)?.round())),
            [v, digits] => {
                let d = as_f64(digits)? as i32;
                let factor = 10f64.powi(d);
                Ok(Value::from((as_f64(v)? * factor).round() / factor))
            }
            _ => Err(arity_error("1 or 2")),
        },
        "bool" => {
            let [v] = values.as_slice() else {
                return Err(arity_error("1"));
            };
            Ok(Value::Bool(is_truthy(v)))
        }
        "int" => {
            let [v] = values.as_slice() else {
                return Err(arity_error("1"));
            };
            Ok(Value::from(as_f64(v)?.trunc()))
        }
        "float" => {
            let [v] = values.as_slice() else {
                return Err(arity_error("1"));
            };
            Ok(Value::from(as_f64(v)?))
        }
        "str" => {
            let [v] = values.as_slice() else {
                return Err(arity_error("1"));
            };
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Null => "None".to_string(),
                other => other.to_string(),
            };
            Ok(Value::String(s))
        }
        "max" | "min" => {
            if values.is_empty() {
                return Err(arity_error("1+"));
            }
            let mut best = as_f64(&values[0])?;
            for v in &values[1..] {
                let f = as_f64(v)?;
                if (name == "max" && f > best) || (name == "min" && f < best) {
                    best = f;
                }
            }
            Ok(Value::from(best))
        }
        other => Err(EvalError::TypeError(format!("unknown function {other:?}"))),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn parses_and_evaluates_string_equality() {
        let expr = parse("data_quality == 'high'").unwrap();
        let context = ctx(&[("data_quality", Value::String("high".into()))]);
        assert_eq!(eval(&expr, &context).unwrap(), Value::Bool(true));
    }

    #[test]
    fn parses_and_evaluates_boolean_combination() {
        let expr = parse("score > 0.5 and not skipped").unwrap();
        let context = ctx(&[
            ("score", Value::from(0.8)),
            ("skipped", Value::Bool(false)),
        ]);
        assert_eq!(eval(&expr, &context).unwrap(), Value::Bool(true));
    }

    #[test]
    fn subscript_reads_object_field() {
        let expr = parse("result['status'] == 'ok'").unwrap();
        let context = ctx(&[(
            "result",
            serde_json::json!({"status": "ok"}),
        )]);
        assert_eq!(eval(&expr, &context).unwrap(), Value::Bool(true));
    }

    #[test]
    fn allow_listed_function_len_works() {
        let expr = parse("len(items) > 2").unwrap();
        let context = ctx(&[("items", serde_json::json!([1, 2, 3]))]);
        assert_eq!(eval(&expr, &context).unwrap(), Value::Bool(true));
    }

    #[test]
    fn undefined_name_is_an_eval_error_not_a_parse_error() {
        let expr = parse("missing == 1").unwrap();
        let context = ctx(&[]);
        assert!(matches!(
            eval(&expr, &context),
            Err(EvalError::UndefinedName(_))
        ));
    }

    #[test]
    fn rejects_forbidden_call_at_parse_time() {
        assert!(matches!(
            parse("open('x')"),
            Err(ParseError::ForbiddenCall(_))
        ));
    }

    #[test]
    fn rejects_attribute_access_at_parse_time() {
        assert!(matches!(
            parse("x.__class__"),
            Err(ParseError::Forbidden(_))
        ));
    }

    #[test]
    fn rejects_import_at_parse_time() {
        assert!(parse("import os").is_err());
    }

    #[test]
    fn rejects_exec_call_at_parse_time() {
        assert!(matches!(
            parse("exec('1')"),
            Err(ParseError::ForbiddenCall(_)) | Err(ParseError::Forbidden(_))
        ));
    }

    #[test]
    fn rejects_assignment_at_parse_time() {
        assert!(matches!(parse("x = 1"), Err(ParseError::Forbidden(_))));
    }

    #[test]
    fn in_operator_checks_array_membership() {
        let expr = parse("'low' in allowed").unwrap();
        let context = ctx(&[("allowed", serde_json::json!(["low", "medium"]))]);
        assert_eq!(eval(&expr, &context).unwrap(), Value::Bool(true));
    }
}

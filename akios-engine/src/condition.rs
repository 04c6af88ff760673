//! Condition evaluator: a restricted-grammar recursive-descent parser and
//! evaluator for step `condition` expressions.
//!
//! Ported from `condition_evaluator.py`'s `safe_eval`, but the Rust parser
//! is structurally incapable of producing a call/import/assignment/lambda/
//! comprehension node — there is no grammar rule that builds one — which
//! is a stronger guarantee than the original's "parse everything, then
//! reject disallowed AST node types" approach.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::Value;

const MAX_EXPRESSION_LENGTH: usize = 1024;
const MAX_DEPTH: u32 = 20;

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("condition expression exceeds maximum length of {MAX_EXPRESSION_LENGTH} characters")]
    TooLong,
    #[error("condition expression exceeds maximum nesting depth of {MAX_DEPTH}")]
    TooDeep,
    #[error("condition syntax error: {0}")]
    Syntax(String),
    #[error("unsafe condition expression: {0}")]
    Unsafe(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Var(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    List(Vec<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

// --- Tokenizer -------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Symbol(&'static str),
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { chars: src.char_indices().peekable(), src }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ConditionError> {
        let mut tokens = Vec::new();
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            if c.is_ascii_digit() {
                tokens.push(self.lex_number());
                continue;
            }
            if c == '"' || c == '\'' {
                tokens.push(self.lex_string(c)?);
                continue;
            }
            if c.is_alphabetic() || c == '_' {
                tokens.push(self.lex_ident());
                continue;
            }
            let rest = &self.src[i..];
            let (sym, len) = lex_symbol(rest)?;
            tokens.push(Token::Symbol(sym));
            for _ in 0..len {
                self.chars.next();
            }
        }
        tokens.push(Token::Eof);
        Ok(tokens)
    }

    fn lex_number(&mut self) -> Token {
        let mut s = String::new();
        let mut is_float = false;
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.chars.next();
            } else if c == '.' && !is_float {
                is_float = true;
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if is_float {
            Token::Float(s.parse().unwrap_or(0.0))
        } else {
            Token::Int(s.parse().unwrap_or(0))
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, ConditionError> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(Token::Str(s)),
                Some((_, c)) => s.push(c),
                None => return Err(ConditionError::Syntax("unterminated string literal".into())),
            }
        }
    }

    fn lex_ident(&mut self) -> Token {
        let mut s = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(s)
    }
}

fn lex_symbol(rest: &str) -> Result<(&'static str, usize), ConditionError> {
    const TWO_CHAR: &[(&str, &str)] =
        &[("==", "=="), ("!=", "!="), ("<=", "<="), (">=", ">=")];
    for (sym, lit) in TWO_CHAR {
        if rest.starts_with(lit) {
            return Ok((sym, 2));
        }
    }
    const ONE_CHAR: &[(&str, char)] = &[
        ("(", '('),
        (")", ')'),
        ("[", '['),
        ("]", ']'),
        (".", '.'),
        (",", ','),
        ("+", '+'),
        ("-", '-'),
        ("*", '*'),
        ("/", '/'),
        ("%", '%'),
        ("<", '<'),
        (">", '>'),
    ];
    let c = rest.chars().next().unwrap();
    for (sym, lit) in ONE_CHAR {
        if c == *lit {
            return Ok((sym, 1));
        }
    }
    Err(ConditionError::Syntax(format!("unexpected character '{c}'")))
}

// --- Parser ------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_symbol(&mut self, sym: &str) -> Result<(), ConditionError> {
        match self.peek() {
            Token::Symbol(s) if *s == sym => {
                self.advance();
                Ok(())
            }
            other => Err(ConditionError::Syntax(format!("expected '{sym}', found {other:?}"))),
        }
    }

    // `depth` tracks genuine AST nesting only — parenthesized sub-expressions,
    // bracket/subscript indexing, ternary branches, and and/or operand lists —
    // not the precedence-climbing chain itself. A bare literal or a single
    // comparison does not spend any of the budget; only actual nesting does.

    fn parse_ternary(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        let body = self.parse_or(depth)?;
        if let Token::Ident(kw) = self.peek() {
            if kw == "if" {
                self.advance();
                let next = depth + 1;
                check_depth(next)?;
                let test = self.parse_or(next)?;
                match self.peek() {
                    Token::Ident(kw) if kw == "else" => {
                        self.advance();
                    }
                    other => return Err(ConditionError::Syntax(format!("expected 'else', found {other:?}"))),
                }
                let orelse = self.parse_ternary(next)?;
                return Ok(Expr::Ternary(Box::new(test), Box::new(body), Box::new(orelse)));
            }
        }
        Ok(body)
    }

    fn parse_or(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        let first = self.parse_and(depth)?;
        if !matches!(self.peek(), Token::Ident(kw) if kw == "or") {
            return Ok(first);
        }
        let next = depth + 1;
        check_depth(next)?;
        let mut values = vec![first];
        while matches!(self.peek(), Token::Ident(kw) if kw == "or") {
            self.advance();
            values.push(self.parse_and(next)?);
        }
        Ok(Expr::Or(values))
    }

    fn parse_and(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        let first = self.parse_not(depth)?;
        if !matches!(self.peek(), Token::Ident(kw) if kw == "and") {
            return Ok(first);
        }
        let next = depth + 1;
        check_depth(next)?;
        let mut values = vec![first];
        while matches!(self.peek(), Token::Ident(kw) if kw == "and") {
            self.advance();
            values.push(self.parse_not(next)?);
        }
        Ok(Expr::And(values))
    }

    fn parse_not(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        if matches!(self.peek(), Token::Ident(kw) if kw == "not") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not(depth)?)));
        }
        self.parse_comparison(depth)
    }

    fn parse_comparison(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        let left = self.parse_additive(depth)?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Token::Symbol("==") => Some(CmpOp::Eq),
                Token::Symbol("!=") => Some(CmpOp::Ne),
                Token::Symbol("<") => Some(CmpOp::Lt),
                Token::Symbol("<=") => Some(CmpOp::Le),
                Token::Symbol(">") => Some(CmpOp::Gt),
                Token::Symbol(">=") => Some(CmpOp::Ge),
                Token::Ident(kw) if kw == "in" => Some(CmpOp::In),
                Token::Ident(kw) if kw == "not" => {
                    // lookahead for "not in"
                    if self.tokens.get(self.pos + 1) == Some(&Token::Ident("in".to_string())) {
                        self.advance();
                        Some(CmpOp::NotIn)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let rhs = self.parse_additive(depth)?;
            ops.push((op, rhs));
        }
        Ok(if ops.is_empty() { left } else { Expr::Compare(Box::new(left), ops) })
    }

    fn parse_additive(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        let mut left = self.parse_multiplicative(depth)?;
        loop {
            let op = match self.peek() {
                Token::Symbol("+") => BinOp::Add,
                Token::Symbol("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative(depth)?;
            left = Expr::BinOp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary(depth)?;
        loop {
            let op = match self.peek() {
                Token::Symbol("*") => BinOp::Mul,
                Token::Symbol("/") => BinOp::Div,
                Token::Symbol("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary(depth)?;
            left = Expr::BinOp(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        if matches!(self.peek(), Token::Symbol("-")) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.parse_unary(depth)?)));
        }
        self.parse_postfix(depth)
    }

    fn parse_postfix(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_atom(depth)?;
        loop {
            match self.peek() {
                Token::Symbol(".") => {
                    self.advance();
                    let Token::Ident(name) = self.advance() else {
                        return Err(ConditionError::Syntax("expected attribute name".into()));
                    };
                    if is_private(&name) {
                        return Err(ConditionError::Unsafe(format!("attribute access to '{name}' is not allowed")));
                    }
                    expr = Expr::Attr(Box::new(expr), name);
                }
                Token::Symbol("[") => {
                    self.advance();
                    let next = depth + 1;
                    check_depth(next)?;
                    let index = self.parse_ternary(next)?;
                    if let Expr::Literal(Value::String(s)) = &index {
                        if is_private(s) {
                            return Err(ConditionError::Unsafe(format!("subscript access to '{s}' is not allowed")));
                        }
                    }
                    self.expect_symbol("]")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_atom(&mut self, depth: u32) -> Result<Expr, ConditionError> {
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    if is_private(&name) {
                        return Err(ConditionError::Unsafe(format!("name '{name}' is not allowed")));
                    }
                    Ok(Expr::Var(name))
                }
            },
            Token::Symbol("(") => {
                let next = depth + 1;
                check_depth(next)?;
                let inner = self.parse_ternary(next)?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Token::Symbol("[") => {
                let next = depth + 1;
                check_depth(next)?;
                let mut items = Vec::new();
                if !matches!(self.peek(), Token::Symbol("]")) {
                    items.push(self.parse_ternary(next)?);
                    while matches!(self.peek(), Token::Symbol(",")) {
                        self.advance();
                        if matches!(self.peek(), Token::Symbol("]")) {
                            break;
                        }
                        items.push(self.parse_ternary(next)?);
                    }
                }
                self.expect_symbol("]")?;
                Ok(Expr::List(items))
            }
            other => Err(ConditionError::Syntax(format!("unexpected token {other:?}"))),
        }
    }
}

fn check_depth(depth: u32) -> Result<(), ConditionError> {
    if depth > MAX_DEPTH {
        Err(ConditionError::TooDeep)
    } else {
        Ok(())
    }
}

fn parse(src: &str) -> Result<Expr, ConditionError> {
    if src.len() > MAX_EXPRESSION_LENGTH {
        return Err(ConditionError::TooLong);
    }
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_ternary(0)?;
    if !matches!(parser.peek(), Token::Eof) {
        return Err(ConditionError::Syntax(format!("unexpected trailing token {:?}", parser.peek())));
    }
    Ok(expr)
}

// --- Evaluation ----------------------------------------------------------

fn eval(expr: &Expr, ns: &BTreeMap<String, Value>) -> Result<Value, ConditionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => Ok(ns.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Attr(base, name) => {
            let base = eval(base, ns)?;
            Ok(base.as_map().and_then(|m| m.get(name)).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, index) => {
            let base = eval(base, ns)?;
            let index = eval(index, ns)?;
            match (&base, &index) {
                (Value::Map(m), Value::String(k)) => Ok(m.get(k).cloned().unwrap_or(Value::Null)),
                (Value::List(l), Value::Int(i)) => {
                    let idx = if *i < 0 { l.len() as i64 + i } else { *i };
                    Ok(l.get(idx.max(0) as usize).cloned().unwrap_or(Value::Null))
                }
                _ => Ok(Value::Null),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, ns)?))),
        Expr::Neg(inner) => match eval(inner, ns)? {
            Value::Int(i) => Ok(Value::Int(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(ConditionError::Unsafe("cannot negate non-numeric value".into())),
        },
        Expr::And(values) => {
            let mut last = Value::Bool(true);
            for v in values {
                last = eval(v, ns)?;
                if !truthy(&last) {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Expr::Or(values) => {
            let mut last = Value::Bool(false);
            for v in values {
                last = eval(v, ns)?;
                if truthy(&last) {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Expr::BinOp(op, left, right) => {
            let l = eval(left, ns)?;
            let r = eval(right, ns)?;
            numeric_binop(*op, &l, &r)
        }
        Expr::Compare(first, rest) => {
            let mut left = eval(first, ns)?;
            for (op, rhs_expr) in rest {
                let right = eval(rhs_expr, ns)?;
                if !compare(*op, &left, &right) {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::List(items) => {
            let values: Result<Vec<Value>, ConditionError> = items.iter().map(|e| eval(e, ns)).collect();
            Ok(Value::List(values?))
        }
        Expr::Ternary(test, body, orelse) => {
            if truthy(&eval(test, ns)?) {
                eval(body, ns)
            } else {
                eval(orelse, ns)
            }
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::List(l) => !l.is_empty(),
        Value::Map(m) => !m.is_empty(),
    }
}

fn numeric_binop(op: BinOp, l: &Value, r: &Value) -> Result<Value, ConditionError> {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        if op == BinOp::Add {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(ConditionError::Unsafe("arithmetic on non-numeric operands".into()));
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a % b,
    };
    if matches!(l, Value::Int(_)) && matches!(r, Value::Int(_)) && op != BinOp::Div {
        Ok(Value::Int(result as i64))
    } else {
        Ok(Value::Float(result))
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> bool {
    match op {
        CmpOp::Eq => values_eq(l, r),
        CmpOp::Ne => !values_eq(l, r),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let Some((a, b)) = l.as_f64().zip(r.as_f64()) else { return false };
            match op {
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                _ => unreachable!(),
            }
        }
        CmpOp::In => contains(r, l),
        CmpOp::NotIn => !contains(r, l),
    }
}

fn values_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        _ => l == r,
    }
}

fn contains(container: &Value, needle: &Value) -> bool {
    match container {
        Value::List(items) => items.iter().any(|v| values_eq(v, needle)),
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Map(m) => needle.as_str().is_some_and(|k| m.contains_key(k)),
        _ => false,
    }
}

/// Evaluates `expr` against a namespace exposing `step_{N}_output` (raw
/// structured value) for every committed step plus `previous_output`.
/// Any parse or evaluation error is swallowed and reported as `false`,
/// matching the original's blanket `except Exception` guard.
pub fn evaluate(expr: &str, namespace: &BTreeMap<String, Value>) -> bool {
    match parse(expr).and_then(|ast| eval(&ast, namespace)) {
        Ok(v) => truthy(&v),
        Err(e) => {
            tracing::warn!(error = %e, expr, "condition evaluation failed; treating as false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn evaluates_simple_comparison() {
        let namespace = ns(&[("previous_output", Value::String("ok".into()))]);
        assert!(evaluate("previous_output == 'ok'", &namespace));
    }

    #[test]
    fn evaluates_ternary_and_boolean_ops() {
        let namespace = ns(&[("step_0_output", Value::Int(5))]);
        assert!(evaluate("step_0_output > 3 and step_0_output < 10", &namespace));
        assert!(evaluate("True if step_0_output == 5 else False", &namespace));
    }

    #[test]
    fn rejects_dunder_attribute_access() {
        let namespace = BTreeMap::new();
        assert!(!evaluate("previous_output.__class__", &namespace));
    }

    #[test]
    fn rejects_private_subscript_key() {
        let namespace = ns(&[("step_0_output", Value::Map(BTreeMap::new()))]);
        assert!(!evaluate("step_0_output['_secret']", &namespace));
    }

    #[test]
    fn too_long_expression_is_rejected() {
        let namespace = BTreeMap::new();
        let expr = "1 ".repeat(600);
        assert!(!evaluate(&expr, &namespace));
    }

    #[test]
    fn unknown_variable_defaults_to_null_and_false() {
        let namespace = BTreeMap::new();
        assert!(!evaluate("missing_var", &namespace));
    }

    #[test]
    fn in_operator_checks_list_membership() {
        let namespace = ns(&[("step_0_output", Value::List(vec![Value::Int(1), Value::Int(2)]))]);
        assert!(evaluate("1 in step_0_output", &namespace));
        assert!(!evaluate("9 in step_0_output", &namespace));
    }

    #[test]
    fn ordinary_parenthesized_boolops_do_not_hit_depth_limit() {
        let namespace = ns(&[("step_0_output", Value::Int(5)), ("previous_output", Value::Int(1))]);
        assert!(evaluate(
            "(step_0_output > 3 and previous_output == 1) or (step_0_output < 0 and previous_output == 9)",
            &namespace
        ));
    }

    #[test]
    fn deeply_nested_parens_are_rejected() {
        let namespace = BTreeMap::new();
        let expr = format!("{}1{}", "(".repeat(25), ")".repeat(25));
        assert!(!evaluate(&expr, &namespace));
    }
}

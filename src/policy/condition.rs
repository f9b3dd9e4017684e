//! Action-rule condition language.
//!
//! A small expression grammar. The only reachable identifiers
//! are the call's `tool`, `command`, `agent`, and `args` (with `.key` or
//! `['key']` lookups); anything else is rejected at parse time.
//!
//! ```text
//! expr    := or
//! or      := and (("or" | "||") and)*
//! and     := unary (("and" | "&&") unary)*
//! unary   := ("not" | "!") unary | compare
//! compare := operand (op operand)?
//! op      := == | != | < | <= | > | >= | contains | startswith | endswith
//!          | matches | in
//! operand := string | number | true | false | null | path | "(" expr ")"
//! path    := ("tool" | "command" | "agent" | "args") ("." key | "[" string "]")*
//! ```

use std::fmt;

use regex::Regex;
use serde_json::Value;

/// Errors produced while parsing a condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    /// The condition text was empty.
    #[error("condition is empty")]
    Empty,

    /// An identifier outside the allowed set was used.
    #[error("unknown identifier '{0}' (allowed: tool, command, agent, args)")]
    UnknownIdentifier(String),

    /// The tokenizer hit an unexpected character.
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar {
        /// Offending character.
        ch: char,
        /// Byte offset in the source.
        offset: usize,
    },

    /// A string literal was not closed.
    #[error("unterminated string literal")]
    UnterminatedString,

    /// The parser expected something else.
    #[error("expected {expected}, found {found}")]
    Unexpected {
        /// What the parser wanted.
        expected: String,
        /// What it got.
        found: String,
    },

    /// A `matches` operand is not a valid regular expression.
    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex {
        /// The regex source.
        pattern: String,
        /// Compiler message.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Evaluation environment
// ---------------------------------------------------------------------------

/// Values visible to a condition.
#[derive(Debug, Clone, Copy)]
pub struct ConditionEnv<'a> {
    /// Tool name as called.
    pub tool: &'a str,
    /// Command argument (parameterized call text or `args.command`).
    pub command: Option<&'a str>,
    /// Calling agent.
    pub agent: &'a str,
    /// Call arguments.
    pub args: &'a Value,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// Root identifiers a path may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Tool,
    Command,
    Agent,
    Args,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    In,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(Root, Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    /// `matches` against a literal pattern, compiled once.
    Regex(Box<Expr>, Regex),
}

/// A parsed, reusable condition.
#[derive(Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.source).finish()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Condition {
    /// Parse condition text.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] on syntax errors, unknown identifiers, or
    /// invalid literal regexes.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(ConditionError::Unexpected {
                expected: "end of condition".to_owned(),
                found: tok.to_string(),
            });
        }
        Ok(Self {
            source: source.trim().to_owned(),
            expr,
        })
    }

    /// Source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a call. Type mismatches evaluate to false.
    pub fn evaluate(&self, env: &ConditionEnv<'_>) -> bool {
        truthy(&eval(&self.expr, env))
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "'{s}'"),
            Self::Str(s) => write!(f, "string \"{s}\""),
            Self::Num(n) => write!(f, "number {n}"),
            Self::Op(op) => write!(f, "'{op}'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::Dot => f.write_str("'.'"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i.saturating_add(1)).map(|(_, c)| *c);
        match ch {
            c if c.is_whitespace() => i = i.saturating_add(1),
            '(' => {
                tokens.push(Token::LParen);
                i = i.saturating_add(1);
            }
            ')' => {
                tokens.push(Token::RParen);
                i = i.saturating_add(1);
            }
            '[' => {
                tokens.push(Token::LBracket);
                i = i.saturating_add(1);
            }
            ']' => {
                tokens.push(Token::RBracket);
                i = i.saturating_add(1);
            }
            '.' if !next.is_some_and(|c| c.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i = i.saturating_add(1);
            }
            '\'' | '"' => {
                let quote = ch;
                let mut text = String::new();
                i = i.saturating_add(1);
                loop {
                    let Some(&(_, c)) = chars.get(i) else {
                        return Err(ConditionError::UnterminatedString);
                    };
                    i = i.saturating_add(1);
                    match c {
                        '\\' => {
                            let Some(&(_, escaped)) = chars.get(i) else {
                                return Err(ConditionError::UnterminatedString);
                            };
                            text.push(escaped);
                            i = i.saturating_add(1);
                        }
                        c if c == quote => break,
                        c => text.push(c),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '=' | '!' | '<' | '>' => {
                let op = match (ch, next) {
                    ('=', Some('=')) => "==",
                    ('!', Some('=')) => "!=",
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    ('>', _) => ">",
                    ('!', _) => "!",
                    _ => return Err(ConditionError::UnexpectedChar { ch, offset }),
                };
                i = i.saturating_add(op.len());
                tokens.push(Token::Op(op));
            }
            '&' | '|' => {
                if next != Some(ch) {
                    return Err(ConditionError::UnexpectedChar { ch, offset });
                }
                tokens.push(Token::Op(if ch == '&' { "&&" } else { "||" }));
                i = i.saturating_add(2);
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i = i.saturating_add(1);
                while chars
                    .get(i)
                    .is_some_and(|(_, c)| c.is_ascii_digit() || *c == '.')
                {
                    i = i.saturating_add(1);
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ConditionError::UnexpectedChar { ch, offset })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '-')
                {
                    i = i.saturating_add(1);
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push(Token::Ident(word));
            }
            _ => return Err(ConditionError::UnexpectedChar { ch, offset }),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

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
        if tok.is_some() {
            self.pos = self.pos.saturating_add(1);
        }
        tok
    }

    fn eat_keyword(&mut self, words: &[&str], symbol: &str) -> bool {
        let hit = match self.peek() {
            Some(Token::Ident(w)) => words.iter().any(|k| w.eq_ignore_ascii_case(k)),
            Some(Token::Op(op)) => *op == symbol,
            _ => false,
        };
        if hit {
            self.pos = self.pos.saturating_add(1);
        }
        hit
    }

    fn expect(&mut self, want: &Token, label: &str) -> Result<(), ConditionError> {
        match self.advance() {
            Some(ref tok) if tok == want => Ok(()),
            other => Err(unexpected(label, other.as_ref())),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(&["or"], "||") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword(&["and"], "&&") {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat_keyword(&["not"], "!") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ConditionError> {
        let left = self.parse_operand()?;
        let Some(op) = self.peek().and_then(comparison_op) else {
            return Ok(left);
        };
        self.pos = self.pos.saturating_add(1);
        let right = self.parse_operand()?;

        if op == CmpOp::Matches {
            if let Expr::Literal(Value::String(pattern)) = &right {
                let regex = Regex::new(pattern).map_err(|e| ConditionError::InvalidRegex {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
                return Ok(Expr::Regex(Box::new(left), regex));
            }
        }
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_operand(&mut self) -> Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
            )),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => self.parse_identifier(word),
            other => Err(unexpected("an operand", other.as_ref())),
        }
    }

    fn parse_identifier(&mut self, word: String) -> Result<Expr, ConditionError> {
        let root = match word.as_str() {
            "true" | "True" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" | "False" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" | "None" => return Ok(Expr::Literal(Value::Null)),
            "tool" => Root::Tool,
            "command" => Root::Command,
            "agent" => Root::Agent,
            "args" => Root::Args,
            _ => return Err(ConditionError::UnknownIdentifier(word)),
        };

        let mut keys = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos = self.pos.saturating_add(1);
                    match self.advance() {
                        Some(Token::Ident(key)) => keys.push(key),
                        other => return Err(unexpected("a key after '.'", other.as_ref())),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos = self.pos.saturating_add(1);
                    match self.advance() {
                        Some(Token::Str(key)) => keys.push(key),
                        other => return Err(unexpected("a quoted key", other.as_ref())),
                    }
                    self.expect(&Token::RBracket, "']'")?;
                }
                _ => break,
            }
        }

        if root != Root::Args && !keys.is_empty() {
            return Err(ConditionError::Unexpected {
                expected: "no key lookup".to_owned(),
                found: format!("lookup on '{word}'"),
            });
        }
        Ok(Expr::Path(root, keys))
    }
}

fn comparison_op(tok: &Token) -> Option<CmpOp> {
    match tok {
        Token::Op("==") => Some(CmpOp::Eq),
        Token::Op("!=") => Some(CmpOp::Ne),
        Token::Op("<") => Some(CmpOp::Lt),
        Token::Op("<=") => Some(CmpOp::Le),
        Token::Op(">") => Some(CmpOp::Gt),
        Token::Op(">=") => Some(CmpOp::Ge),
        Token::Ident(w) => match w.to_ascii_lowercase().as_str() {
            "contains" => Some(CmpOp::Contains),
            "startswith" => Some(CmpOp::StartsWith),
            "endswith" => Some(CmpOp::EndsWith),
            "matches" => Some(CmpOp::Matches),
            "in" => Some(CmpOp::In),
            _ => None,
        },
        _ => None,
    }
}

fn unexpected(expected: &str, found: Option<&Token>) -> ConditionError {
    ConditionError::Unexpected {
        expected: expected.to_owned(),
        found: found.map_or_else(|| "end of condition".to_owned(), Token::to_string),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, env: &ConditionEnv<'_>) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path(root, keys) => resolve_path(*root, keys, env),
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, env))),
        Expr::And(l, r) => Value::Bool(truthy(&eval(l, env)) && truthy(&eval(r, env))),
        Expr::Or(l, r) => Value::Bool(truthy(&eval(l, env)) || truthy(&eval(r, env))),
        Expr::Regex(operand, regex) => {
            let value = eval(operand, env);
            Value::Bool(value.as_str().is_some_and(|s| regex.is_match(s)))
        }
        Expr::Compare(op, l, r) => Value::Bool(compare(*op, &eval(l, env), &eval(r, env))),
    }
}

fn resolve_path(root: Root, keys: &[String], env: &ConditionEnv<'_>) -> Value {
    match root {
        Root::Tool => Value::String(env.tool.to_owned()),
        Root::Agent => Value::String(env.agent.to_owned()),
        Root::Command => env
            .command
            .map_or(Value::Null, |c| Value::String(c.to_owned())),
        Root::Args => {
            let mut current = env.args;
            for key in keys {
                let next = match current {
                    Value::Object(map) => map.get(key),
                    Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                    _ => None,
                };
                match next {
                    Some(v) => current = v,
                    None => return Value::Null,
                }
            }
            current.clone()
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    match op {
        CmpOp::Eq => loosely_equal(left, right),
        CmpOp::Ne => !loosely_equal(left, right),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            ordering.is_some_and(|o| match op {
                CmpOp::Lt => o.is_lt(),
                CmpOp::Le => o.is_le(),
                CmpOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            })
        }
        CmpOp::Contains => contains(left, right),
        CmpOp::In => contains(right, left),
        CmpOp::StartsWith => match (left.as_str(), right.as_str()) {
            (Some(a), Some(b)) => a.starts_with(b),
            _ => false,
        },
        CmpOp::EndsWith => match (left.as_str(), right.as_str()) {
            (Some(a), Some(b)) => a.ends_with(b),
            _ => false,
        },
        CmpOp::Matches => match (left.as_str(), right.as_str()) {
            (Some(text), Some(pattern)) => Regex::new(pattern).is_ok_and(|re| re.is_match(text)),
            _ => false,
        },
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

//! Boolean header selectors attached to subscriptions.
//!
//! ```text
//! headers.event_type == 'DELETE' && !(headers['cluster_count'] > 10)
//! ```
//!
//! A missing header evaluates to `null`. Equality compares any two values,
//! ordering needs two numbers and logical operators need booleans.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("selector parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("selector evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    compiled: Result<Expr, SelectorError>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let expr = Parser::new(source)?.parse()?;
        Ok(Self {
            source: source.to_string(),
            compiled: Ok(expr),
        })
    }

    /// Keeps an unparseable selector around; it fails every evaluation.
    pub fn parse_lenient(source: &str) -> Self {
        let compiled = Parser::new(source).and_then(|parser| parser.parse());
        Self {
            source: source.to_string(),
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn parse_error(&self) -> Option<&SelectorError> {
        self.compiled.as_ref().err()
    }

    pub fn evaluate(&self, message: &Message) -> Result<bool, SelectorError> {
        let expr = match &self.compiled {
            Ok(expr) => expr,
            Err(err) => {
                return Err(SelectorError::Evaluation(format!(
                    "selector '{}' is invalid: {err}",
                    self.source
                )))
            }
        };
        match expr.evaluate(message)? {
            Operand::Bool(result) => Ok(result),
            other => Err(SelectorError::Evaluation(format!(
                "selector produced {} instead of a boolean",
                other.type_name()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Header(String),
    Literal(Operand),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

impl Operand {
    fn from_header(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Operand::Null,
            Some(Value::Bool(flag)) => Operand::Bool(*flag),
            Some(Value::Number(number)) => number.as_f64().map_or(Operand::Null, Operand::Num),
            Some(Value::String(text)) => Operand::Str(text.clone()),
            Some(other) => Operand::Str(other.to_string()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Operand::Str(_) => "string",
            Operand::Num(_) => "number",
            Operand::Bool(_) => "boolean",
            Operand::Null => "null",
        }
    }

    fn expect_bool(self, operator: &str) -> Result<bool, SelectorError> {
        match self {
            Operand::Bool(flag) => Ok(flag),
            other => Err(SelectorError::Evaluation(format!(
                "'{operator}' needs booleans, got {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

impl Expr {
    fn evaluate(&self, message: &Message) -> Result<Operand, SelectorError> {
        match self {
            Expr::Header(name) => Ok(Operand::from_header(message.header(name))),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Not(inner) => Ok(Operand::Bool(!inner.evaluate(message)?.expect_bool("!")?)),
            Expr::And(left, right) => {
                if !left.evaluate(message)?.expect_bool("&&")? {
                    return Ok(Operand::Bool(false));
                }
                Ok(Operand::Bool(right.evaluate(message)?.expect_bool("&&")?))
            }
            Expr::Or(left, right) => {
                if left.evaluate(message)?.expect_bool("||")? {
                    return Ok(Operand::Bool(true));
                }
                Ok(Operand::Bool(right.evaluate(message)?.expect_bool("||")?))
            }
            Expr::Compare(op, left, right) => {
                let left = left.evaluate(message)?;
                let right = right.evaluate(message)?;
                compare(*op, &left, &right).map(Operand::Bool)
            }
        }
    }
}

fn compare(op: CompareOp, left: &Operand, right: &Operand) -> Result<bool, SelectorError> {
    match op {
        CompareOp::Eq => Ok(left == right),
        CompareOp::Ne => Ok(left != right),
        _ => {
            let (Operand::Num(left), Operand::Num(right)) = (left, right) else {
                return Err(SelectorError::Evaluation(format!(
                    "'{op}' needs numbers, got {} and {}",
                    left.type_name(),
                    right.type_name()
                )));
            };
            Ok(match op {
                CompareOp::Lt => left < right,
                CompareOp::Le => left <= right,
                CompareOp::Gt => left > right,
                _ => left >= right,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Compare(CompareOp),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, SelectorError> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<CharIndices<'_>> = source.char_indices().peekable();

    while let Some(&(position, ch)) = chars.peek() {
        let parse_error = |message: &str| SelectorError::Parse {
            position,
            message: message.to_string(),
        };
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push((position, Token::Dot));
            }
            '[' => {
                chars.next();
                tokens.push((position, Token::LBracket));
            }
            ']' => {
                chars.next();
                tokens.push((position, Token::RBracket));
            }
            '(' => {
                chars.next();
                tokens.push((position, Token::LParen));
            }
            ')' => {
                chars.next();
                tokens.push((position, Token::RParen));
            }
            '&' | '|' => {
                chars.next();
                if chars.next().map(|(_, next)| next) != Some(ch) {
                    return Err(parse_error("expected '&&' or '||'"));
                }
                let token = if ch == '&' { Token::And } else { Token::Or };
                tokens.push((position, token));
            }
            '=' => {
                chars.next();
                if chars.next().map(|(_, next)| next) != Some('=') {
                    return Err(parse_error("expected '=='"));
                }
                tokens.push((position, Token::Compare(CompareOp::Eq)));
            }
            '!' | '<' | '>' => {
                chars.next();
                let has_eq = chars.peek().map(|(_, next)| *next) == Some('=');
                if has_eq {
                    chars.next();
                }
                let token = match (ch, has_eq) {
                    ('!', false) => Token::Not,
                    ('!', true) => Token::Compare(CompareOp::Ne),
                    ('<', false) => Token::Compare(CompareOp::Lt),
                    ('<', true) => Token::Compare(CompareOp::Le),
                    ('>', false) => Token::Compare(CompareOp::Gt),
                    _ => Token::Compare(CompareOp::Ge),
                };
                tokens.push((position, token));
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        quote if quote == ch => {
                            closed = true;
                            break;
                        }
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err(parse_error("unterminated string literal"));
                }
                tokens.push((position, Token::Str(text)));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut literal = String::new();
                literal.push(c);
                chars.next();
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        literal.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| parse_error(&format!("invalid number '{literal}'")))?;
                tokens.push((position, Token::Num(number)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' || next == '-' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((position, Token::Ident(ident)));
            }
            other => return Err(parse_error(&format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, SelectorError> {
        Ok(Self {
            tokens: tokenize(source)?,
            cursor: 0,
            end: source.len(),
        })
    }

    fn parse(mut self) -> Result<Expr, SelectorError> {
        if self.tokens.is_empty() {
            return Err(self.error("empty selector"));
        }
        let expr = self.parse_or()?;
        if self.cursor < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map_or(self.end, |(position, _)| *position)
    }

    fn error(&self, message: &str) -> SelectorError {
        SelectorError::Parse {
            position: self.position(),
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|(_, token)| token.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, message: &str) -> Result<(), SelectorError> {
        if self.peek() == Some(&expected) {
            self.cursor += 1;
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SelectorError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.cursor += 1;
            let right = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorError> {
        let mut expr = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.cursor += 1;
            let right = self.parse_unary()?;
            expr = Expr::And(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, SelectorError> {
        if self.peek() == Some(&Token::Not) {
            self.cursor += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, SelectorError> {
        let left = self.parse_operand()?;
        if let Some(Token::Compare(op)) = self.peek() {
            let op = *op;
            self.cursor += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Expr, SelectorError> {
        let start = self.position();
        match self.advance() {
            Some(Token::Str(text)) => Ok(Expr::Literal(Operand::Str(text))),
            Some(Token::Num(number)) => Ok(Expr::Literal(Operand::Num(number))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "expected ')'")?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Operand::Bool(true))),
                "false" => Ok(Expr::Literal(Operand::Bool(false))),
                "null" => Ok(Expr::Literal(Operand::Null)),
                "headers" => self.parse_header_access(),
                other => Err(SelectorError::Parse {
                    position: start,
                    message: format!("unknown identifier '{other}'"),
                }),
            },
            Some(_) => Err(SelectorError::Parse {
                position: start,
                message: "expected an operand".to_string(),
            }),
            None => Err(self.error("unexpected end of selector")),
        }
    }

    fn parse_header_access(&mut self) -> Result<Expr, SelectorError> {
        match self.advance() {
            Some(Token::Dot) => match self.advance() {
                Some(Token::Ident(name)) => Ok(Expr::Header(name)),
                _ => Err(self.error("expected a header name after 'headers.'")),
            },
            Some(Token::LBracket) => {
                let Some(Token::Str(name)) = self.advance() else {
                    return Err(self.error("expected a quoted header name"));
                };
                self.expect(Token::RBracket, "expected ']'")?;
                Ok(Expr::Header(name))
            }
            _ => Err(self.error("expected '.' or '[' after 'headers'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new()
            .with_header("event_type", "UPDATE")
            .with_header("cluster_count", 3)
            .with_header("host_name", "c6401.ambari.apache.org")
    }

    fn eval(source: &str) -> Result<bool, SelectorError> {
        Selector::parse(source)?.evaluate(&message())
    }

    #[test]
    fn header_equality_and_logic() {
        assert_eq!(eval("headers.event_type == 'UPDATE'"), Ok(true));
        assert_eq!(eval("headers['event_type'] != \"UPDATE\""), Ok(false));
        assert_eq!(
            eval("headers.event_type == 'DELETE' || headers.cluster_count >= 3"),
            Ok(true)
        );
        assert_eq!(eval("!(headers.cluster_count < 2) && true"), Ok(true));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(eval("true || false && false"), Ok(true));
        assert_eq!(eval("(true || false) && false"), Ok(false));
    }

    #[test]
    fn missing_header_is_null() {
        assert_eq!(eval("headers.rack == null"), Ok(true));
        assert_eq!(eval("headers.rack == 'default'"), Ok(false));
    }

    #[test]
    fn ordering_requires_numbers() {
        assert!(matches!(
            eval("headers.event_type > 1"),
            Err(SelectorError::Evaluation(_))
        ));
        assert_eq!(eval("headers.cluster_count > -1.5"), Ok(true));
    }

    #[test]
    fn non_boolean_result_is_an_evaluation_error() {
        assert!(matches!(eval("headers.event_type"), Err(SelectorError::Evaluation(_))));
        assert!(matches!(eval("'a' && true"), Err(SelectorError::Evaluation(_))));
    }

    #[test]
    fn parse_errors_report_offsets() {
        assert!(matches!(
            Selector::parse("headers.event_type = 'x'"),
            Err(SelectorError::Parse { position: 19, .. })
        ));
        assert!(matches!(
            Selector::parse("(true"),
            Err(SelectorError::Parse { position: 5, .. })
        ));
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("hosts.name == 'a'").is_err());
    }

    #[test]
    fn lenient_selector_fails_every_evaluation() {
        let selector = Selector::parse_lenient("headers.event_type ==");
        assert!(selector.parse_error().is_some());
        assert_eq!(selector.source(), "headers.event_type ==");
        assert!(matches!(
            selector.evaluate(&message()),
            Err(SelectorError::Evaluation(_))
        ));
    }
}

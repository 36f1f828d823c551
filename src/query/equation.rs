//! Arithmetic over aggregates, e.g. `equation|count() / (epm() * 2)`.

use crate::errors::{AppError, AppResult};

use super::plan::ArithOp;

pub const EQUATION_PREFIX: &str = "equation|";

/// Deepest parenthesis or unary minus nesting accepted.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// A function call such as `p95(span.self_time)`, kept verbatim.
    Function(String),
    Binary {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Function(String),
    Op(ArithOp),
    Open,
    Close,
}

pub fn strip_equation_prefix(column: &str) -> Option<&str> {
    column.strip_prefix(EQUATION_PREFIX)
}

pub fn parse_equation(source: &str) -> AppResult<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(AppError::InvalidSearchQuery("empty equation".to_string()));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(AppError::InvalidSearchQuery(format!(
            "unexpected trailing input in equation '{source}'"
        )));
    }
    Ok(expr)
}

fn tokenize(source: &str) -> AppResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '+' => push_op(&mut tokens, ArithOp::Add, &mut i),
            '-' => push_op(&mut tokens, ArithOp::Sub, &mut i),
            '*' => push_op(&mut tokens, ArithOp::Mul, &mut i),
            '/' => push_op(&mut tokens, ArithOp::Div, &mut i),
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| AppError::InvalidSearchQuery(format!("invalid number '{literal}'")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if chars.get(i) != Some(&'(') {
                    let name: String = chars[start..i].iter().collect();
                    return Err(AppError::InvalidSearchQuery(format!(
                        "equations only support aggregate functions, got '{name}'"
                    )));
                }
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ')')
                    .map(|offset| i + offset)
                    .ok_or_else(|| AppError::InvalidSearchQuery("unterminated function call in equation".to_string()))?;
                let call: String = chars[start..=close].iter().collect();
                tokens.push(Token::Function(call));
                i = close + 1;
            }
            other => {
                return Err(AppError::InvalidSearchQuery(format!(
                    "unexpected character '{other}' in equation"
                )))
            }
        }
    }
    Ok(tokens)
}

fn push_op(tokens: &mut Vec<Token>, op: ArithOp, i: &mut usize) {
    tokens.push(Token::Op(op));
    *i += 1;
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn expression(&mut self) -> AppResult<Expr> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ (ArithOp::Add | ArithOp::Sub))) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> AppResult<Expr> {
        let mut lhs = self.factor()?;
        while let Some(Token::Op(op @ (ArithOp::Mul | ArithOp::Div))) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> AppResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(AppError::InvalidSearchQuery(format!(
                "equation nests deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        let result = self.nested_factor();
        self.depth -= 1;
        result
    }

    fn nested_factor(&mut self) -> AppResult<Expr> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| AppError::InvalidSearchQuery("equation ends unexpectedly".to_string()))?;
        self.pos += 1;
        match token {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Function(call) => Ok(Expr::Function(call)),
            Token::Op(ArithOp::Sub) => match self.factor()? {
                Expr::Number(value) => Ok(Expr::Number(-value)),
                other => Ok(Expr::Binary {
                    op: ArithOp::Mul,
                    lhs: Box::new(Expr::Number(-1.0)),
                    rhs: Box::new(other),
                }),
            },
            Token::Open => {
                let inner = self.expression()?;
                match self.tokens.get(self.pos) {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(AppError::InvalidSearchQuery("missing ')' in equation".to_string())),
                }
            }
            Token::Op(_) | Token::Close => Err(AppError::InvalidSearchQuery(
                "unexpected operator in equation".to_string(),
            )),
        }
    }
}

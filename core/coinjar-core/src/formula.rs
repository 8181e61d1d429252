//! Restricted arithmetic for slider scoring.
//!
//! Grammar (whitespace-insensitive):
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := '-' unary | atom
//! atom   := number | 'value' | 'weight' | '(' expr ')'
//! ```
//!
//! Nothing else is evaluated. Nesting and operator count are capped so a
//! hostile config value can't exhaust the stack.

use std::fmt;
use std::str::FromStr;

use crate::error::FormulaError;

/// Parentheses plus unary minus open at once.
pub const MAX_NESTING: usize = 32;
/// Operators in the whole expression. Bounds the tree depth seen by `eval`.
pub const MAX_OPERATORS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Value,
    Weight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(Variable),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, value: f64, weight: f64) -> f64 {
        match self {
            Expr::Number(number) => *number,
            Expr::Var(Variable::Value) => value,
            Expr::Var(Variable::Weight) => weight,
            Expr::Neg(inner) => -inner.eval(value, weight),
            Expr::Binary(op, lhs, rhs) => {
                let (lhs, rhs) = (lhs.eval(value, weight), rhs.eval(value, weight));
                match op {
                    BinaryOp::Add => lhs + rhs,
                    BinaryOp::Sub => lhs - rhs,
                    BinaryOp::Mul => lhs * rhs,
                    BinaryOp::Div => lhs / rhs,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let mut parser = Parser {
            chars: source.char_indices().collect(),
            pos: 0,
            depth: 0,
            operators: 0,
        };
        let expr = parser.expr()?;
        parser.skip_whitespace();
        if let Some((offset, _)) = parser.peek_raw() {
            return Err(FormulaError::TrailingInput(offset));
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, value: f64, weight: f64) -> Result<f64, FormulaError> {
        let result = self.expr.eval(value, weight);
        if result.is_finite() {
            Ok(result)
        } else {
            Err(FormulaError::NotFinite)
        }
    }
}

/// `value * weight`
impl Default for Formula {
    fn default() -> Self {
        Self {
            source: crate::record::DEFAULT_SLIDER_FORMULA.to_string(),
            expr: Expr::Binary(
                BinaryOp::Mul,
                Box::new(Expr::Var(Variable::Value)),
                Box::new(Expr::Var(Variable::Weight)),
            ),
        }
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(FormulaError::TooComplex { limit: MAX_NESTING });
        }
        Ok(())
    }

    fn count_operator(&mut self) -> Result<(), FormulaError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(FormulaError::TooComplex {
                limit: MAX_OPERATORS,
            });
        }
        Ok(())
    }

    fn peek_raw(&self) -> Option<(usize, char)> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_raw(), Some((_, c)) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.peek_raw().map(|(_, c)| c)
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            self.count_operator()?;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            self.count_operator()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if self.peek() == Some('-') {
            self.pos += 1;
            self.count_operator()?;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, FormulaError> {
        self.skip_whitespace();
        let Some((offset, c)) = self.peek_raw() else {
            return Err(FormulaError::UnexpectedEnd);
        };
        match c {
            '(' => {
                self.pos += 1;
                self.descend()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.peek() {
                    Some(')') => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    Some(_) => {
                        let (position, found) = self.peek_raw().unwrap_or((offset, c));
                        Err(FormulaError::UnexpectedChar { found, position })
                    }
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            c if c.is_ascii_digit() || c == '.' => self.number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.identifier(),
            found => Err(FormulaError::UnexpectedChar {
                found,
                position: offset,
            }),
        }
    }

    fn take_while(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some((_, c)) = self.peek_raw() {
            if !accept(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn number(&mut self) -> Result<Expr, FormulaError> {
        let start = self.peek_raw().map(|(offset, _)| offset).unwrap_or_default();
        let literal = self.take_while(|c| c.is_ascii_digit() || c == '.');
        literal
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| FormulaError::UnexpectedChar {
                found: '.',
                position: start,
            })
    }

    fn identifier(&mut self) -> Result<Expr, FormulaError> {
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        match name.as_str() {
            "value" => Ok(Expr::Var(Variable::Value)),
            "weight" => Ok(Expr::Var(Variable::Weight)),
            _ => Err(FormulaError::UnknownIdentifier(name)),
        }
    }
}

//! Statement parser
//!
//! ```text
//! statement := FILTER [TOP n] table WHERE condition [ORDER BY column [ASC|DESC], ...]
//!            | identifier
//! condition := or
//! or        := and (OR and)*
//! and       := not (AND not)*
//! not       := NOT not | predicate
//! predicate := operand [IS [NOT] NULL | [NOT] LIKE operand | [NOT] IN (operand, ...)
//!                      | compare operand]
//! operand   := '(' condition ')' | literal | column
//! ```

use super::lexer::{split_statements, tokenize, Spanned, Token};
use crate::value::parse_guid;
use crate::{FilterError, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterStatement {
    /// Negative means unlimited
    pub top: Option<i64>,
    pub table: String,
    pub condition: Expr,
    pub order_by: Vec<OrderBy>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Filter(FilterStatement),
    /// Bare signal identifier
    SignalId(Uuid),
    /// Bare measurement key or point tag
    Key(String),
}

impl Statement {
    /// Table this statement addresses, `None` for bare identifiers
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Filter(filter) => Some(&filter.table),
            _ => None,
        }
    }
}

pub fn parse_expression(expression: &str) -> Result<Vec<Statement>, FilterError> {
    split_statements(expression)
        .into_iter()
        .map(|(offset, text)| parse_statement(text, offset))
        .collect()
}

fn parse_statement(text: &str, offset: usize) -> Result<Statement, FilterError> {
    let trimmed = text.trim();
    let is_filter = trimmed
        .split_whitespace()
        .next()
        .map(|word| word.eq_ignore_ascii_case("FILTER"))
        .unwrap_or(false);

    if !is_filter {
        let bare = trimmed.trim_matches(|c| c == '\'' || c == '"');
        return Ok(match parse_guid(bare) {
            Some(id) => Statement::SignalId(id),
            None => Statement::Key(bare.to_string()),
        });
    }

    let tokens = tokenize(text).map_err(|e| shift(e, offset))?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };

    parser
        .filter_statement()
        .map(Statement::Filter)
        .map_err(|e| shift(e, offset))
}

fn shift(error: FilterError, offset: usize) -> FilterError {
    match error {
        FilterError::Parse { message, position } => FilterError::Parse {
            message,
            position: position + offset,
        },
        other => other,
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.position).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::parse(message, self.position())
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek().map(|t| t.is_keyword(keyword)).unwrap_or(false)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), FilterError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", keyword)))
        }
    }

    fn expect(&mut self, token: Token, describe: &str) -> Result<(), FilterError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {}", describe)))
        }
    }

    fn identifier(&mut self, describe: &str) -> Result<String, FilterError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", describe))),
        }
    }

    fn filter_statement(&mut self) -> Result<FilterStatement, FilterError> {
        self.expect_keyword("FILTER")?;

        let top = if self.eat_keyword("TOP") {
            let negative = self.peek() == Some(&Token::Minus);
            if negative {
                self.pos += 1;
            }
            match self.next() {
                Some(Token::Number(n)) if n.fract() == 0.0 => {
                    Some(if negative { -(n as i64) } else { n as i64 })
                }
                _ => return Err(self.error("expected integer after TOP")),
            }
        } else {
            None
        };

        let table = self.identifier("table name")?;
        self.expect_keyword("WHERE")?;
        let condition = self.or()?;

        let mut order_by = Vec::new();
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let column = self.identifier("column name in ORDER BY")?;
                let descending = if self.eat_keyword("DESC") {
                    true
                } else {
                    self.eat_keyword("ASC");
                    false
                };
                order_by.push(OrderBy { column, descending });

                if self.peek() != Some(&Token::Comma) {
                    break;
                }
                self.pos += 1;
            }
        }

        if self.peek().is_some() {
            return Err(self.error("unexpected input after statement"));
        }

        Ok(FilterStatement {
            top,
            table,
            condition,
            order_by,
        })
    }

    fn or(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) || self.at_keyword("OR") {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.not()?;
        while self.peek() == Some(&Token::And) || self.at_keyword("AND") {
            self.pos += 1;
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, FilterError> {
        if self.peek() == Some(&Token::Bang) || self.at_keyword("NOT") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expr, FilterError> {
        let left = self.operand()?;

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = self.eat_keyword("NOT");

        if self.eat_keyword("LIKE") {
            let pattern = self.operand()?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }

        if self.eat_keyword("IN") {
            self.expect(Token::LParen, "'(' after IN")?;
            let mut list = vec![self.operand()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                list.push(self.operand()?);
            }
            self.expect(Token::RParen, "')' to close IN list")?;
            return Ok(Expr::In {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        if negated {
            return Err(self.error("expected LIKE or IN after NOT"));
        }

        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::NotEq) => CompareOp::NotEq,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::LtEq) => CompareOp::LtEq,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::GtEq) => CompareOp::GtEq,
            _ => return Ok(left),
        };
        self.pos += 1;

        let right = self.operand()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn operand(&mut self) -> Result<Expr, FilterError> {
        let position = self.position();

        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Minus) => match self.next() {
                Some(Token::Number(n)) => Ok(Expr::Literal(number(-n))),
                _ => Err(FilterError::parse("expected number after '-'", position)),
            },
            Some(Token::Ident(name)) => Ok(match name.to_ascii_uppercase().as_str() {
                "TRUE" => Expr::Literal(Value::Boolean(true)),
                "FALSE" => Expr::Literal(Value::Boolean(false)),
                "NULL" => Expr::Literal(Value::Null),
                _ => Expr::Column(name),
            }),
            Some(_) => Err(FilterError::parse("unexpected token", position)),
            None => Err(FilterError::parse("unexpected end of expression", position)),
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i32::MAX as f64 {
        Value::Int32(n as i32)
    } else {
        Value::Double(n)
    }
}

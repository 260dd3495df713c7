//! Tokenizer for FILTER statements

use crate::FilterError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier or keyword; bracketed names arrive without brackets
    Ident(String),
    Str(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Bang,
    Minus,
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(name) if name.eq_ignore_ascii_case(keyword))
    }
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, FilterError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let start = pos;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let token = match c {
            b'(' => {
                pos += 1;
                Token::LParen
            }
            b')' => {
                pos += 1;
                Token::RParen
            }
            b',' => {
                pos += 1;
                Token::Comma
            }
            b'-' => {
                pos += 1;
                Token::Minus
            }
            b'=' => {
                pos += if bytes.get(pos + 1) == Some(&b'=') { 2 } else { 1 };
                Token::Eq
            }
            b'!' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    Token::NotEq
                } else {
                    pos += 1;
                    Token::Bang
                }
            }
            b'<' => match bytes.get(pos + 1) {
                Some(b'=') => {
                    pos += 2;
                    Token::LtEq
                }
                Some(b'>') => {
                    pos += 2;
                    Token::NotEq
                }
                _ => {
                    pos += 1;
                    Token::Lt
                }
            },
            b'>' => {
                if bytes.get(pos + 1) == Some(&b'=') {
                    pos += 2;
                    Token::GtEq
                } else {
                    pos += 1;
                    Token::Gt
                }
            }
            b'&' if bytes.get(pos + 1) == Some(&b'&') => {
                pos += 2;
                Token::And
            }
            b'|' if bytes.get(pos + 1) == Some(&b'|') => {
                pos += 2;
                Token::Or
            }
            b'\'' | b'"' => {
                let (text, next) = read_quoted(input, pos, c)?;
                pos = next;
                Token::Str(text)
            }
            b'[' => {
                let end = input[pos + 1..]
                    .find(']')
                    .ok_or_else(|| FilterError::parse("unterminated bracketed identifier", start))?;
                let name = input[pos + 1..pos + 1 + end].to_string();
                pos += end + 2;
                Token::Ident(name)
            }
            b'0'..=b'9' | b'.' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                    pos += 1;
                }
                let text = &input[start..pos];
                let value = text
                    .parse::<f64>()
                    .map_err(|_| FilterError::parse(format!("invalid number \"{}\"", text), start))?;
                Token::Number(value)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                    pos += 1;
                }
                Token::Ident(input[start..pos].to_string())
            }
            _ => {
                let found = input[start..].chars().next().unwrap_or('?');
                return Err(FilterError::parse(
                    format!("unexpected character '{}'", found),
                    start,
                ));
            }
        };

        tokens.push(Spanned {
            token,
            position: start,
        });
    }

    Ok(tokens)
}

/// Read a quoted literal; a doubled quote escapes itself
fn read_quoted(input: &str, start: usize, quote: u8) -> Result<(String, usize), FilterError> {
    let bytes = input.as_bytes();
    let mut text = Vec::new();
    let mut pos = start + 1;

    while pos < bytes.len() {
        if bytes[pos] == quote {
            if bytes.get(pos + 1) == Some(&quote) {
                text.push(quote);
                pos += 2;
                continue;
            }
            let text = String::from_utf8(text)
                .map_err(|_| FilterError::parse("invalid text in literal", start))?;
            return Ok((text, pos + 1));
        }
        text.push(bytes[pos]);
        pos += 1;
    }

    Err(FilterError::parse("unterminated string literal", start))
}

/// Split an expression into statements on `;`, ignoring separators inside quotes
pub fn split_statements(expression: &str) -> Vec<(usize, &str)> {
    let mut statements = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in expression.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, ';') => {
                statements.push((start, &expression[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    statements.push((start, &expression[start..]));

    statements
        .into_iter()
        .filter(|(_, s)| !s.trim().is_empty())
        .collect()
}

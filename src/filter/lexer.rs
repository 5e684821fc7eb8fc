//! Tokenizer for filter strings.
//!
//! The token stream is context sensitive. Directly after `(` the next byte
//! decides between a composite operator (`&`, `|`, `!`), a nested `(`, or an
//! item. An item is lexed in one step into `Attribute`, `Operator` and
//! `Value` tokens, because everything after the operator up to the next `)`
//! belongs to the value, operator characters included.

use std::collections::VecDeque;

use super::FilterError;

/// Comparison operator of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Equal,
    GreaterOrEqual,
    LessOrEqual,
    Approx,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Attribute(String),
    Operator(CompareOp),
    Value(String),
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Set right after `(` has been consumed.
    open: bool,
    pending: VecDeque<Spanned>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            open: false,
            pending: VecDeque::new(),
        }
    }

    /// Unconsumed input. Only meaningful when no lexed token is pending.
    pub fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub fn next_token(&mut self) -> Result<Option<Spanned>, FilterError> {
        if let Some(spanned) = self.pending.pop_front() {
            return Ok(Some(spanned));
        }

        let bytes = self.input.as_bytes();
        let Some(&byte) = bytes.get(self.pos) else {
            return Ok(None);
        };
        let position = self.pos;

        let token = match (self.open, byte) {
            (_, b'(') => {
                self.pos += 1;
                self.open = true;
                Token::LParen
            },
            (_, b')') => {
                self.pos += 1;
                self.open = false;
                Token::RParen
            },
            (true, b'&') => self.single(Token::And),
            (true, b'|') => self.single(Token::Or),
            (true, b'!') => self.single(Token::Not),
            (true, _) => {
                self.open = false;
                return self.item(position).map(Some);
            },
            (false, _) => {
                let found = self.input[position..].chars().next().unwrap_or_default();
                return Err(FilterError::Unexpected { found, position });
            },
        };

        Ok(Some(Spanned { token, position }))
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        self.open = false;
        token
    }

    /// Lexes `attribute op value` up to, not including, the closing `)`.
    fn item(&mut self, start: usize) -> Result<Spanned, FilterError> {
        let bytes = self.input.as_bytes();
        let mut i = start;

        let (op, width) = loop {
            match bytes.get(i) {
                None => return Err(FilterError::UnexpectedEnd),
                Some(b')') => return Err(FilterError::Parse { position: start }),
                Some(b'=') => break (CompareOp::Equal, 1),
                Some(b'>') if bytes.get(i + 1) == Some(&b'=') => {
                    break (CompareOp::GreaterOrEqual, 2)
                },
                Some(b'<') if bytes.get(i + 1) == Some(&b'=') => break (CompareOp::LessOrEqual, 2),
                Some(b'~') if bytes.get(i + 1) == Some(&b'=') => break (CompareOp::Approx, 2),
                Some(_) => i += 1,
            }
        };

        let value_start = i + width;
        let value_end = self.input[value_start..]
            .find(')')
            .map(|offset| value_start + offset)
            .ok_or(FilterError::UnexpectedEnd)?;

        self.pending.push_back(Spanned {
            token: Token::Operator(op),
            position: i,
        });
        self.pending.push_back(Spanned {
            token: Token::Value(self.input[value_start..value_end].to_string()),
            position: value_start,
        });
        self.pos = value_end;

        Ok(Spanned {
            token: Token::Attribute(self.input[start..i].to_string()),
            position: start,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(input: &str) -> Result<Vec<Token>, FilterError> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        while let Some(spanned) = lexer.next_token()? {
            out.push(spanned.token);
        }
        Ok(out)
    }

    #[test]
    fn lexes_simple_item() {
        assert_eq!(
            tokens("(name=foo)").unwrap(),
            vec![
                Token::LParen,
                Token::Attribute("name".into()),
                Token::Operator(CompareOp::Equal),
                Token::Value("foo".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn value_keeps_operator_characters() {
        assert_eq!(
            tokens("(a>=b=c<=d)").unwrap(),
            vec![
                Token::LParen,
                Token::Attribute("a".into()),
                Token::Operator(CompareOp::GreaterOrEqual),
                Token::Value("b=c<=d".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn composite_operators_only_after_open_paren() {
        assert_eq!(
            tokens("(&(a~=1))").unwrap(),
            vec![
                Token::LParen,
                Token::And,
                Token::LParen,
                Token::Attribute("a".into()),
                Token::Operator(CompareOp::Approx),
                Token::Value("1".into()),
                Token::RParen,
                Token::RParen,
            ]
        );
        assert_eq!(
            tokens("(a=1)&"),
            Err(FilterError::Unexpected {
                found: '&',
                position: 5
            })
        );
    }

    #[test]
    fn lone_angle_bracket_belongs_to_attribute() {
        assert_eq!(
            tokens("(a>b=1)").unwrap()[1],
            Token::Attribute("a>b".into())
        );
    }

    #[test]
    fn item_errors() {
        assert_eq!(tokens("(abc"), Err(FilterError::UnexpectedEnd));
        assert_eq!(tokens("(abc=1"), Err(FilterError::UnexpectedEnd));
        assert_eq!(tokens("(abc)"), Err(FilterError::Parse { position: 1 }));
    }
}

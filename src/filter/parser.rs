//! Recursive-descent parser over the [`Lexer`](super::lexer::Lexer) tokens.
//!
//! Grammar (EBNF, after percent-decoding):
//!
//! ```text
//! filter    = "(" body ")" ;
//! body      = "&" { filter }
//!           | "|" { filter }
//!           | "!" filter
//!           | "(" body ")"
//!           | item ;
//! item      = attribute operator value ;
//! operator  = "=" | ">=" | "<=" | "~=" ;
//! attribute = { any byte except ")" and the start of an operator } ;
//! value     = { any byte except ")" } ;
//! ```
//!
//! The outermost `filter` must consume the whole input. A `"(" body ")"`
//! body accepts redundant parentheses such as `((a=1))`.
//!
//! Equality values are refined after parsing:
//!
//! | value     | operator            | operand |
//! |-----------|---------------------|---------|
//! | `*`       | `Present`           | none    |
//! | `*mid*`   | `Substrings`        | `mid`   |
//! | `*suffix` | `SubstringsPrefix`  | `suffix`|
//! | `prefix*` | `SubstringsPostfix` | `prefix`|
//! | otherwise | `EqualityMatch`     | value   |

use super::ast::{FilterNode, FilterOp};
use super::lexer::{CompareOp, Lexer, Spanned, Token};
use super::FilterError;

/// Parses a percent-decoded filter string.
pub(crate) fn parse(input: &str) -> Result<FilterNode, FilterError> {
    if !input.starts_with('(') {
        return Err(FilterError::NotLParen);
    }

    let mut parser = Parser {
        lexer: Lexer::new(input),
        peeked: None,
    };
    let node = parser.filter()?;

    let extra = parser.lexer.remaining();
    if !extra.is_empty() {
        return Err(FilterError::ExtraInput {
            extra: extra.to_string(),
        });
    }

    Ok(node)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Spanned>,
}

impl Parser<'_> {
    fn next(&mut self) -> Result<Spanned, FilterError> {
        match self.peeked.take() {
            Some(spanned) => Ok(spanned),
            None => self.lexer.next_token()?.ok_or(FilterError::UnexpectedEnd),
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>, FilterError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref().map(|s| &s.token))
    }

    fn filter(&mut self) -> Result<FilterNode, FilterError> {
        self.expect_lparen()?;
        let node = self.body()?;
        self.expect_rparen()?;
        Ok(node)
    }

    fn body(&mut self) -> Result<FilterNode, FilterError> {
        let Spanned { token, position } = self.next()?;
        match token {
            Token::And => Ok(FilterNode::and(self.set()?)),
            Token::Or => Ok(FilterNode::or(self.set()?)),
            Token::Not => Ok(FilterNode::not(self.filter()?)),
            Token::LParen => {
                let node = self.body()?;
                self.expect_rparen()?;
                Ok(node)
            },
            Token::Attribute(attribute) => self.item(attribute),
            Token::RParen | Token::Operator(_) | Token::Value(_) => {
                Err(FilterError::Parse { position })
            },
        }
    }

    fn set(&mut self) -> Result<Vec<FilterNode>, FilterError> {
        let mut children = Vec::new();
        while let Some(Token::LParen) = self.peek()? {
            children.push(self.filter()?);
        }
        Ok(children)
    }

    fn item(&mut self, attribute: String) -> Result<FilterNode, FilterError> {
        let op = match self.next()? {
            Spanned {
                token: Token::Operator(op),
                ..
            } => op,
            Spanned { position, .. } => return Err(FilterError::Parse { position }),
        };
        let value = match self.next()? {
            Spanned {
                token: Token::Value(value),
                ..
            } => value,
            Spanned { position, .. } => return Err(FilterError::Parse { position }),
        };
        Ok(refine(attribute, op, value))
    }

    fn expect_lparen(&mut self) -> Result<(), FilterError> {
        match self.next()? {
            Spanned {
                token: Token::LParen,
                ..
            } => Ok(()),
            Spanned { position, .. } => Err(FilterError::Parse { position }),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), FilterError> {
        match self.next()? {
            Spanned {
                token: Token::RParen,
                ..
            } => Ok(()),
            Spanned { position, .. } => Err(FilterError::Parse { position }),
        }
    }
}

fn refine(attribute: String, op: CompareOp, value: String) -> FilterNode {
    match op {
        CompareOp::GreaterOrEqual => FilterNode::leaf(FilterOp::GreaterOrEqual, attribute, value),
        CompareOp::LessOrEqual => FilterNode::leaf(FilterOp::LessOrEqual, attribute, value),
        CompareOp::Approx => FilterNode::leaf(FilterOp::ApproxMatch, attribute, value),
        CompareOp::Equal => {
            let len = value.len();
            let starts = value.starts_with('*');
            let ends = value.ends_with('*');
            if value == "*" {
                FilterNode::leaf(FilterOp::Present, attribute, "")
            } else if starts && ends && len > 2 {
                FilterNode::leaf(FilterOp::Substrings, attribute, &value[1..len - 1])
            } else if starts && len > 1 {
                FilterNode::leaf(FilterOp::SubstringsPrefix, attribute, &value[1..])
            } else if ends && len > 1 {
                FilterNode::leaf(FilterOp::SubstringsPostfix, attribute, &value[..len - 1])
            } else {
                FilterNode::leaf(FilterOp::EqualityMatch, attribute, value)
            }
        },
    }
}

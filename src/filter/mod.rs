//! Filter predicate compiler.
//!
//! Filters use an LDAP-like prefix syntax and arrive URL-encoded in a query
//! string. [`compile`] decodes, tokenizes and parses them into an immutable
//! [`Filter`] that can be shared across tasks and evaluated against any
//! [`Filterable`] record.
//!
//! # Examples
//!
//! ```
//! use volplane::filter::{compile, FilterOp};
//!
//! let filter = compile("(%26(name=db*)(size>=10))").unwrap();
//! assert_eq!(filter.root().op(), FilterOp::And);
//! assert_eq!(filter.root().children().len(), 2);
//! ```

mod ast;
mod lexer;
mod parser;

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use ast::{FilterNode, FilterOp};

/// Errors produced while compiling a filter string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The decoded filter does not begin with `(`
    #[error("filter does not start with an '('")]
    NotLParen,

    /// Input ended inside a filter
    #[error("unexpected end of filter")]
    UnexpectedEnd,

    /// An item has no operator, or a token appeared where it cannot
    #[error("error parsing filter at byte {position}")]
    Parse {
        /// Byte offset of the offending token in the decoded filter
        position: usize,
    },

    /// A character that is not `(` or `)` appeared between filters
    #[error("unexpected character '{found}' at byte {position}")]
    Unexpected {
        /// The offending character
        found: char,
        /// Byte offset in the decoded filter
        position: usize,
    },

    /// The outer filter closed before the end of the input
    #[error("finished compiling filter with extra at end: '{extra}'")]
    ExtraInput {
        /// The unconsumed remainder
        extra: String,
    },

    /// Percent-decoding produced invalid UTF-8
    #[error("invalid filter encoding: {0}")]
    Decode(String),
}

/// A compiled, immutable filter.
///
/// Cloning is cheap; the tree is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: Arc<str>,
    root: Arc<FilterNode>,
}

impl Filter {
    /// The decoded source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &FilterNode {
        &self.root
    }

    /// Evaluates the filter against a record.
    pub fn matches<T: Filterable + ?Sized>(&self, record: &T) -> bool {
        self.root.matches(record)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles a URL-encoded filter string.
///
/// `+` decodes to a space, as in a query string.
pub fn compile(encoded: &str) -> Result<Filter, FilterError> {
    let plus_decoded = encoded.replace('+', " ");
    let decoded =
        urlencoding::decode(&plus_decoded).map_err(|e| FilterError::Decode(e.to_string()))?;
    let root = parser::parse(&decoded)?;
    tracing::trace!(filter = %decoded, op = %root.op(), "compiled filter");
    Ok(Filter {
        source: Arc::from(decoded.as_ref()),
        root: Arc::new(root),
    })
}

/// A record whose attributes a filter can inspect.
///
/// Attribute names are matched case-insensitively by implementors. A
/// missing attribute makes every leaf on it evaluate to `false`.
pub trait Filterable {
    fn attribute(&self, name: &str) -> Option<Cow<'_, str>>;
}

impl FilterNode {
    /// Evaluates this node against a record.
    ///
    /// String comparisons ignore case. `>=` and `<=` compare numerically when
    /// both sides parse as numbers and lexically otherwise. `~=` compares
    /// after dropping whitespace, `-` and `_`.
    pub fn matches<T: Filterable + ?Sized>(&self, record: &T) -> bool {
        match self.op() {
            FilterOp::And => self.children().iter().all(|c| c.matches(record)),
            FilterOp::Or => self.children().iter().any(|c| c.matches(record)),
            FilterOp::Not => !self.children().iter().all(|c| c.matches(record)),
            op => {
                let Some(actual) = record.attribute(self.left()) else {
                    return false;
                };
                leaf_matches(op, &actual, self.right())
            },
        }
    }
}

fn leaf_matches(op: FilterOp, actual: &str, expected: &str) -> bool {
    let actual_lc = actual.to_lowercase();
    let expected_lc = expected.to_lowercase();
    match op {
        FilterOp::Present => !actual.is_empty(),
        FilterOp::EqualityMatch => actual_lc == expected_lc,
        FilterOp::Substrings => actual_lc.contains(&expected_lc),
        FilterOp::SubstringsPrefix => actual_lc.ends_with(&expected_lc),
        FilterOp::SubstringsPostfix => actual_lc.starts_with(&expected_lc),
        FilterOp::GreaterOrEqual => compare(actual, expected) != Ordering::Less,
        FilterOp::LessOrEqual => compare(actual, expected) != Ordering::Greater,
        FilterOp::ApproxMatch => normalize(actual) == normalize(expected),
        FilterOp::And | FilterOp::Or | FilterOp::Not => false,
    }
}

fn compare(actual: &str, expected: &str) -> Ordering {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.to_lowercase().cmp(&expected.to_lowercase()),
    }
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

//! Compiled filter tree.

use serde::Serialize;
use std::fmt;

/// Operator of a [`FilterNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    /// Every child must match.
    And,
    /// At least one child must match.
    Or,
    /// The single child must not match.
    Not,
    /// `attr=value`
    EqualityMatch,
    /// `attr=*value*`: the attribute contains the value.
    Substrings,
    /// `attr=*value`: the wildcard is the prefix, so the attribute ends with the value.
    SubstringsPrefix,
    /// `attr=value*`: the wildcard is the postfix, so the attribute starts with the value.
    SubstringsPostfix,
    /// `attr>=value`
    GreaterOrEqual,
    /// `attr<=value`
    LessOrEqual,
    /// `attr=*`
    Present,
    /// `attr~=value`
    ApproxMatch,
}

impl FilterOp {
    /// Returns `true` for `And`, `Or` and `Not`.
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Not)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::And => "And",
            Self::Or => "Or",
            Self::Not => "Not",
            Self::EqualityMatch => "Equality Match",
            Self::Substrings => "Substrings",
            Self::SubstringsPrefix => "Substrings Prefix",
            Self::SubstringsPostfix => "Substrings Postfix",
            Self::GreaterOrEqual => "Greater Or Equal",
            Self::LessOrEqual => "Less Or Equal",
            Self::Present => "Present",
            Self::ApproxMatch => "Approx Match",
        };
        f.write_str(name)
    }
}

/// One node of a compiled filter.
///
/// Leaves carry the attribute name in `left` and the operand in `right`.
/// Composite nodes carry their operands in `children`. A node is never
/// mutated after the parser builds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterNode {
    op: FilterOp,
    #[serde(skip_serializing_if = "String::is_empty")]
    left: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    right: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<FilterNode>,
}

impl FilterNode {
    /// Builds a leaf node.
    pub fn leaf(op: FilterOp, left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            op,
            left: left.into(),
            right: right.into(),
            children: Vec::new(),
        }
    }

    /// Builds an `And` node.
    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::composite(FilterOp::And, children)
    }

    /// Builds an `Or` node.
    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::composite(FilterOp::Or, children)
    }

    /// Builds a `Not` node around exactly one child.
    pub fn not(child: FilterNode) -> Self {
        Self::composite(FilterOp::Not, vec![child])
    }

    fn composite(op: FilterOp, children: Vec<FilterNode>) -> Self {
        Self {
            op,
            left: String::new(),
            right: String::new(),
            children,
        }
    }

    pub fn op(&self) -> FilterOp {
        self.op
    }

    /// Attribute name of a leaf; empty for composite nodes.
    pub fn left(&self) -> &str {
        &self.left
    }

    /// Operand of a leaf with wildcards removed; empty for `Present`.
    pub fn right(&self) -> &str {
        &self.right
    }

    pub fn children(&self) -> &[FilterNode] {
        &self.children
    }
}

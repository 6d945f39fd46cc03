//! The condition AST shape the (external, black-box) DSL compiler must
//! lower policy bodies into.
//!
//! This crate does not parse DSL text — that is the compiler's job. It
//! owns only the node shapes the evaluator walks, so the compiler and the
//! evaluator share one vocabulary without either depending on the other's
//! internals.

use serde::{Deserialize, Serialize};

/// A reference to an attribute, e.g. `principal.character.role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrRef {
    /// `principal`, `resource`, `environment`, or `action`.
    pub root: String,
    /// The provider namespace, e.g. `character`. Empty for `action` refs,
    /// which are not namespaced.
    #[serde(default)]
    pub namespace: String,
    pub key: String,
}

impl AttrRef {
    #[must_use]
    pub fn new(root: impl Into<String>, namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

/// A literal value appearing in a condition (comparison operand, `in`
/// list member, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    List(Vec<Value>),
    Attr(AttrRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One node of a compiled condition block.
///
/// The evaluator treats this purely as data: walking it never allocates
/// beyond what `Vec`/`Box` already hold, and never performs I/O.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    /// A boolean literal, e.g. the compiler's lowering of an always-true
    /// or always-false block flagged as a warning at compile time.
    Literal(bool),
    Compare {
        op: CompareOp,
        lhs: Value,
        rhs: Value,
    },
    /// `lhs like "pattern"` — `pattern` must already have been validated
    /// and registered in the owning [`crate::policy::CompiledPolicy`]'s
    /// glob cache by the compiler.
    Like { lhs: Value, pattern: String },
    /// `has <root>.<namespace>.<key>`.
    Has(AttrRef),
    /// `lhs in [a, b, c]` or `lhs in <attr-list>`.
    In { lhs: Value, list: Value },
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    If {
        condition: Box<Condition>,
        then_branch: Box<Condition>,
        else_branch: Box<Condition>,
    },
}

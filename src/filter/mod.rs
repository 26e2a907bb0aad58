//! Filter expression compilation and matching
//!
//! A filter is compiled once into a decision tree and then evaluated against
//! every session by all workers.
//!
//! # Syntax
//!
//! ```text
//! [has|is] [not|no] <field> [<operator>] [<value>]
//! <condition> and <condition>       both must match
//! <condition> or <condition>        either must match
//! ( ... )                           grouping
//! ```
//!
//! `and` is split first, so `a or b and c` means `(a or b) and c`. Use
//! parentheses to group differently.
//!
//! With only a field the condition tests that the field is set. With a field
//! and a value it tests equality. A `!` before the operator reverses its
//! result and for text fields a `#` makes the comparison case-insensitive.
//! A value written as `|template|` is rendered for each session first.
//!
//! # Examples
//!
//! ```text
//! host 10.0.0.1                          # any of the session's addresses
//! shost in 192.168.0.0/16 and dport 443
//! rate[sum] > 10 Mbps
//! proto udp and not offload
//! user #contains admin
//! sport > |${dp}|                        # source port above destination port
//! custom srcnet = 10.1.1.0/24
//! ```

pub mod compare;
pub mod error;
pub mod field;
pub mod matcher;
pub mod parser;

pub use error::FilterParseError;
pub use field::Field;
pub use parser::{Check, FilterNode, Predicate};

use crate::parser::Session;
use crate::request::FieldRequest;
use std::fmt;
use tracing::debug;

/// A compiled filter expression
#[derive(Debug, Clone)]
pub struct Filter {
    expression: String,
    root: FilterNode,
}

impl Filter {
    /// Compiles `expression`, adding the session data it reads to `request`
    pub fn compile(expression: &str, request: &mut FieldRequest) -> Result<Self, FilterParseError> {
        let root = parser::parse_expression(expression, request)?;
        debug!("Compiled filter:\n{}", root.dump_pretty());

        Ok(Filter {
            expression: expression.trim().to_string(),
            root,
        })
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.root.matches(session)
    }

    pub fn root(&self) -> &FilterNode {
        &self.root
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn dump_pretty(&self) -> String {
        self.root.dump_pretty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

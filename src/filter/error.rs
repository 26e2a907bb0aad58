use crate::render::TemplateError;
use thiserror::Error;

/// Errors that can occur when compiling filter expressions
#[derive(Debug, Error)]
pub enum FilterParseError {
    #[error("Empty filter expression")]
    Empty,

    #[error("Unbalanced parentheses in filter: '{0}'")]
    UnbalancedParentheses(String),

    #[error("Cannot parse filter condition: '{0}'")]
    InvalidExpression(String),

    #[error("Unknown filter field: '{0}'")]
    UnknownField(String),

    #[error("Missing name after 'custom' in '{0}'")]
    MissingCustomName(String),

    #[error("Field '{0}' needs a value to compare with")]
    MissingValue(String),

    #[error("Unknown operator '{operator}' for field '{field}'")]
    UnknownOperator { field: String, operator: String },

    #[error("Invalid number '{value}' for field '{field}'")]
    InvalidNumber { field: String, value: String },

    #[error("Invalid IP address: '{0}'")]
    InvalidAddress(String),

    #[error("Invalid network in CIDR notation: '{0}'")]
    InvalidNetwork(String),

    #[error("Invalid rate '{0}', expected '<number> [k|ki|m|mi|g|gi|t|ti](b|B)ps'")]
    InvalidRate(String),

    #[error("Cannot compile nested template: {0}")]
    Template(#[from] TemplateError),
}

use super::compare::{AddressTest, CustomTest, NumberDialect, NumberTest, TextTest};
use super::error::FilterParseError;
use super::field::{AddressField, Field, NumberField, RateField, TextField};
use crate::request::FieldRequest;
use regex::Regex;
use std::sync::LazyLock;

static AND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\sand\s").expect("valid and regex"));
static OR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\sor\s").expect("valid or regex"));

/// Compiled decision tree
#[derive(Debug, Clone)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Expression(Predicate),
}

/// A single condition such as `not sport >= 1024`
#[derive(Debug, Clone)]
pub struct Predicate {
    /// Field name as written
    pub field: String,
    /// Operator as written, including `!` and `#` prefixes
    pub operator: String,
    /// Right-hand side as written
    pub value: String,
    /// `not` / `no` before the field
    pub negated: bool,
    /// `!` before the operator
    pub reversed: bool,
    pub check: Check,
}

/// Field selector with its compiled comparison
#[derive(Debug, Clone)]
pub enum Check {
    Address { field: AddressField, test: AddressTest },
    Number { field: NumberField, test: NumberTest },
    Text { field: TextField, test: TextTest },
    Rate { field: RateField, test: NumberTest },
    Custom { key: String, test: CustomTest },
}

/// Compiles `expression` into a decision tree.
///
/// The groups the conditions read are added to `request`, but only when the
/// whole expression compiles.
pub fn parse_expression(
    expression: &str,
    request: &mut FieldRequest,
) -> Result<FilterNode, FilterParseError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(FilterParseError::Empty);
    }
    check_parentheses(expression)?;

    let mut needed = *request;
    let root = parse_group(expression, &mut needed)?;
    request.merge(&needed);
    Ok(root)
}

fn check_parentheses(expression: &str) -> Result<(), FilterParseError> {
    let mut depth = 0i32;
    for c in expression.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            break;
        }
    }

    if depth != 0 {
        return Err(FilterParseError::UnbalancedParentheses(
            expression.to_string(),
        ));
    }
    Ok(())
}

/// `and` binds looser than `or`: `a or b and c` is `(a or b) and c`
fn parse_group(text: &str, request: &mut FieldRequest) -> Result<FilterNode, FilterParseError> {
    let mut and_nodes = Vec::new();

    for and_part in split_top_level(text, &AND_RE) {
        let mut or_nodes = Vec::new();
        for or_part in split_top_level(and_part, &OR_RE) {
            or_nodes.push(parse_operand(or_part, request)?);
        }
        if or_nodes.is_empty() {
            return Err(FilterParseError::InvalidExpression(and_part.to_string()));
        }
        and_nodes.push(collapse(or_nodes, FilterNode::Or));
    }

    if and_nodes.is_empty() {
        return Err(FilterParseError::InvalidExpression(text.to_string()));
    }
    Ok(collapse(and_nodes, FilterNode::And))
}

fn collapse(mut nodes: Vec<FilterNode>, wrap: fn(Vec<FilterNode>) -> FilterNode) -> FilterNode {
    if nodes.len() == 1 {
        if let Some(node) = nodes.pop() {
            return node;
        }
    }
    wrap(nodes)
}

fn parse_operand(text: &str, request: &mut FieldRequest) -> Result<FilterNode, FilterParseError> {
    match strip_outer_parentheses(text) {
        Some(inner) => parse_group(inner, request),
        None => parse_predicate(text, request).map(FilterNode::Expression),
    }
}

/// Inner text when the first `(` is closed by the very last character
fn strip_outer_parentheses(text: &str) -> Option<&str> {
    if !text.starts_with('(') || !text.ends_with(')') {
        return None;
    }

    let mut depth = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth == 0 {
            return (i == text.len() - 1).then(|| &text[1..i]);
        }
    }
    None
}

/// Splits on `delimiter` matches that are not inside parentheses
fn split_top_level<'a>(text: &'a str, delimiter: &Regex) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0;

    for m in delimiter.find_iter(text) {
        if nesting_depth(&text[..m.start()]) > 0 {
            continue;
        }
        parts.push(&text[start..m.start()]);
        start = m.end();
    }
    parts.push(&text[start..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

fn nesting_depth(prefix: &str) -> i32 {
    prefix.chars().fold(0, |depth, c| match c {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}

/// Case-insensitive `word` followed by whitespace, returning what follows
fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let head = text.get(..word.len())?;
    let rest = &text[word.len()..];
    (head.eq_ignore_ascii_case(word) && rest.starts_with(char::is_whitespace))
        .then(|| rest.trim_start())
}

fn split_first_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim()),
        None => (text, ""),
    }
}

/// Parses `[has|is] [not|no] <field>[ <operator> <value>]`
fn parse_predicate(text: &str, request: &mut FieldRequest) -> Result<Predicate, FilterParseError> {
    let mut rest = text.trim();
    if let Some(after) = strip_word(rest, "has").or_else(|| strip_word(rest, "is")) {
        rest = after;
    }

    let negated = match strip_word(rest, "not").or_else(|| strip_word(rest, "no")) {
        Some(after) => {
            rest = after;
            true
        }
        None => false,
    };

    let (field_name, custom_key, tail) = match strip_word(rest, "custom") {
        Some(after) => {
            let (key, tail) = split_first_token(after);
            ("custom", Some(key), tail)
        }
        None => {
            let (name, tail) = split_first_token(rest);
            (name, None, tail)
        }
    };
    if field_name.is_empty() {
        return Err(FilterParseError::InvalidExpression(text.to_string()));
    }

    // two tokens compare for equality, three or more name the operator
    let (operator, value) = match split_first_token(tail) {
        (first, "") => ("", first),
        (first, remainder) => (first, remainder),
    };
    let (reversed, op) = match operator.strip_prefix('!') {
        Some(op) => (true, op),
        None => (false, operator),
    };

    let field: Field = field_name.parse()?;
    if let Some(group) = field.group() {
        request.request(group);
    }

    let check = match field {
        Field::Address(field) => Check::Address {
            field,
            test: AddressTest::compile(field_name, op, value, request)?,
        },
        Field::Number(field) => Check::Number {
            field,
            test: NumberTest::compile(field_name, op, value, field.dialect(), request)?,
        },
        Field::Text(field) => Check::Text {
            field,
            test: TextTest::compile(field_name, op, value, request)?,
        },
        Field::Rate(field) => Check::Rate {
            field,
            test: NumberTest::compile(field_name, op, value, NumberDialect::Rate, request)?,
        },
        Field::Custom => {
            let key = custom_key
                .filter(|key| !key.is_empty())
                .ok_or_else(|| FilterParseError::MissingCustomName(text.to_string()))?;
            Check::Custom {
                key: key.to_string(),
                test: CustomTest::compile(field_name, op, value, request)?,
            }
        }
    };

    let field = match custom_key {
        Some(key) => format!("custom {}", key),
        None => field_name.to_string(),
    };

    Ok(Predicate {
        field,
        operator: operator.to_string(),
        value: value.to_string(),
        negated,
        reversed,
        check,
    })
}

//! Typed comparisons used by filter conditions
//!
//! Every condition compiles its operator and right-hand value up front. The
//! value is either a literal or a `|...|` template that is rendered for each
//! session and converted the same way a literal would be.

use super::error::FilterParseError;
use crate::parser::Session;
use crate::render::Template;
use crate::request::FieldRequest;
use ipnet::IpNet;
use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

/// Right-hand side of a comparison
#[derive(Debug, Clone)]
pub enum Operand<T> {
    Literal(T),
    /// Rendered against each session before comparing
    Template(Template),
}

impl<T: Clone> Operand<T> {
    fn compile(
        raw: &str,
        request: &mut FieldRequest,
        parse: impl FnOnce(&str) -> Result<T, FilterParseError>,
    ) -> Result<Self, FilterParseError> {
        match template_source(raw) {
            Some(format) => Ok(Operand::Template(Template::compile(format, request)?)),
            None => Ok(Operand::Literal(parse(raw)?)),
        }
    }

    /// Value to compare with for this session.
    ///
    /// `None` when a template rendered something that cannot be converted.
    pub fn resolve<'a>(
        &'a self,
        session: &Session,
        parse: impl FnOnce(&str) -> Result<T, FilterParseError>,
    ) -> Option<Cow<'a, T>> {
        match self {
            Operand::Literal(value) => Some(Cow::Borrowed(value)),
            Operand::Template(template) => {
                let rendered = template.format(session);
                match parse(&rendered) {
                    Ok(value) => Some(Cow::Owned(value)),
                    Err(e) => {
                        debug!(
                            "Session 0x{:x}: nested template value \"{}\" not usable: {}",
                            session.serial, rendered, e
                        );
                        None
                    }
                }
            }
        }
    }
}

impl<T: fmt::Display> fmt::Display for Operand<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{}", value),
            Operand::Template(template) => write!(f, "|{}|", template.source()),
        }
    }
}

/// Returns the inner format of a `|...|` value
pub fn template_source(raw: &str) -> Option<&str> {
    if raw.len() > 2 && raw.starts_with('|') && raw.ends_with('|') {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// No operator and no value: the field is set
    NonZero,
}

impl NumberOp {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "" | "=" | "==" | "eq" | "is" => Some(NumberOp::Eq),
            "!=" | "<>" | "ne" | "not" => Some(NumberOp::Ne),
            ">" | "gt" => Some(NumberOp::Gt),
            ">=" | "ge" => Some(NumberOp::Ge),
            "<" | "lt" => Some(NumberOp::Lt),
            "<=" | "le" => Some(NumberOp::Le),
            _ => None,
        }
    }

    pub fn apply(self, left: u64, right: u64) -> bool {
        match self {
            NumberOp::Eq => left == right,
            NumberOp::Ne => left != right,
            NumberOp::Gt => left > right,
            NumberOp::Ge => left >= right,
            NumberOp::Lt => left < right,
            NumberOp::Le => left <= right,
            NumberOp::NonZero => left > 0,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            NumberOp::Eq => "==",
            NumberOp::Ne => "<>",
            NumberOp::Gt => ">",
            NumberOp::Ge => ">=",
            NumberOp::Lt => "<",
            NumberOp::Le => "<=",
            NumberOp::NonZero => "",
        }
    }
}

/// How the right-hand side of a numeric field is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberDialect {
    Plain,
    /// Accepts protocol names such as `tcp`
    Protocol,
    /// Accepts connection state names such as `established`
    Status,
    /// Accepts `internal`
    Policy,
    /// `<number> [unit]`, compared in bytes per second
    Rate,
}

const PROTOCOLS: [(&str, u64); 6] = [
    ("icmp", 1),
    ("tcp", 6),
    ("udp", 17),
    ("ipv6", 41),
    ("gre", 47),
    ("esp", 50),
];

pub const INTERNAL_POLICY: u64 = u32::MAX as u64;

/// Connection state keywords, first match wins. `true` means exact match only.
const STATUS_KEYWORDS: [(&str, bool, u64); 23] = [
    ("", true, 1),
    ("n", false, 0),
    ("e", false, 1),
    ("syn-s", false, 2),
    ("syn_s", false, 2),
    ("ss", false, 2),
    ("syn-r", false, 3),
    ("syn_r", false, 3),
    ("sr", false, 3),
    ("fin-wait1", false, 4),
    ("fin_wait1", false, 4),
    ("fw1", false, 4),
    ("fin-wait2", false, 5),
    ("fin_wait2", false, 5),
    ("fw2", false, 5),
    ("t", false, 6),
    ("close", true, 7),
    ("close-", false, 8),
    ("close_", false, 8),
    ("cw", false, 8),
    ("la", false, 9),
    ("li", false, 10),
    ("closi", false, 11),
];

impl NumberDialect {
    pub fn parse(self, field: &str, raw: &str) -> Result<u64, FilterParseError> {
        let lower = raw.trim().to_lowercase();
        let keyword = match self {
            NumberDialect::Plain => None,
            NumberDialect::Rate => return parse_rate(raw),
            NumberDialect::Protocol => PROTOCOLS
                .iter()
                .find(|(name, _)| *name == lower)
                .map(|(_, number)| *number),
            NumberDialect::Policy => (lower == "internal").then_some(INTERNAL_POLICY),
            NumberDialect::Status => status_keyword(&lower),
        };

        match keyword {
            Some(number) => Ok(number),
            None => parse_number(&lower).ok_or_else(|| FilterParseError::InvalidNumber {
                field: field.to_string(),
                value: raw.to_string(),
            }),
        }
    }
}

fn status_keyword(lower: &str) -> Option<u64> {
    let found = STATUS_KEYWORDS.iter().find(|(keyword, exact, _)| {
        if *exact {
            lower == *keyword
        } else {
            lower.starts_with(keyword)
        }
    });

    match found {
        Some((_, _, number)) => Some(*number),
        None if lower == "seen" => Some(1),
        None if lower == "unseen" => Some(0),
        None => None,
    }
}

/// Decimal, or hexadecimal with a `0x` prefix
pub fn parse_number(lower: &str) -> Option<u64> {
    match lower.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => lower.parse().ok(),
    }
}

/// Converts `<number> [unit]` to bytes per second.
///
/// The unit is an optional decimal (`k`, `m`, `g`, `t`) or binary (`ki`, ...)
/// prefix, then `b` for bits or `B` for bytes, then `ps`. Defaults to `Bps`.
pub fn parse_rate(raw: &str) -> Result<u64, FilterParseError> {
    let invalid = || FilterParseError::InvalidRate(raw.to_string());

    let mut parts = raw.split_whitespace();
    let number: u64 = parts
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(invalid)?;
    let unit = parts.next().unwrap_or("Bps");

    let unit = unit.strip_suffix("ps").ok_or_else(invalid)?;
    let (bits, prefix) = if let Some(prefix) = unit.strip_suffix('B') {
        (number.saturating_mul(8), prefix)
    } else if let Some(prefix) = unit.strip_suffix('b') {
        (number, prefix)
    } else {
        return Err(invalid());
    };

    let multiplier: u64 = match prefix.to_lowercase().as_str() {
        "" => 1,
        "k" => 1_000,
        "ki" => 1 << 10,
        "m" => 1_000_000,
        "mi" => 1 << 20,
        "g" => 1_000_000_000,
        "gi" => 1 << 30,
        "t" => 1_000_000_000_000,
        "ti" => 1 << 40,
        _ => return Err(invalid()),
    };

    Ok(bits.saturating_mul(multiplier) / 8)
}

#[derive(Debug, Clone)]
pub struct NumberTest {
    pub op: NumberOp,
    pub dialect: NumberDialect,
    pub value: Operand<u64>,
}

impl NumberTest {
    pub fn compile(
        field: &str,
        op: &str,
        value: &str,
        dialect: NumberDialect,
        request: &mut FieldRequest,
    ) -> Result<Self, FilterParseError> {
        if op.is_empty() && value.is_empty() {
            return match dialect {
                // plain "status" means established
                NumberDialect::Status => Ok(NumberTest {
                    op: NumberOp::Eq,
                    dialect,
                    value: Operand::Literal(1),
                }),
                NumberDialect::Rate => Err(FilterParseError::MissingValue(field.to_string())),
                _ => Ok(NumberTest {
                    op: NumberOp::NonZero,
                    dialect,
                    value: Operand::Literal(0),
                }),
            };
        }

        let op = NumberOp::from_token(op).ok_or_else(|| FilterParseError::UnknownOperator {
            field: field.to_string(),
            operator: op.to_string(),
        })?;
        let value = Operand::compile(value, request, |raw| dialect.parse(field, raw))?;

        Ok(NumberTest { op, dialect, value })
    }

    pub fn bind(&self, session: &Session) -> Option<u64> {
        self.value
            .resolve(session, |raw| self.dialect.parse("template", raw))
            .map(|value| *value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Eq,
    Ne,
    Prefix,
    Suffix,
    Contains,
    /// No operator and no value: the field is not empty
    NonEmpty,
}

impl TextOp {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "" | "=" | "==" | "eq" | "is" => Some(TextOp::Eq),
            "!=" | "<>" | "ne" | "not" => Some(TextOp::Ne),
            "prefix" | "starts" | "start" => Some(TextOp::Prefix),
            "suffix" | "ends" | "end" => Some(TextOp::Suffix),
            "contains" | "contain" | "c" | "has" => Some(TextOp::Contains),
            _ => None,
        }
    }

    pub fn apply(self, left: &str, right: &str) -> bool {
        match self {
            TextOp::Eq => left == right,
            TextOp::Ne => left != right,
            TextOp::Prefix => left.starts_with(right),
            TextOp::Suffix => left.ends_with(right),
            TextOp::Contains => left.contains(right),
            TextOp::NonEmpty => !left.is_empty(),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TextOp::Eq => "==",
            TextOp::Ne => "<>",
            TextOp::Prefix => "prefix",
            TextOp::Suffix => "suffix",
            TextOp::Contains => "contains",
            TextOp::NonEmpty => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextTest {
    pub op: TextOp,
    pub ignore_case: bool,
    /// Already lowercased when `ignore_case` is set
    pub value: Operand<String>,
}

impl TextTest {
    pub fn compile(
        field: &str,
        op: &str,
        value: &str,
        request: &mut FieldRequest,
    ) -> Result<Self, FilterParseError> {
        if op.is_empty() && value.is_empty() {
            return Ok(TextTest {
                op: TextOp::NonEmpty,
                ignore_case: false,
                value: Operand::Literal(String::new()),
            });
        }

        let (ignore_case, token) = match op.strip_prefix('#') {
            Some(rest) => (true, rest),
            None => (false, op),
        };
        let op = TextOp::from_token(token).ok_or_else(|| FilterParseError::UnknownOperator {
            field: field.to_string(),
            operator: op.to_string(),
        })?;
        let value = Operand::compile(value, request, |raw| Ok(fold(raw, ignore_case)))?;

        Ok(TextTest {
            op,
            ignore_case,
            value,
        })
    }

    pub fn bind(&self, session: &Session) -> Option<Cow<'_, String>> {
        self.value
            .resolve(session, |raw| Ok(fold(raw, self.ignore_case)))
    }

    pub fn matches(&self, left: &str, right: &str) -> bool {
        if self.ignore_case {
            self.op.apply(&left.to_lowercase(), right)
        } else {
            self.op.apply(left, right)
        }
    }
}

fn fold(raw: &str, ignore_case: bool) -> String {
    if ignore_case {
        raw.to_lowercase()
    } else {
        raw.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOp {
    Equal,
    NotEqual,
    /// Inside a CIDR block
    Within,
}

impl AddressOp {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "" | "=" | "==" | "is" => Some(AddressOp::Equal),
            "!=" | "<>" | "not" => Some(AddressOp::NotEqual),
            "in" => Some(AddressOp::Within),
            _ => None,
        }
    }

    fn parse_value(self, raw: &str) -> Result<AddressValue, FilterParseError> {
        let raw = raw.trim();
        match self {
            AddressOp::Within => raw
                .parse::<IpNet>()
                .map(AddressValue::Network)
                .map_err(|_| FilterParseError::InvalidNetwork(raw.to_string())),
            AddressOp::Equal | AddressOp::NotEqual => raw
                .parse::<IpAddr>()
                .map(AddressValue::Host)
                .map_err(|_| FilterParseError::InvalidAddress(raw.to_string())),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            AddressOp::Equal => "==",
            AddressOp::NotEqual => "<>",
            AddressOp::Within => "in",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressValue {
    Host(IpAddr),
    Network(IpNet),
}

impl fmt::Display for AddressValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressValue::Host(ip) => write!(f, "{}", ip),
            AddressValue::Network(net) => write!(f, "{}", net),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddressTest {
    pub op: AddressOp,
    pub value: Operand<AddressValue>,
}

impl AddressTest {
    pub fn compile(
        field: &str,
        op: &str,
        value: &str,
        request: &mut FieldRequest,
    ) -> Result<Self, FilterParseError> {
        if value.is_empty() {
            return Err(FilterParseError::MissingValue(field.to_string()));
        }

        let op = AddressOp::from_token(op).ok_or_else(|| FilterParseError::UnknownOperator {
            field: field.to_string(),
            operator: op.to_string(),
        })?;
        let value = Operand::compile(value, request, |raw| op.parse_value(raw))?;

        Ok(AddressTest { op, value })
    }

    pub fn bind(&self, session: &Session) -> Option<AddressValue> {
        self.value
            .resolve(session, |raw| self.op.parse_value(raw))
            .map(|value| *value)
    }

    /// A session address that was never seen only matches `!=`
    pub fn matches(&self, left: Option<IpAddr>, right: &AddressValue) -> bool {
        match (self.op, right) {
            (AddressOp::Equal, AddressValue::Host(ip)) => left == Some(*ip),
            (AddressOp::NotEqual, AddressValue::Host(ip)) => left != Some(*ip),
            (AddressOp::Within, AddressValue::Network(net)) => {
                left.is_some_and(|addr| net.contains(&addr))
            }
            _ => false,
        }
    }
}

/// Custom values are typed per session, so both readings are prepared.
///
/// A reading that does not compile stays `None` and never matches.
#[derive(Debug, Clone)]
pub struct CustomTest {
    pub text: Option<TextTest>,
    pub number: Option<NumberTest>,
}

impl CustomTest {
    pub fn compile(
        field: &str,
        op: &str,
        value: &str,
        request: &mut FieldRequest,
    ) -> Result<Self, FilterParseError> {
        let text = TextTest::compile(field, op, value, request);
        let number = NumberTest::compile(field, op, value, NumberDialect::Plain, request);

        match (text, number) {
            (Err(text_err), Err(number_err)) => {
                if NumberOp::from_token(op).is_some() {
                    Err(number_err)
                } else {
                    Err(text_err)
                }
            }
            (text, number) => Ok(CustomTest {
                text: text.ok(),
                number: number.ok(),
            }),
        }
    }
}

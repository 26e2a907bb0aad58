use super::parser::{Check, FilterNode, Predicate};
use crate::parser::{CustomValue, Session};
use std::fmt::{self, Write};
use tracing::trace;

impl FilterNode {
    /// Walks the tree and asks `leaf` for each condition it reaches.
    ///
    /// AND stops at the first false child and OR at the first true one, so
    /// `leaf` only sees the conditions needed to decide.
    pub fn evaluate_with<F: FnMut(&Predicate) -> bool>(&self, leaf: &mut F) -> bool {
        match self {
            FilterNode::And(nodes) => nodes.iter().all(|node| node.evaluate_with(leaf)),
            FilterNode::Or(nodes) => nodes.iter().any(|node| node.evaluate_with(leaf)),
            FilterNode::Expression(predicate) => leaf(predicate),
        }
    }

    pub fn matches(&self, session: &Session) -> bool {
        self.evaluate_with(&mut |predicate| predicate.matches(session))
    }

    /// Indented decision tree, one condition per line
    pub fn dump_pretty(&self) -> String {
        let mut out = String::new();
        self.write_pretty(&mut out, 0);
        out
    }

    fn write_pretty(&self, out: &mut String, depth: usize) {
        let indent = "\t".repeat(depth);
        let (label, nodes) = match self {
            FilterNode::And(nodes) => ("AND", nodes),
            FilterNode::Or(nodes) => ("OR", nodes),
            FilterNode::Expression(p) => {
                let _ = writeln!(
                    out,
                    "{}EXPRESSION({}{} \"{}\" \"{}\")",
                    indent,
                    if p.negated { "not " } else { "" },
                    p.field,
                    p.operator,
                    p.value
                );
                return;
            }
        };

        let _ = writeln!(out, "{}{} {{", indent, label);
        for node in nodes {
            node.write_pretty(out, depth + 1);
        }
        let _ = writeln!(out, "{}}}", indent);
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (separator, nodes) = match self {
            FilterNode::And(nodes) => (" AND ", nodes),
            FilterNode::Or(nodes) => (" OR ", nodes),
            FilterNode::Expression(predicate) => return write!(f, "{}", predicate),
        };

        write!(f, "(")?;
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", separator)?;
            }
            write!(f, "{}", node)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        if self.negated {
            write!(f, "not ")?;
        }
        write!(f, "{}", self.field)?;
        for part in [&self.operator, &self.value] {
            if !part.is_empty() {
                write!(f, " {}", part)?;
            }
        }
        write!(f, ")")
    }
}

impl Predicate {
    /// Applies the comparison, then `!`, then `not`
    pub fn matches(&self, session: &Session) -> bool {
        let found = self.check.evaluate(session).unwrap_or(false);
        let result = (found != self.reversed) != self.negated;
        trace!("Session 0x{:x}: {} -> {}", session.serial, self, result);
        result
    }
}

impl Check {
    /// `None` when the session lacks the data or the value cannot be bound
    fn evaluate(&self, session: &Session) -> Option<bool> {
        match self {
            Check::Address { field, test } => {
                let right = test.bind(session)?;
                field.test(session, |left| test.matches(left, &right))
            }
            Check::Number { field, test } => {
                let right = test.bind(session)?;
                field.test(session, |left| test.op.apply(left, right))
            }
            Check::Rate { field, test } => {
                let right = test.bind(session)?;
                field.test(session, |left| test.op.apply(left, right))
            }
            Check::Text { field, test } => {
                let right = test.bind(session)?;
                field.test(session, |left| test.matches(left, &right))
            }
            Check::Custom { key, test } => {
                let number = |left: u64| {
                    let test = test.number.as_ref()?;
                    let right = test.bind(session)?;
                    Some(test.op.apply(left, right))
                };

                match session.custom_value(key)? {
                    CustomValue::Text(left) => {
                        let test = test.text.as_ref()?;
                        let right = test.bind(session)?;
                        Some(test.matches(left, &right))
                    }
                    CustomValue::Unsigned(left) => number(*left),
                    CustomValue::Float(left) => number(*left as u64),
                    CustomValue::Empty => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parser::parse_expression;
    use crate::parser::{Basics, Session};
    use crate::request::FieldRequest;
    use std::collections::HashMap;

    fn compile(expression: &str) -> FilterNode {
        let mut request = FieldRequest::new();
        parse_expression(expression, &mut request).unwrap()
    }

    fn tcp_session() -> Session {
        Session {
            serial: 0x10,
            basics: Some(Basics {
                protocol: 6,
                state_l: 1,
                state_r: 0,
                ..Basics::default()
            }),
            custom: Some(HashMap::from([
                ("name".to_string(), CustomValue::Text("Branch-01".to_string())),
                ("hits".to_string(), CustomValue::Unsigned(12)),
                ("ratio".to_string(), CustomValue::Float(7.9)),
                ("blank".to_string(), CustomValue::Empty),
            ])),
            ..Session::default()
        }
    }

    #[test]
    fn test_and_stops_at_first_false() {
        let root = compile("serial 1 and serial 2 and serial 3");
        let mut seen = Vec::new();
        let result = root.evaluate_with(&mut |p| {
            seen.push(p.value.clone());
            p.value == "1"
        });
        assert!(!result);
        assert_eq!(seen, ["1", "2"]);
    }

    #[test]
    fn test_or_stops_at_first_true() {
        let root = compile("serial 1 or serial 2 or serial 3");
        let mut seen = Vec::new();
        let result = root.evaluate_with(&mut |p| {
            seen.push(p.value.clone());
            p.value == "2"
        });
        assert!(result);
        assert_eq!(seen, ["1", "2"]);
    }

    #[test]
    fn test_negation_and_reverse() {
        let session = tcp_session();
        assert!(compile("proto tcp").matches(&session));
        assert!(!compile("not proto tcp").matches(&session));
        assert!(!compile("proto != tcp").matches(&session));
        assert!(compile("not proto != tcp").matches(&session));
        assert!(compile("proto <> udp").matches(&session));
    }

    #[test]
    fn test_status_either_side() {
        let session = tcp_session();
        assert!(compile("status").matches(&session));
        assert!(compile("status none").matches(&session));
        assert!(compile("status[l] established").matches(&session));
        assert!(!compile("status[r] est").matches(&session));
    }

    #[test]
    fn test_absent_group_before_negation() {
        let session = tcp_session();
        assert!(!compile("port 443").matches(&session));
        assert!(compile("port != 443").matches(&session));
        assert!(compile("not port 443").matches(&session));
        assert!(!compile("not port != 443").matches(&session));
    }

    #[test]
    fn test_custom_values() {
        let session = tcp_session();
        assert!(compile("custom name #prefix branch").matches(&session));
        assert!(!compile("custom name prefix branch").matches(&session));
        assert!(compile("custom hits > 10").matches(&session));
        assert!(compile("custom ratio = 7").matches(&session));
        assert!(!compile("custom blank").matches(&session));
        assert!(!compile("custom blank = 0").matches(&session));
        assert!(!compile("custom missing").matches(&session));
        assert!(compile("not custom missing").matches(&session));
        // text reading only, the value is a number
        assert!(!compile("custom hits contains 1").matches(&session));
    }

    #[test]
    fn test_template_value_that_cannot_bind() {
        let session = tcp_session();
        // renders "x6", which is not a number
        assert!(!compile("serial = |x${proto}|").matches(&session));
        assert!(compile("not serial = |x${proto}|").matches(&session));
        assert!(compile("serial = |${proto:x}|").matches(&Session {
            serial: 6,
            ..tcp_session()
        }));
    }

    #[test]
    fn test_display_forms() {
        let root = compile("not port != 443 or (proto tcp and status)");
        assert_eq!(
            root.to_string(),
            "((not port != 443) OR ((proto tcp) AND (status)))"
        );
        assert_eq!(
            root.dump_pretty(),
            "OR {\n\tEXPRESSION(not port \"!=\" \"443\")\n\tAND {\n\t\tEXPRESSION(proto \"\" \"tcp\")\n\t\tEXPRESSION(status \"\" \"\")\n\t}\n}\n"
        );
    }
}

use serde::{Deserialize, Serialize};

/// Connective of a composite condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    And,
    Or,
}

/// Comparison operator of a key-value condition. Operators travel inside
/// the condition value as an `op:` prefix; a bare value means `equals`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    Contains,
}

impl CompareOp {
    /// Split an `op:literal` condition value into its operator and literal.
    /// An unrecognized prefix is part of the literal, compared with `equals`.
    pub fn parse(raw: &str) -> (CompareOp, &str) {
        if let Some((prefix, rest)) = raw.split_once(':') {
            if let Some(op) = Self::from_token(prefix) {
                return (op, rest);
            }
        }
        (CompareOp::Equals, raw)
    }

    pub fn from_token(token: &str) -> Option<CompareOp> {
        match token {
            "equals" => Some(CompareOp::Equals),
            "not_equals" => Some(CompareOp::NotEquals),
            "gt" => Some(CompareOp::Gt),
            "gte" => Some(CompareOp::Gte),
            "lt" => Some(CompareOp::Lt),
            "lte" => Some(CompareOp::Lte),
            "starts_with" => Some(CompareOp::StartsWith),
            "contains" => Some(CompareOp::Contains),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            CompareOp::Equals => "equals",
            CompareOp::NotEquals => "not_equals",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::StartsWith => "starts_with",
            CompareOp::Contains => "contains",
        }
    }

    /// SQL comparison token. LIKE-style operators share a token; the
    /// literal shaping (`%` placement) differs per operator.
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Equals => "=",
            CompareOp::NotEquals => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::StartsWith | CompareOp::Contains => "LIKE",
        }
    }

    pub fn is_like(&self) -> bool {
        matches!(self, CompareOp::StartsWith | CompareOp::Contains)
    }

    /// Shape a literal for binding: LIKE operators gain their wildcards,
    /// other operators pass the literal through untouched.
    pub fn shape_literal(&self, literal: &str) -> String {
        match self {
            CompareOp::StartsWith => format!("{literal}%"),
            CompareOp::Contains => format!("%{literal}%"),
            _ => literal.to_string(),
        }
    }
}

/// A recursive condition tree: composites of and/or, with key-value
/// comparisons at the leaves. The two variants are closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Composite { logic: Logic, children: Vec<Condition> },
    Kv { attr: String, value: String },
}

impl Condition {
    pub fn and(children: Vec<Condition>) -> Condition {
        Condition::Composite {
            logic: Logic::And,
            children,
        }
    }

    pub fn or(children: Vec<Condition>) -> Condition {
        Condition::Composite {
            logic: Logic::Or,
            children,
        }
    }

    pub fn kv(attr: impl Into<String>, value: impl Into<String>) -> Condition {
        Condition::Kv {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Count of key-value leaves in this tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Condition::Kv { .. } => 1,
            Condition::Composite { children, .. } => {
                children.iter().map(Condition::leaf_count).sum()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_op_parse() {
        assert_eq!(CompareOp::parse("gt:5"), (CompareOp::Gt, "5"));
        assert_eq!(CompareOp::parse("starts_with:Al"), (CompareOp::StartsWith, "Al"));
        assert_eq!(CompareOp::parse("plain"), (CompareOp::Equals, "plain"));
        // Unknown prefix stays inside the literal.
        assert_eq!(CompareOp::parse("09:30"), (CompareOp::Equals, "09:30"));
        // Only the first colon splits.
        assert_eq!(
            CompareOp::parse("equals:a:b"),
            (CompareOp::Equals, "a:b")
        );
    }

    #[test]
    fn test_literal_shaping() {
        assert_eq!(CompareOp::StartsWith.shape_literal("Al"), "Al%");
        assert_eq!(CompareOp::Contains.shape_literal("x"), "%x%");
        assert_eq!(CompareOp::Equals.shape_literal("10%"), "10%");
    }

    #[test]
    fn test_condition_serde() {
        let tree: Condition = serde_json::from_str(
            r#"{"logic": "and", "children": [
                {"attr": "name", "value": "starts_with:Al"},
                {"logic": "or", "children": [{"attr": "age", "value": "gt:30"}]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(
            tree,
            Condition::and(vec![
                Condition::kv("name", "starts_with:Al"),
                Condition::or(vec![Condition::kv("age", "gt:30")]),
            ])
        );
        assert_eq!(tree.leaf_count(), 2);
    }
}

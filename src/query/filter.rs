//! Canonical filter tree produced by the compiler and consumed by the composer and renderer.

use crate::config::ScalarType;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Comparison operators reachable through `_<name>Op` keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    StartsWith,
    EndsWith,
    Substring,
    Between,
    NotBetween,
    Is,
    Not,
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "in" => Operator::In,
            "notIn" => Operator::NotIn,
            "like" => Operator::Like,
            "notLike" => Operator::NotLike,
            "iLike" => Operator::ILike,
            "notILike" => Operator::NotILike,
            "startsWith" => Operator::StartsWith,
            "endsWith" => Operator::EndsWith,
            "substring" => Operator::Substring,
            "between" => Operator::Between,
            "notBetween" => Operator::NotBetween,
            "is" => Operator::Is,
            "not" => Operator::Not,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::Like => "like",
            Operator::NotLike => "notLike",
            Operator::ILike => "iLike",
            Operator::NotILike => "notILike",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Substring => "substring",
            Operator::Between => "between",
            Operator::NotBetween => "notBetween",
            Operator::Is => "is",
            Operator::Not => "not",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like | Operator::StartsWith | Operator::EndsWith | Operator::Substring => {
                "LIKE"
            }
            Operator::NotLike => "NOT LIKE",
            Operator::ILike => "ILIKE",
            Operator::NotILike => "NOT ILIKE",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
            Operator::Is => "IS",
            Operator::Not => "IS NOT",
        }
    }

    /// Operators whose value is a list (`in`) or a pair (`between`).
    pub fn takes_list(self) -> bool {
        matches!(
            self,
            Operator::In | Operator::NotIn | Operator::Between | Operator::NotBetween
        )
    }

    pub fn is_range(self) -> bool {
        matches!(self, Operator::Between | Operator::NotBetween)
    }

    /// Pattern operators compare against strings and skip numeric coercion.
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Operator::Like
                | Operator::NotLike
                | Operator::ILike
                | Operator::NotILike
                | Operator::StartsWith
                | Operator::EndsWith
                | Operator::Substring
        )
    }

    /// Wrap a search string for the prefix/suffix/substring operators.
    pub fn pattern(self, s: &str) -> String {
        match self {
            Operator::StartsWith => format!("{}%", s),
            Operator::EndsWith => format!("%{}", s),
            Operator::Substring => format!("%{}%", s),
            _ => s.to_string(),
        }
    }
}

/// Where a comparison points: association hops from the base model, the terminal attribute and
/// an optional path inside a JSON attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributePath {
    pub hops: Vec<String>,
    pub attribute: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub json_path: Vec<String>,
}

impl AttributePath {
    pub fn local(attribute: impl Into<String>) -> Self {
        AttributePath {
            hops: Vec::new(),
            attribute: attribute.into(),
            json_path: Vec::new(),
        }
    }

    pub fn through(hops: Vec<String>, attribute: impl Into<String>) -> Self {
        AttributePath {
            hops,
            attribute: attribute.into(),
            json_path: Vec::new(),
        }
    }
}

/// Wire form: `name`, or `$hop.hop.name$` across associations, with JSON keys appended as
/// `.key`.
impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hops.is_empty() {
            write!(f, "{}", self.attribute)?;
        } else {
            write!(f, "${}.{}$", self.hops.join("."), self.attribute)?;
        }
        for key in &self.json_path {
            write!(f, ".{}", key)?;
        }
        Ok(())
    }
}

/// Comparison operand after type coercion.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterValue {
    Json(Value),
    /// A literal that must be cast by the engine, e.g. `CAST('…' AS DATETIMEOFFSET)`.
    Cast { literal: String, sql_type: String },
}

impl FilterValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Json(Value::Null))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Connective {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterNode {
    #[serde(rename_all = "camelCase")]
    Comparison {
        path: AttributePath,
        operator: Operator,
        value: FilterValue,
        value_type: Option<ScalarType>,
        /// Set for comparisons reached through a `!!` path: the join is inner and the condition
        /// is rendered as `NOT (...)`.
        negated: bool,
    },
    Logical {
        connective: Connective,
        children: Vec<FilterNode>,
    },
    Not(Box<FilterNode>),
    Raw { sql: String },
    /// Comparison against a computed attribute. Lowered to `Raw` by the composer, with the
    /// expression's columns qualified by the join alias of `path.hops`.
    #[serde(rename_all = "camelCase")]
    Virtual {
        path: AttributePath,
        expression: String,
        operator: Operator,
        literal: String,
        negated: bool,
    },
}

impl FilterNode {
    /// Conjunction with nested ANDs flattened and duplicates dropped. An empty conjunction is
    /// `true`; a single child is returned as is.
    pub fn and(children: Vec<FilterNode>) -> FilterNode {
        Self::combine(Connective::And, children)
    }

    /// Disjunction with nested ORs flattened and duplicates dropped.
    pub fn or(children: Vec<FilterNode>) -> FilterNode {
        Self::combine(Connective::Or, children)
    }

    fn combine(connective: Connective, children: Vec<FilterNode>) -> FilterNode {
        let mut flat: Vec<FilterNode> = Vec::with_capacity(children.len());
        for child in children {
            match child {
                FilterNode::Logical {
                    connective: c,
                    children: grand,
                } if c == connective => {
                    for g in grand {
                        if !flat.contains(&g) {
                            flat.push(g);
                        }
                    }
                }
                other => {
                    if !flat.contains(&other) {
                        flat.push(other);
                    }
                }
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        FilterNode::Logical {
            connective,
            children: flat,
        }
    }

    /// `true` (an empty conjunction).
    pub fn always() -> FilterNode {
        FilterNode::Logical {
            connective: Connective::And,
            children: Vec::new(),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, FilterNode::Logical { connective: Connective::And, children } if children.is_empty())
    }

    /// Top-level conjuncts of this node.
    pub fn into_conjuncts(self) -> Vec<FilterNode> {
        match self {
            FilterNode::Logical {
                connective: Connective::And,
                children,
            } => children,
            other => vec![other],
        }
    }

    /// Every attribute path referenced by a comparison in this tree.
    pub fn paths(&self) -> Vec<&AttributePath> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a AttributePath>) {
        match self {
            FilterNode::Comparison { path, .. } | FilterNode::Virtual { path, .. } => out.push(path),
            FilterNode::Logical { children, .. } => {
                for child in children {
                    child.collect_paths(out);
                }
            }
            FilterNode::Not(child) => child.collect_paths(out),
            FilterNode::Raw { .. } => {}
        }
    }

    /// Hop chains of comparisons compiled from `!!` paths.
    pub fn negated_hops(&self) -> Vec<&[String]> {
        let mut out = Vec::new();
        self.collect_negated(&mut out);
        out
    }

    fn collect_negated<'a>(&'a self, out: &mut Vec<&'a [String]>) {
        match self {
            FilterNode::Comparison { path, negated, .. } | FilterNode::Virtual { path, negated, .. } => {
                if *negated && !path.hops.is_empty() {
                    out.push(&path.hops);
                }
            }
            FilterNode::Logical { children, .. } => {
                for child in children {
                    child.collect_negated(out);
                }
            }
            FilterNode::Not(child) => child.collect_negated(out),
            FilterNode::Raw { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eq(attr: &str, v: Value) -> FilterNode {
        FilterNode::Comparison {
            path: AttributePath::local(attr),
            operator: Operator::Eq,
            value: FilterValue::Json(v),
            value_type: None,
            negated: false,
        }
    }

    #[test]
    fn and_flattens_and_collapses() {
        let inner = FilterNode::and(vec![eq("a", json!(1)), eq("b", json!(2))]);
        let outer = FilterNode::and(vec![inner, eq("c", json!(3)), eq("a", json!(1))]);
        match outer {
            FilterNode::Logical { connective, children } => {
                assert_eq!(connective, Connective::And);
                assert_eq!(children.len(), 3);
            }
            other => panic!("expected AND, got {:?}", other),
        }
        assert_eq!(FilterNode::and(vec![eq("a", json!(1))]), eq("a", json!(1)));
        assert!(FilterNode::and(vec![]).is_always());
    }

    #[test]
    fn or_does_not_flatten_and() {
        let and = FilterNode::and(vec![eq("a", json!(1)), eq("b", json!(2))]);
        let or = FilterNode::or(vec![and.clone(), eq("c", json!(3))]);
        match or {
            FilterNode::Logical { connective: Connective::Or, children } => {
                assert_eq!(children[0], and);
            }
            other => panic!("expected OR, got {:?}", other),
        }
    }

    #[test]
    fn path_display_uses_sentinel_only_across_joins() {
        assert_eq!(AttributePath::local("name").to_string(), "name");
        let p = AttributePath::through(vec!["customer".into(), "address".into()], "city");
        assert_eq!(p.to_string(), "$customer.address.city$");
        let j = AttributePath {
            hops: vec![],
            attribute: "meta".into(),
            json_path: vec!["color".into()],
        };
        assert_eq!(j.to_string(), "meta.color");
    }
}

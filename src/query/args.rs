//! The `query` field argument: `where`, `without`, `group`, `order`, `limit`, `offset`,
//! `transform` and (on association fields) `required`.

use crate::error::PlanError;
use crate::query::plan::{AggregateFn, Direction};
use crate::query::selection::{ExecutionInfo, FieldSelection};
use indexmap::IndexMap;
use serde_json::Value;

pub const QUERY_ARGUMENT: &str = "query";
/// `optimized: false` on an association field skips its eager join.
pub const OPTIMIZED_ARGUMENT: &str = "optimized";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryArgs {
    pub filter: Option<Value>,
    pub without: Vec<String>,
    pub group: Vec<String>,
    pub order: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub transform: IndexMap<String, AggregateFn>,
    pub required: Option<bool>,
}

/// Row counts must fit PostgreSQL's `bigint`.
fn count(key: &str, v: &Value) -> Result<Option<u64>, PlanError> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .filter(|n| i64::try_from(*n).is_ok())
            .map(Some)
            .ok_or_else(|| {
                PlanError::malformed(format!(
                    "{} must be a non-negative integer up to {}, got {}",
                    key,
                    i64::MAX,
                    n
                ))
            }),
        other => Err(PlanError::malformed(format!(
            "{} must be a non-negative integer, got {}",
            key, other
        ))),
    }
}

fn names(key: &str, v: &Value) -> Result<Vec<String>, PlanError> {
    let items = v
        .as_array()
        .ok_or_else(|| PlanError::malformed(format!("{} must be an array of field names", key)))?;
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => Ok(s.clone()),
            // `[["region"], ["country"]]` form
            Value::Array(inner) => match inner.first() {
                Some(Value::String(s)) => Ok(s.clone()),
                _ => Err(PlanError::malformed(format!("invalid {} entry {}", key, item))),
            },
            other => Err(PlanError::malformed(format!("invalid {} entry {}", key, other))),
        })
        .collect()
}

fn order(v: &Value) -> Result<Vec<(String, Direction)>, PlanError> {
    let items = v
        .as_array()
        .ok_or_else(|| PlanError::malformed("order must be an array of [field, direction] pairs"))?;
    items
        .iter()
        .map(|item| match item.as_array().map(Vec::as_slice) {
            Some([Value::String(field), Value::String(dir)]) => Direction::parse(dir)
                .map(|d| (field.clone(), d))
                .ok_or_else(|| {
                    PlanError::malformed(format!("order direction must be ASC or DESC, got {}", dir))
                }),
            _ => Err(PlanError::malformed(format!(
                "order entry must be [field, \"ASC\"|\"DESC\"], got {}",
                item
            ))),
        })
        .collect()
}

fn transform(v: &Value) -> Result<IndexMap<String, AggregateFn>, PlanError> {
    let map = v
        .as_object()
        .ok_or_else(|| PlanError::malformed("transform must map attributes to aggregate names"))?;
    map.iter()
        .map(|(attr, f)| {
            f.as_str()
                .and_then(AggregateFn::parse)
                .map(|f| (attr.clone(), f))
                .ok_or_else(|| {
                    PlanError::malformed(format!(
                        "transform for '{}' must be one of sum, max, min, avg, count; got {}",
                        attr, f
                    ))
                })
        })
        .collect()
}

impl QueryArgs {
    pub fn parse(value: &Value) -> Result<Self, PlanError> {
        let map = value
            .as_object()
            .ok_or_else(|| PlanError::malformed(format!("query must be an object, got {}", value)))?;
        let mut args = QueryArgs::default();
        for (key, v) in map {
            match key.as_str() {
                "where" => args.filter = Some(v.clone()).filter(|v| !v.is_null()),
                "without" => args.without = names(key, v)?,
                "group" => args.group = names(key, v)?,
                "order" => args.order = order(v)?,
                "limit" => args.limit = count(key, v)?,
                "offset" => args.offset = count(key, v)?,
                "transform" => args.transform = transform(v)?,
                "required" => {
                    args.required = match v {
                        Value::Null => None,
                        Value::Bool(b) => Some(*b),
                        other => {
                            return Err(PlanError::malformed(format!(
                                "required must be a boolean, got {}",
                                other
                            )))
                        }
                    }
                }
                other => {
                    return Err(PlanError::malformed(format!(
                        "unknown query argument '{}'",
                        other
                    )))
                }
            }
        }
        if !args.transform.is_empty() && args.group.is_empty() {
            return Err(PlanError::malformed("transform requires group"));
        }
        Ok(args)
    }

    /// Read the `query` argument of a field, if present.
    pub fn from_field(field: &FieldSelection, info: &ExecutionInfo) -> Result<Option<Self>, PlanError> {
        match field.argument(QUERY_ARGUMENT, &info.variables) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Self::parse(&v).map(Some),
        }
    }

    /// Limit or offset make an association include load separately.
    pub fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

/// `false` when the field carries `optimized: false`.
pub fn is_optimized(field: &FieldSelection, info: &ExecutionInfo) -> bool {
    !matches!(
        field.argument(OPTIMIZED_ARGUMENT, &info.variables),
        Some(Value::Bool(false))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_clause() {
        let args = QueryArgs::parse(&json!({
            "where": { "status": "paid" },
            "without": ["refunds"],
            "group": [["region"]],
            "order": [["region", "desc"]],
            "limit": 10,
            "offset": 20,
            "transform": { "totalPrice": "min" }
        }))
        .unwrap();
        assert_eq!(args.filter, Some(json!({ "status": "paid" })));
        assert_eq!(args.without, vec!["refunds"]);
        assert_eq!(args.group, vec!["region"]);
        assert_eq!(args.order, vec![("region".to_string(), Direction::Desc)]);
        assert_eq!((args.limit, args.offset), (Some(10), Some(20)));
        assert_eq!(args.transform.get("totalPrice"), Some(&AggregateFn::Min));
        assert!(args.is_paginated());
    }

    #[test]
    fn rejects_bad_shapes() {
        for bad in [
            json!({ "order": [["region", "UP"]] }),
            json!({ "order": ["region"] }),
            json!({ "limit": -1 }),
            json!({ "limit": "10" }),
            json!({ "limit": u64::MAX }),
            json!({ "offset": (i64::MAX as u64) + 1 }),
            json!({ "transform": { "totalPrice": "sum" } }),
            json!({ "group": ["region"], "transform": { "totalPrice": "median" } }),
            json!({ "bogus": 1 }),
            json!([1]),
        ] {
            assert!(
                matches!(QueryArgs::parse(&bad), Err(PlanError::MalformedFilter(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn optimized_flag() {
        let info = ExecutionInfo::default();
        let field = FieldSelection::new("orders").with_argument("optimized", json!(false));
        assert!(!is_optimized(&field, &info));
        assert!(is_optimized(&FieldSelection::new("orders"), &info));
    }
}

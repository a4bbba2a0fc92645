//! Filter-expression compiler: lowers a JSON `where` argument into a [`FilterNode`] tree.
//!
//! Keys are resolved in this order: operator key (`_<name>Op`), `_Exp`, attribute, association,
//! cross-model path (`a__b`, `a!!b`). Anything else is an unknown field.

use crate::config::{AttributeDescriptor, Dialect, ModelDescriptor, ScalarType};
use crate::context::SchemaContext;
use crate::error::PlanError;
use crate::query::expression;
use crate::query::filter::{AttributePath, FilterNode, FilterValue, Operator};
use crate::query::path::{self, parse_path_key};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::OnceLock;

pub const EXPRESSION_KEY: &str = "_Exp";

fn operator_key() -> Result<&'static Regex, PlanError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^_([a-zA-Z]+)Op$"))
        .as_ref()
        .map_err(|e| PlanError::malformed(e.to_string()))
}

/// Operator name of an `_<name>Op` key.
pub fn operator_name(key: &str) -> Result<Option<&str>, PlanError> {
    Ok(operator_key()?
        .captures(key)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str()))
}

#[derive(Clone, Copy)]
enum Target<'a> {
    Model,
    Column(&'a AttributeDescriptor),
    Virtual(&'a AttributeDescriptor),
}

/// Where the compiler currently stands while descending the filter object.
#[derive(Clone)]
struct Scope<'a> {
    model: &'a ModelDescriptor,
    hops: Vec<String>,
    target: Target<'a>,
    json_path: Vec<String>,
    negated: bool,
}

impl<'a> Scope<'a> {
    fn root(model: &'a ModelDescriptor) -> Self {
        Scope {
            model,
            hops: Vec::new(),
            target: Target::Model,
            json_path: Vec::new(),
            negated: false,
        }
    }

    fn attribute(&self, attr: &'a AttributeDescriptor) -> Self {
        Scope {
            target: if attr.is_virtual() {
                Target::Virtual(attr)
            } else {
                Target::Column(attr)
            },
            json_path: Vec::new(),
            ..self.clone()
        }
    }

    fn in_document(&self) -> bool {
        matches!(self.target, Target::Column(attr) if attr.scalar_type.is_structured())
    }
}

pub struct FilterCompiler<'a> {
    ctx: &'a SchemaContext,
}

/// Compile `filter` against `model` with a throwaway [`FilterCompiler`].
pub fn compile(ctx: &SchemaContext, model: &str, filter: &Value) -> Result<FilterNode, PlanError> {
    FilterCompiler::new(ctx).compile(model, filter)
}

impl<'a> FilterCompiler<'a> {
    pub fn new(ctx: &'a SchemaContext) -> Self {
        FilterCompiler { ctx }
    }

    fn dialect(&self) -> Dialect {
        self.ctx.options.dialect
    }

    /// Compile a `where` argument. The root must be an object, or an array read as a conjunction.
    pub fn compile(&self, model: &str, filter: &Value) -> Result<FilterNode, PlanError> {
        let model = self.ctx.model(model)?;
        let scope = Scope::root(model);
        match filter {
            Value::Object(map) => self.compile_object(&scope, map),
            Value::Array(items) => Ok(FilterNode::and(
                items
                    .iter()
                    .map(|item| self.compile_value(&scope, item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            other => Err(PlanError::malformed(format!(
                "where clause must be an object or an array, got {}",
                other
            ))),
        }
    }

    fn compile_object(&self, scope: &Scope<'a>, map: &Map<String, Value>) -> Result<FilterNode, PlanError> {
        let children = map
            .iter()
            .map(|(key, value)| self.compile_entry(scope, key, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterNode::and(children))
    }

    fn compile_value(&self, scope: &Scope<'a>, value: &Value) -> Result<FilterNode, PlanError> {
        match (value, scope.target) {
            (Value::Object(map), _) => self.compile_object(scope, map),
            (Value::Array(items), Target::Model) => Ok(FilterNode::and(
                items
                    .iter()
                    .map(|item| self.compile_value(scope, item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            (Value::Array(_), _) => self.leaf(scope, Operator::In, value),
            (Value::Null, _) => self.leaf(scope, Operator::Is, value),
            (_, Target::Model) => Err(PlanError::malformed(format!(
                "value {} is not attached to an attribute of {}",
                value, scope.model.name
            ))),
            _ => self.leaf(scope, Operator::Eq, value),
        }
    }

    fn compile_entry(&self, scope: &Scope<'a>, key: &str, value: &Value) -> Result<FilterNode, PlanError> {
        if let Some(name) = operator_name(key)? {
            return self.compile_operator(scope, name, value);
        }
        if key == EXPRESSION_KEY {
            return Ok(FilterNode::Raw {
                sql: expression::lower(value, self.dialect())?,
            });
        }
        if scope.in_document() {
            let mut inner = scope.clone();
            inner.json_path.push(key.to_string());
            return self.compile_value(&inner, value);
        }
        if !matches!(scope.target, Target::Model) {
            return Err(PlanError::malformed(format!(
                "unexpected key '{}' inside an attribute filter",
                key
            )));
        }
        if let Some(attr) = scope.model.attribute(key) {
            return self.compile_value(&scope.attribute(attr), value);
        }
        if let Some(assoc) = self.ctx.association_for_field(scope.model, key) {
            if !value.is_object() && !value.is_array() {
                return Err(PlanError::malformed(format!(
                    "association '{}' must be filtered with an object",
                    key
                )));
            }
            let mut hops = scope.hops.clone();
            hops.push(assoc.name.clone());
            let inner = Scope {
                model: self.ctx.registry.target_of(assoc)?,
                hops,
                target: Target::Model,
                json_path: Vec::new(),
                negated: scope.negated,
            };
            return self.compile_value(&inner, value);
        }
        if let Some(path_key) = parse_path_key(key) {
            let resolved = path::resolve(self.ctx, &scope.model.name, &path_key.tokens)?;
            let mut hops = scope.hops.clone();
            hops.extend(resolved.aliases());
            let inner = Scope {
                model: resolved.target,
                hops,
                target: Target::Model,
                json_path: Vec::new(),
                negated: scope.negated || path_key.negated,
            };
            let mut inner = inner.attribute(resolved.attribute);
            inner.json_path = resolved.json_path;
            return self.compile_value(&inner, value);
        }
        Err(PlanError::UnknownField {
            model: scope.model.name.clone(),
            field: key.to_string(),
            valid: scope.model.attribute_names(),
        })
    }

    fn compile_operator(&self, scope: &Scope<'a>, name: &str, value: &Value) -> Result<FilterNode, PlanError> {
        match name {
            "and" | "or" => {
                let children = match value {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| self.compile_value(scope, item))
                        .collect::<Result<Vec<_>, _>>()?,
                    Value::Object(map) => map
                        .iter()
                        .map(|(k, v)| self.compile_entry(scope, k, v))
                        .collect::<Result<Vec<_>, _>>()?,
                    other => {
                        return Err(PlanError::malformed(format!(
                            "_{}Op expects an array or an object, got {}",
                            name, other
                        )))
                    }
                };
                Ok(if name == "and" {
                    FilterNode::and(children)
                } else {
                    FilterNode::or(children)
                })
            }
            "not" => match value {
                Value::Object(map) => Ok(FilterNode::Not(Box::new(self.compile_object(scope, map)?))),
                Value::Array(_) if matches!(scope.target, Target::Model) => {
                    Ok(FilterNode::Not(Box::new(self.compile_value(scope, value)?)))
                }
                _ => self.leaf(scope, Operator::Not, value),
            },
            _ => match Operator::from_name(name) {
                Some(op) => self.leaf(scope, op, value),
                None => Err(PlanError::UnknownOperator(name.to_string())),
            },
        }
    }

    /// Build a comparison for the attribute in scope.
    fn leaf(&self, scope: &Scope<'a>, op: Operator, value: &Value) -> Result<FilterNode, PlanError> {
        let attr = match scope.target {
            Target::Column(attr) | Target::Virtual(attr) => attr,
            Target::Model => {
                return Err(PlanError::malformed(format!(
                    "operator _{}Op must be applied to an attribute of {}",
                    op.name(),
                    scope.model.name
                )))
            }
        };
        let op = normalize_null(op, value);
        check_shape(op, value, &attr.name)?;

        if let Target::Virtual(attr) = scope.target {
            let expression = attr
                .virtual_def
                .as_ref()
                .map(|v| v.expression.clone())
                .unwrap_or_default();
            return Ok(FilterNode::Virtual {
                path: AttributePath::through(scope.hops.clone(), attr.name.clone()),
                expression,
                operator: op,
                literal: escape_literal(&attr.scalar_type, op, value, &attr.name)?,
                negated: scope.negated,
            });
        }

        let in_document = !scope.json_path.is_empty();
        let value = if in_document || op.is_pattern() {
            FilterValue::Json(value.clone())
        } else {
            coerce(&attr.scalar_type, self.dialect(), value, &attr.name)?
        };
        Ok(FilterNode::Comparison {
            path: AttributePath {
                hops: scope.hops.clone(),
                attribute: attr.name.clone(),
                json_path: scope.json_path.clone(),
            },
            operator: op,
            value,
            value_type: if in_document {
                None
            } else {
                Some(attr.scalar_type.clone())
            },
            negated: scope.negated,
        })
    }
}

/// `= NULL` and `<> NULL` mean `IS NULL` and `IS NOT NULL`.
fn normalize_null(op: Operator, value: &Value) -> Operator {
    match (op, value) {
        (Operator::Eq, Value::Null) => Operator::Is,
        (Operator::Ne, Value::Null) => Operator::Not,
        _ => op,
    }
}

fn check_shape(op: Operator, value: &Value, attribute: &str) -> Result<(), PlanError> {
    match (op, value) {
        (op, Value::Array(items)) if op.is_range() && items.len() != 2 => Err(PlanError::malformed(
            format!("_{}Op on '{}' expects exactly two values", op.name(), attribute),
        )),
        (op, Value::Array(_)) if op.takes_list() => Ok(()),
        (op, _) if op.takes_list() => Err(PlanError::malformed(format!(
            "_{}Op on '{}' expects an array",
            op.name(),
            attribute
        ))),
        (Operator::Is | Operator::Not, Value::Null | Value::Bool(_)) => Ok(()),
        (Operator::Is | Operator::Not, other) => Err(PlanError::malformed(format!(
            "_{}Op on '{}' expects null or a boolean, got {}",
            op.name(),
            attribute,
            other
        ))),
        (_, Value::Array(_) | Value::Object(_)) => Err(PlanError::malformed(format!(
            "_{}Op on '{}' expects a scalar",
            op.name(),
            attribute
        ))),
        _ => Ok(()),
    }
}

fn not_a(kind: &str, attribute: &str, value: &Value) -> PlanError {
    PlanError::malformed(format!("'{}' expects {}, got {}", attribute, kind, value))
}

fn parse_integer(value: &Value, attribute: &str) -> Result<i64, PlanError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| not_a("an integer", attribute, value)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| not_a("an integer", attribute, value)),
        _ => Err(not_a("an integer", attribute, value)),
    }
}

fn parse_decimal(value: &Value, attribute: &str) -> Result<f64, PlanError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| not_a("a number", attribute, value)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| not_a("a number", attribute, value)),
        _ => Err(not_a("a number", attribute, value)),
    }
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date into RFC 3339 text.
fn parse_timestamp(value: &Value, attribute: &str) -> Result<String, PlanError> {
    let s = value.as_str().ok_or_else(|| not_a("a date", attribute, value))?;
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.to_rfc3339());
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().to_rfc3339())
        .ok_or_else(|| not_a("a date", attribute, value))
}

fn coerce_scalar(ty: &ScalarType, value: &Value, attribute: &str) -> Result<Value, PlanError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if ty.is_integer() {
        return Ok(Value::from(parse_integer(value, attribute)?));
    }
    if ty.is_decimal() {
        let f = parse_decimal(value, attribute)?;
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| not_a("a number", attribute, value));
    }
    Ok(value.clone())
}

/// Coerce a comparison value by the attribute's declared type.
fn coerce(ty: &ScalarType, dialect: Dialect, value: &Value, attribute: &str) -> Result<FilterValue, PlanError> {
    match value {
        Value::Array(items) => Ok(FilterValue::Json(Value::Array(
            items
                .iter()
                .map(|v| coerce_scalar(ty, v, attribute))
                .collect::<Result<Vec<_>, _>>()?,
        ))),
        Value::String(_) if *ty == ScalarType::DateTimeOffset && dialect == Dialect::Mssql => {
            Ok(FilterValue::Cast {
                literal: parse_timestamp(value, attribute)?,
                sql_type: ScalarType::DateTimeOffset.sql_name().to_string(),
            })
        }
        _ => Ok(FilterValue::Json(coerce_scalar(ty, value, attribute)?)),
    }
}

fn escape_scalar(ty: &ScalarType, value: &Value, attribute: &str) -> Result<String, PlanError> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        _ if ty.is_integer() => parse_integer(value, attribute)?.to_string(),
        _ if ty.is_decimal() => parse_decimal(value, attribute)?.to_string(),
        _ if ty.is_date() || *ty == ScalarType::DateTimeOffset => {
            format!("'{}'", parse_timestamp(value, attribute)?)
        }
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => return Err(not_a("a scalar", attribute, other)),
    })
}

/// Render a comparison literal for a computed attribute, escaped by its declared type.
fn escape_literal(ty: &ScalarType, op: Operator, value: &Value, attribute: &str) -> Result<String, PlanError> {
    match value {
        Value::Array(items) if op.is_range() => Ok(format!(
            "{} AND {}",
            escape_scalar(ty, &items[0], attribute)?,
            escape_scalar(ty, &items[1], attribute)?
        )),
        Value::Array(items) => Ok(format!(
            "({})",
            items
                .iter()
                .map(|v| escape_scalar(ty, v, attribute))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        )),
        Value::String(s) if op.is_pattern() => {
            Ok(format!("'{}'", op.pattern(s).replace('\'', "''")))
        }
        _ => escape_scalar(ty, value, attribute),
    }
}

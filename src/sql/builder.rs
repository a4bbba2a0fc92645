//! Renders query plans as parameterized PostgreSQL `SELECT`s.
//!
//! The base model is aliased by its name and every join by `parent->alias`. Joined columns are
//! selected as `"alias.attr"` so rows can be nested again after fetching.

use crate::config::{AssociationDescriptor, AssociationKind, AttributeDescriptor, ModelDescriptor, ScalarType};
use crate::context::SchemaContext;
use crate::error::PlanError;
use crate::query::filter::{AttributePath, Connective, FilterNode, FilterValue, Operator};
use crate::query::include::IncludeNode;
use crate::query::plan::{AggregateFn, OrderEntry, OrderTarget, QueryPlan, SelectItem, COUNT_ALIAS};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

/// Column of a separate fetch holding the parent key the row belongs to.
pub const PARENT_KEY_ALIAS: &str = "__parent__";
/// Row number within a parent, present when a separate fetch is paginated.
pub const ROW_NUMBER_ALIAS: &str = "__rn__";
pub const JOIN_SEPARATOR: &str = "->";

/// Quote identifier for PostgreSQL (safe: only from model metadata).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// Explicit cast for a placeholder compared against a column of this type.
fn pg_cast(ty: &ScalarType) -> Option<&'static str> {
    match ty {
        t if t.is_integer() => Some("bigint"),
        t if t.is_decimal() => Some("numeric"),
        ScalarType::Date | ScalarType::DateTimeOffset => Some("timestamptz"),
        ScalarType::DateOnly => Some("date"),
        ScalarType::Time => Some("time"),
        ScalarType::Boolean => Some("boolean"),
        ScalarType::Uuid => Some("uuid"),
        ScalarType::Json | ScalarType::Jsonb => Some("jsonb"),
        _ => None,
    }
}

/// Alias of the join reached from `base` through `hops`.
pub fn join_alias(base: &str, hops: &[String]) -> String {
    std::iter::once(base)
        .chain(hops.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(JOIN_SEPARATOR)
}

fn column_ref(alias: &str, column: &str) -> String {
    format!("{}.{}", quoted(alias), quoted(column))
}

fn expression_token() -> Result<&'static Regex, PlanError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|[A-Za-z_][A-Za-z0-9_]*"#))
        .as_ref()
        .map_err(|e| PlanError::malformed(e.to_string()))
}

/// Qualify the bare column names of a computed attribute's expression with `alias`. Quoted
/// text, function names and names that are already qualified are left alone.
pub fn qualify_expression(expression: &str, alias: &str, model: &ModelDescriptor) -> Result<String, PlanError> {
    let qualified = expression_token()?.replace_all(expression, |caps: &Captures| {
        let Some(m) = caps.get(0) else {
            return String::new();
        };
        let token = m.as_str();
        let before = expression[..m.start()].chars().next_back();
        let after = expression[m.end()..].trim_start().chars().next();
        let is_column = model
            .attributes
            .values()
            .any(|a| !a.is_virtual() && a.column == token);
        if is_column && !matches!(before, Some('.' | ':')) && !matches!(after, Some('(' | '.')) {
            column_ref(alias, token)
        } else {
            token.to_string()
        }
    });
    Ok(qualified.into_owned())
}

/// Boolean SQL of a computed-attribute comparison against `model` joined as `alias`. An empty
/// `IN` list is `FALSE` and an empty `NOT IN` list is `TRUE`, as for stored columns.
pub fn virtual_condition(
    expression: &str,
    operator: Operator,
    literal: &str,
    negated: bool,
    alias: &str,
    model: &ModelDescriptor,
) -> Result<String, PlanError> {
    let cond = match operator {
        Operator::In if literal == "()" => "FALSE".to_string(),
        Operator::NotIn if literal == "()" => "TRUE".to_string(),
        op => format!(
            "({}) {} {}",
            qualify_expression(expression, alias, model)?,
            op.sql(),
            literal
        ),
    };
    Ok(if negated {
        format!("NOT ({})", cond)
    } else {
        cond
    })
}

/// Select expression of an attribute. Computed attributes select their expression; decimals
/// come back as double precision so they decode to JSON numbers.
fn attribute_expr(alias: &str, model: &ModelDescriptor, attr: &AttributeDescriptor) -> Result<String, PlanError> {
    Ok(match &attr.virtual_def {
        Some(def) => format!("({})", qualify_expression(&def.expression, alias, model)?),
        None if attr.scalar_type.is_decimal() => {
            format!("CAST({} AS DOUBLE PRECISION)", column_ref(alias, &attr.column))
        }
        None => column_ref(alias, &attr.column),
    })
}

fn unknown_field(model: &ModelDescriptor, field: &str) -> PlanError {
    PlanError::UnknownField {
        model: model.name.clone(),
        field: field.to_string(),
        valid: model.attribute_names(),
    }
}

fn through_alias(alias: &str) -> String {
    format!("{}{}through", alias, JOIN_SEPARATOR)
}

struct Renderer<'a> {
    ctx: &'a SchemaContext,
    q: QueryBuf,
}

impl<'a> Renderer<'a> {
    fn new(ctx: &'a SchemaContext) -> Self {
        Renderer {
            ctx,
            q: QueryBuf::new(),
        }
    }

    fn association(
        &self,
        model: &'a ModelDescriptor,
        alias: &str,
    ) -> Result<(&'a AssociationDescriptor, &'a ModelDescriptor), PlanError> {
        let assoc = model
            .association(alias)
            .ok_or_else(|| unknown_field(model, alias))?;
        Ok((assoc, self.ctx.registry.target_of(assoc)?))
    }

    fn model_at(&self, model: &'a ModelDescriptor, hops: &[String]) -> Result<&'a ModelDescriptor, PlanError> {
        hops.iter()
            .try_fold(model, |current, hop| Ok(self.association(current, hop)?.1))
    }

    fn placeholder(&mut self, value: Value, cast: Option<&str>) -> String {
        let n = self.q.push_param(value);
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }

    /// In-document comparisons run on `#>>` text, so operands bind as text.
    fn operand(&mut self, value: &Value, cast: Option<&str>, as_text: bool) -> String {
        let value = match value {
            Value::String(_) | Value::Null => value.clone(),
            other if as_text => Value::String(other.to_string()),
            other => other.clone(),
        };
        self.placeholder(value, cast)
    }

    fn filter(&mut self, node: &FilterNode, alias: &str, model: &'a ModelDescriptor) -> Result<String, PlanError> {
        Ok(match node {
            FilterNode::Comparison {
                path,
                operator,
                value,
                value_type,
                negated,
            } => {
                let cond = self.comparison(path, *operator, value, value_type.as_ref(), alias, model)?;
                if *negated {
                    format!("NOT ({})", cond)
                } else {
                    cond
                }
            }
            FilterNode::Logical {
                connective,
                children,
            } => {
                let (sep, empty) = match connective {
                    Connective::And => (" AND ", "TRUE"),
                    Connective::Or => (" OR ", "FALSE"),
                };
                if children.is_empty() {
                    return Ok(empty.to_string());
                }
                children
                    .iter()
                    .map(|c| self.filter(c, alias, model).map(|s| format!("({})", s)))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(sep)
            }
            FilterNode::Not(child) => format!("NOT ({})", self.filter(child, alias, model)?),
            FilterNode::Raw { sql } => sql.clone(),
            FilterNode::Virtual {
                path,
                expression,
                operator,
                literal,
                negated,
            } => {
                let target = self.model_at(model, &path.hops)?;
                virtual_condition(
                    expression,
                    *operator,
                    literal,
                    *negated,
                    &join_alias(alias, &path.hops),
                    target,
                )?
            }
        })
    }

    fn comparison(
        &mut self,
        path: &AttributePath,
        op: Operator,
        value: &FilterValue,
        value_type: Option<&ScalarType>,
        alias: &str,
        model: &'a ModelDescriptor,
    ) -> Result<String, PlanError> {
        let target = self.model_at(model, &path.hops)?;
        let mut lhs = column_ref(&join_alias(alias, &path.hops), target.column_of(&path.attribute));
        let in_document = !path.json_path.is_empty();
        if in_document {
            let keys: Vec<String> = path
                .json_path
                .iter()
                .map(|k| self.placeholder(Value::String(k.clone()), None))
                .collect();
            lhs = format!("({} #>> ARRAY[{}]::text[])", lhs, keys.join(", "));
        }
        let cast = if in_document || op.is_pattern() {
            None
        } else {
            value_type.and_then(pg_cast)
        };
        let v = match value {
            FilterValue::Cast { literal, sql_type } => {
                let p = self.placeholder(Value::String(literal.clone()), None);
                return Ok(format!("{} {} CAST({} AS {})", lhs, op.sql(), p, sql_type));
            }
            FilterValue::Json(v) => v,
        };
        Ok(match (op, v) {
            (Operator::Is | Operator::Not, Value::Null) => format!("{} {} NULL", lhs, op.sql()),
            (Operator::Is | Operator::Not, Value::Bool(b)) => {
                format!("{} {} {}", lhs, op.sql(), if *b { "TRUE" } else { "FALSE" })
            }
            (Operator::In, Value::Array(items)) if items.is_empty() => "FALSE".to_string(),
            (Operator::NotIn, Value::Array(items)) if items.is_empty() => "TRUE".to_string(),
            (Operator::Between | Operator::NotBetween, Value::Array(items)) => match items.as_slice() {
                [lo, hi] => {
                    let lo = self.operand(lo, cast, in_document);
                    let hi = self.operand(hi, cast, in_document);
                    format!("{} {} {} AND {}", lhs, op.sql(), lo, hi)
                }
                _ => {
                    return Err(PlanError::malformed(format!(
                        "_{}Op on '{}' expects exactly two values",
                        op.name(),
                        path
                    )))
                }
            },
            (op, Value::Array(items)) if op.takes_list() => {
                let ps: Vec<String> = items
                    .iter()
                    .map(|item| self.operand(item, cast, in_document))
                    .collect();
                format!("{} {} ({})", lhs, op.sql(), ps.join(", "))
            }
            (op, Value::String(s)) if op.is_pattern() => {
                let p = self.placeholder(Value::String(op.pattern(s)), None);
                format!("{} {} {}", lhs, op.sql(), p)
            }
            (_, Value::Array(_) | Value::Object(_)) => {
                return Err(PlanError::malformed(format!(
                    "_{}Op on '{}' cannot compare against {}",
                    op.name(),
                    path,
                    v
                )))
            }
            (op, v) => {
                let p = self.operand(v, cast, in_document);
                format!("{} {} {}", lhs, op.sql(), p)
            }
        })
    }

    /// `"alias"."col" AS "prefix.attr"` for every attribute of joined includes.
    fn include_columns(
        &self,
        out: &mut Vec<String>,
        includes: &[IncludeNode],
        parent_alias: &str,
        prefix: &str,
        parent: &'a ModelDescriptor,
    ) -> Result<(), PlanError> {
        for node in includes.iter().filter(|n| !n.separate) {
            let (_, target) = self.association(parent, &node.alias)?;
            let alias = format!("{}{}{}", parent_alias, JOIN_SEPARATOR, node.alias);
            let key = if prefix.is_empty() {
                node.alias.clone()
            } else {
                format!("{}.{}", prefix, node.alias)
            };
            for name in &node.attributes {
                let attr = target.attribute(name).ok_or_else(|| unknown_field(target, name))?;
                out.push(format!(
                    "{} AS {}",
                    attribute_expr(&alias, target, attr)?,
                    quoted(&format!("{}.{}", key, name))
                ));
            }
            self.include_columns(out, &node.includes, &alias, &key, target)?;
        }
        Ok(())
    }

    /// `JOIN` clauses for joined includes, with include filters in `ON`.
    fn joins(
        &mut self,
        out: &mut String,
        includes: &[IncludeNode],
        parent_alias: &str,
        parent: &'a ModelDescriptor,
    ) -> Result<(), PlanError> {
        for node in includes.iter().filter(|n| !n.separate) {
            let (assoc, target) = self.association(parent, &node.alias)?;
            let alias = format!("{}{}{}", parent_alias, JOIN_SEPARATOR, node.alias);
            let join = if node.required {
                "INNER JOIN"
            } else {
                "LEFT OUTER JOIN"
            };
            let parent_key = column_ref(parent_alias, parent.column_of(assoc.parent_key(parent)));
            let (source, mut on) = match (&assoc.kind, &assoc.through) {
                (AssociationKind::BelongsToMany, Some(through)) => {
                    let link = through_alias(&alias);
                    (
                        format!(
                            "({} AS {} INNER JOIN {} AS {} ON {} = {})",
                            quoted(&through.table),
                            quoted(&link),
                            quoted(&target.table),
                            quoted(&alias),
                            column_ref(&alias, target.column_of(target.primary_key())),
                            column_ref(&link, &through.other_key)
                        ),
                        format!("{} = {}", column_ref(&link, &through.foreign_key), parent_key),
                    )
                }
                _ => (
                    format!("{} AS {}", quoted(&target.table), quoted(&alias)),
                    format!(
                        "{} = {}",
                        column_ref(&alias, target.column_of(assoc.child_key(target))),
                        parent_key
                    ),
                ),
            };
            if let Some(filter) = &node.filter {
                on = format!("{} AND ({})", on, self.filter(filter, &alias, target)?);
            }
            out.push_str(&format!(" {} {} ON {}", join, source, on));
            self.joins(out, &node.includes, &alias, target)?;
        }
        Ok(())
    }

    fn select_item(&self, item: &SelectItem, alias: &str, model: &ModelDescriptor) -> Result<String, PlanError> {
        Ok(match item {
            SelectItem::Column { name } => {
                let attr = model.attribute(name).ok_or_else(|| unknown_field(model, name))?;
                format!("{} AS {}", attribute_expr(alias, model, attr)?, quoted(name))
            }
            SelectItem::Aggregate {
                func,
                attribute,
                alias: output,
            } => {
                let attr = model
                    .attribute(attribute)
                    .ok_or_else(|| unknown_field(model, attribute))?;
                let inner = format!("{}({})", func.sql(), column_ref(alias, &attr.column));
                let numeric = matches!(func, AggregateFn::Sum | AggregateFn::Avg)
                    || (attr.scalar_type.is_decimal() && *func != AggregateFn::Count);
                let expr = if numeric {
                    format!("CAST({} AS DOUBLE PRECISION)", inner)
                } else {
                    inner
                };
                format!("{} AS {}", expr, quoted(output))
            }
            SelectItem::Count => format!(
                "COUNT(DISTINCT {}) AS {}",
                column_ref(alias, model.column_of(model.primary_key())),
                quoted(COUNT_ALIAS)
            ),
        })
    }

    fn order(&self, entries: &[OrderEntry], base: &str) -> String {
        entries
            .iter()
            .map(|e| match &e.target {
                OrderTarget::Column { hops, column, .. } => {
                    format!("{} {}", column_ref(&join_alias(base, hops), column), e.direction.sql())
                }
                OrderTarget::Expression { sql } => format!("{} {}", sql, e.direction.sql()),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Render a plan. Separate includes are not part of this statement; see [`select_separate`].
pub fn select(ctx: &SchemaContext, plan: &QueryPlan) -> Result<QueryBuf, PlanError> {
    let model = ctx.model(&plan.model)?;
    let base = model.name.as_str();
    let mut r = Renderer::new(ctx);

    let mut columns = plan
        .attributes
        .iter()
        .map(|item| r.select_item(item, base, model))
        .collect::<Result<Vec<_>, _>>()?;
    if !plan.is_count() {
        r.include_columns(&mut columns, &plan.includes, base, "", model)?;
    }

    let mut from = format!("{} AS {}", quoted(&model.table), quoted(base));
    r.joins(&mut from, &plan.includes, base, model)?;

    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), from);
    if let Some(filter) = &plan.filter {
        let cond = r.filter(filter, base, model)?;
        sql.push_str(&format!(" WHERE {}", cond));
    }
    if !plan.group.is_empty() {
        let keys = plan
            .group
            .iter()
            .map(|g| column_ref(base, model.column_of(g)))
            .collect::<Vec<_>>();
        sql.push_str(&format!(" GROUP BY {}", keys.join(", ")));
    }
    if !plan.is_count() {
        if !plan.order.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", r.order(&plan.order, base)));
        }
        if let Some(limit) = plan.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = plan.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }
    r.q.sql = sql;
    Ok(r.q)
}

/// Batch-fetch a separate include for the given parent key values. Rows carry the parent key
/// under [`PARENT_KEY_ALIAS`]; with limit/offset they are numbered per parent and cut with a
/// window so every parent gets its own page.
pub fn select_separate(
    ctx: &SchemaContext,
    parent: &ModelDescriptor,
    node: &IncludeNode,
    parent_keys: &[Value],
) -> Result<QueryBuf, PlanError> {
    let mut r = Renderer::new(ctx);
    let (assoc, target) = r.association(parent, &node.alias)?;
    let base = target.name.as_str();

    let mut columns = node
        .attributes
        .iter()
        .map(|name| r.select_item(&SelectItem::column(name), base, target))
        .collect::<Result<Vec<_>, _>>()?;
    r.include_columns(&mut columns, &node.includes, base, "", target)?;

    let mut from = format!("{} AS {}", quoted(&target.table), quoted(base));
    let parent_ref = match (&assoc.kind, &assoc.through) {
        (AssociationKind::BelongsToMany, Some(through)) => {
            let link = through_alias(base);
            from.push_str(&format!(
                " INNER JOIN {} AS {} ON {} = {}",
                quoted(&through.table),
                quoted(&link),
                column_ref(&link, &through.other_key),
                column_ref(base, target.column_of(target.primary_key()))
            ));
            column_ref(&link, &through.foreign_key)
        }
        _ => column_ref(base, target.column_of(assoc.child_key(target))),
    };
    columns.push(format!("{} AS {}", parent_ref, quoted(PARENT_KEY_ALIAS)));
    r.joins(&mut from, &node.includes, base, target)?;

    let key_cast = parent
        .attribute(assoc.parent_key(parent))
        .and_then(|a| pg_cast(&a.scalar_type));
    let mut conds = Vec::new();
    if parent_keys.is_empty() {
        conds.push("FALSE".to_string());
    } else {
        let ps: Vec<String> = parent_keys
            .iter()
            .map(|k| r.placeholder(k.clone(), key_cast))
            .collect();
        conds.push(format!("{} IN ({})", parent_ref, ps.join(", ")));
    }
    if let Some(filter) = &node.filter {
        conds.push(format!("({})", r.filter(filter, base, target)?));
    }
    let pk = column_ref(base, target.column_of(target.primary_key()));

    let paged = node.limit.is_some() || node.offset.is_some();
    if paged {
        columns.push(format!(
            "ROW_NUMBER() OVER (PARTITION BY {} ORDER BY {}) AS {}",
            parent_ref,
            pk,
            quoted(ROW_NUMBER_ALIAS)
        ));
    }
    let inner = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}, {}",
        columns.join(", "),
        from,
        conds.join(" AND "),
        parent_ref,
        pk
    );
    r.q.sql = if paged {
        let offset = node.offset.unwrap_or(0);
        let mut window = format!("{} > {}", quoted(ROW_NUMBER_ALIAS), offset);
        if let Some(limit) = node.limit {
            let last = offset
                .checked_add(limit)
                .filter(|n| i64::try_from(*n).is_ok())
                .ok_or_else(|| {
                    PlanError::malformed(format!(
                        "limit {} with offset {} on '{}' is out of range",
                        limit, offset, node.alias
                    ))
                })?;
            window.push_str(&format!(" AND {} <= {}", quoted(ROW_NUMBER_ALIAS), last));
        }
        format!(
            "SELECT * FROM ({}) AS \"paged\" WHERE {} ORDER BY {}, {}",
            inner,
            window,
            quoted(PARENT_KEY_ALIAS),
            quoted(ROW_NUMBER_ALIAS)
        )
    } else {
        inner
    };
    Ok(r.q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::shop;
    use crate::query::resolver::QueryCompiler;
    use crate::query::selection::{ExecutionInfo, FieldSelection, Selection};
    use serde_json::json;

    fn plan(model: &str, query: Value, selections: Vec<Selection>) -> QueryPlan {
        QueryCompiler::new(shop())
            .root_list(
                model,
                &FieldSelection::new("list")
                    .with_argument("query", query)
                    .with_selections(selections),
                &ExecutionInfo::default(),
            )
            .unwrap()
    }

    #[test]
    fn simple_equality() {
        let ctx = shop();
        let q = select(&ctx, &plan("Order", json!({ "where": { "status": "paid" } }), vec![Selection::field("status")])).unwrap();
        assert_eq!(
            q.sql,
            r#"SELECT "Order"."status" AS "status", "Order"."id" AS "id" FROM "orders" AS "Order" WHERE "Order"."status" = $1"#
        );
        assert_eq!(q.params, vec![json!("paid")]);
    }

    #[test]
    fn cross_model_filter_joins_and_qualifies() {
        let ctx = shop();
        let q = select(
            &ctx,
            &plan(
                "Order",
                json!({ "where": { "customer__country": "NZ", "quantity": { "_gteOp": "2" } } }),
                vec![Selection::field("id")],
            ),
        )
        .unwrap();
        assert_eq!(
            q.sql,
            concat!(
                r#"SELECT "Order"."id" AS "id" FROM "orders" AS "Order" "#,
                r#"LEFT OUTER JOIN "customers" AS "Order->customer" ON "Order->customer"."id" = "Order"."customer_id" "#,
                r#"WHERE ("Order->customer"."country" = $1) AND ("Order"."quantity" >= $2::bigint)"#
            )
        );
        assert_eq!(q.params, vec![json!("NZ"), json!(2)]);
    }

    #[test]
    fn selected_includes_are_aliased_for_nesting() {
        let ctx = shop();
        let q = select(
            &ctx,
            &plan(
                "Order",
                json!({ "order": [["customer__lastName", "DESC"]], "limit": 5 }),
                vec![Selection::Field(
                    FieldSelection::new("customer").with_selections(vec![Selection::field("country")]),
                )],
            ),
        )
        .unwrap();
        assert_eq!(
            q.sql,
            concat!(
                r#"SELECT "Order"."customer_id" AS "customerId", "Order"."id" AS "id", "#,
                r#""Order->customer"."country" AS "customer.country" FROM "orders" AS "Order" "#,
                r#"LEFT OUTER JOIN "customers" AS "Order->customer" ON "Order->customer"."id" = "Order"."customer_id" "#,
                r#"ORDER BY "Order->customer"."last_name" DESC LIMIT 5"#
            )
        );
    }

    #[test]
    fn negated_paths_render_inner_join_and_not() {
        let ctx = shop();
        let q = select(
            &ctx,
            &plan("Order", json!({ "where": { "items!!product__sku": "X" } }), vec![Selection::field("id")]),
        )
        .unwrap();
        assert!(q.sql.contains(r#"INNER JOIN "order_items" AS "Order->items""#));
        assert!(q.sql.contains(r#"INNER JOIN "products" AS "Order->items->product""#));
        assert!(q
            .sql
            .ends_with(r#"WHERE NOT ("Order->items->product"."sku" = $1)"#));
    }

    #[test]
    fn grouped_select() {
        let ctx = shop();
        let q = select(
            &ctx,
            &plan(
                "Order",
                json!({ "group": ["region"] }),
                vec![Selection::field("region"), Selection::field("totalPrice")],
            ),
        )
        .unwrap();
        assert_eq!(
            q.sql,
            concat!(
                r#"SELECT "Order"."region" AS "region", CAST(SUM("Order"."total_price") AS DOUBLE PRECISION) AS "totalPrice" "#,
                r#"FROM "orders" AS "Order" GROUP BY "Order"."region" ORDER BY "Order"."region" ASC"#
            )
        );
    }

    #[test]
    fn count_and_json_paths() {
        let ctx = shop();
        let count = QueryCompiler::new(shop())
            .count(
                "Order",
                &FieldSelection::new("count").with_argument(
                    "query",
                    json!({ "where": { "metadata": { "gift": { "wrap": true } }, "status": { "_startsWithOp": "pa" } } }),
                ),
                &ExecutionInfo::default(),
            )
            .unwrap();
        let q = select(&ctx, &count).unwrap();
        assert_eq!(
            q.sql,
            concat!(
                r#"SELECT COUNT(DISTINCT "Order"."id") AS "__count__" FROM "orders" AS "Order" "#,
                r#"WHERE (("Order"."metadata" #>> ARRAY[$1, $2]::text[]) = $3) AND ("Order"."status" LIKE $4)"#
            )
        );
        assert_eq!(q.params, vec![json!("gift"), json!("wrap"), json!("true"), json!("pa%")]);
    }

    #[test]
    fn in_lists_virtuals_and_empty_lists() {
        let ctx = shop();
        let q = select(
            &ctx,
            &plan(
                "Order",
                json!({ "where": { "id": [1, 2], "score": { "_gtOp": 3 }, "region": { "_notInOp": [] } } }),
                vec![Selection::field("score")],
            ),
        )
        .unwrap();
        assert_eq!(
            q.sql,
            concat!(
                r#"SELECT ("Order"."quantity" * 2) AS "score", "Order"."id" AS "id" FROM "orders" AS "Order" "#,
                r#"WHERE ("Order"."id" IN ($1::bigint, $2::bigint)) AND (("Order"."quantity" * 2) > 3) AND (TRUE)"#
            )
        );

        let empty = select(
            &ctx,
            &plan("Order", json!({ "where": { "score": { "_inOp": [] } } }), vec![Selection::field("id")]),
        )
        .unwrap();
        assert!(empty.sql.ends_with(r#"WHERE FALSE"#));
        let empty = select(
            &ctx,
            &plan("Order", json!({ "where": { "score": { "_notInOp": [] } } }), vec![Selection::field("id")]),
        )
        .unwrap();
        assert!(empty.sql.ends_with(r#"WHERE TRUE"#));
    }

    #[test]
    fn virtual_attributes_through_a_join_are_qualified() {
        let ctx = shop();
        let q = select(
            &ctx,
            &plan(
                "Order",
                json!({ "where": { "customer__fullName": "Ada L" } }),
                vec![Selection::field("id")],
            ),
        )
        .unwrap();
        assert_eq!(
            q.sql,
            concat!(
                r#"SELECT "Order"."id" AS "id" FROM "orders" AS "Order" "#,
                r#"LEFT OUTER JOIN "customers" AS "Order->customer" ON "Order->customer"."id" = "Order"."customer_id" "#,
                r#"WHERE ("Order->customer"."first_name" || ' ' || "Order->customer"."last_name") = 'Ada L'"#
            )
        );

        let selected = select(
            &ctx,
            &plan(
                "Order",
                json!({}),
                vec![Selection::Field(
                    FieldSelection::new("customer").with_selections(vec![Selection::field("fullName")]),
                )],
            ),
        )
        .unwrap();
        assert!(selected.sql.contains(
            r#"("Order->customer"."first_name" || ' ' || "Order->customer"."last_name") AS "customer.fullName""#
        ));
    }

    #[test]
    fn qualifies_only_bare_columns() {
        let ctx = shop();
        let order = ctx.model("Order").unwrap();
        assert_eq!(
            qualify_expression("COALESCE(quantity, 0) + 'quantity'::text::int + o.quantity", "O", order).unwrap(),
            r#"COALESCE("O"."quantity", 0) + 'quantity'::text::int + o.quantity"#
        );
    }

    #[test]
    fn belongs_to_many_joins_through_the_link_table() {
        let ctx = shop();
        let q = select(
            &ctx,
            &plan(
                "Order",
                json!({}),
                vec![Selection::Field(FieldSelection::new("tags").with_selections(vec![Selection::field("label")]))],
            ),
        )
        .unwrap();
        assert!(q.sql.contains(concat!(
            r#"LEFT OUTER JOIN ("order_tags" AS "Order->tags->through" INNER JOIN "tags" AS "Order->tags" "#,
            r#"ON "Order->tags"."id" = "Order->tags->through"."tag_id") "#,
            r#"ON "Order->tags->through"."order_id" = "Order"."id""#
        )));
    }

    #[test]
    fn separate_fetch_pages_per_parent() {
        let ctx = shop();
        let order = ctx.model("Order").unwrap();
        let mut notes = IncludeNode::new("Note", "notes", AssociationKind::HasMany);
        notes.attributes.insert("body".into());
        notes.attributes.insert("id".into());
        notes.limit = Some(2);
        notes.separate = true;
        let q = select_separate(&ctx, order, &notes, &[json!(1), json!(2)]).unwrap();
        assert_eq!(
            q.sql,
            concat!(
                r#"SELECT * FROM (SELECT "Note"."body" AS "body", "Note"."id" AS "id", "Note"."order_id" AS "__parent__", "#,
                r#"ROW_NUMBER() OVER (PARTITION BY "Note"."order_id" ORDER BY "Note"."id") AS "__rn__" "#,
                r#"FROM "notes" AS "Note" WHERE "Note"."order_id" IN ($1::bigint, $2::bigint) "#,
                r#"ORDER BY "Note"."order_id", "Note"."id") AS "paged" "#,
                r#"WHERE "__rn__" > 0 AND "__rn__" <= 2 ORDER BY "__parent__", "__rn__""#
            )
        );
        assert_eq!(q.params, vec![json!(1), json!(2)]);
    }

    #[test]
    fn separate_window_bounds_are_checked() {
        let ctx = shop();
        let order = ctx.model("Order").unwrap();
        let mut notes = IncludeNode::new("Note", "notes", AssociationKind::HasMany);
        notes.attributes.insert("id".into());
        notes.separate = true;
        notes.limit = Some(u64::MAX);
        notes.offset = Some(1);
        assert!(matches!(
            select_separate(&ctx, order, &notes, &[json!(1)]),
            Err(PlanError::MalformedFilter(_))
        ));

        notes.limit = Some(i64::MAX as u64);
        notes.offset = Some(1);
        assert!(select_separate(&ctx, order, &notes, &[json!(1)]).is_err());

        notes.limit = Some(5);
        notes.offset = Some(10);
        let q = select_separate(&ctx, order, &notes, &[json!(1)]).unwrap();
        assert!(q.sql.contains(r#"WHERE "__rn__" > 10 AND "__rn__" <= 15"#));
    }
}

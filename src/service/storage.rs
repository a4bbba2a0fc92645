//! Executes query plans against PostgreSQL and assembles nested results.

use crate::config::ModelDescriptor;
use crate::context::SchemaContext;
use crate::error::{AppError, PlanError};
use crate::query::include::IncludeNode;
use crate::query::plan::{QueryPlan, SelectItem, COUNT_ALIAS};
use crate::sql::{select, select_separate, PgBindValue, QueryBuf, PARENT_KEY_ALIAS, ROW_NUMBER_ALIAS};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Executes plans produced by the query compiler.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Rows of the plan's model with includes nested under their aliases.
    async fn find_all(&self, plan: &QueryPlan) -> Result<Vec<Value>, AppError>;

    /// Number of distinct base rows the plan's filter matches.
    async fn count(&self, plan: &QueryPlan) -> Result<u64, AppError>;
}

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
    ctx: Arc<SchemaContext>,
}

impl PgStorage {
    pub fn new(pool: PgPool, ctx: Arc<SchemaContext>) -> Self {
        PgStorage { pool, ctx }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn query_many(&self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    /// Fill separate includes of `includes` into `rows`, descending through joined includes.
    fn load_separate<'a>(
        &'a self,
        model: &'a ModelDescriptor,
        includes: &'a [IncludeNode],
        rows: &'a mut Vec<Value>,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        Box::pin(async move {
            for node in includes {
                let target = self.ctx.model(&node.target_model)?;
                if node.separate {
                    self.fetch_separate(model, target, node, rows).await?;
                } else if has_separate(&node.includes) {
                    let (mut children, slots) = take_children(rows, &node.alias);
                    self.load_separate(target, &node.includes, &mut children).await?;
                    put_children(rows, &node.alias, children, &slots);
                }
            }
            Ok(())
        })
    }

    async fn fetch_separate(
        &self,
        parent: &ModelDescriptor,
        target: &ModelDescriptor,
        node: &IncludeNode,
        rows: &mut [Value],
    ) -> Result<(), AppError> {
        let assoc = parent.association(&node.alias).ok_or_else(|| PlanError::UnknownField {
            model: parent.name.clone(),
            field: node.alias.clone(),
            valid: parent.attribute_names(),
        })?;
        let parent_key = assoc.parent_key(parent);
        let mut seen = IndexSet::new();
        let keys: Vec<Value> = rows
            .iter()
            .filter_map(|r| r.get(parent_key))
            .filter(|v| !v.is_null() && seen.insert(v.to_string()))
            .cloned()
            .collect();
        let fetched = if keys.is_empty() {
            Vec::new()
        } else {
            let q = select_separate(&self.ctx, parent, node, &keys)?;
            self.query_many(&q).await?
        };
        tracing::debug!(alias = %node.alias, parents = keys.len(), rows = fetched.len(), "separate include loaded");

        let mut by_parent: IndexMap<String, Vec<Value>> = IndexMap::new();
        for mut row in fetched {
            let owner = match row.as_object_mut() {
                Some(obj) => {
                    obj.remove(ROW_NUMBER_ALIAS);
                    obj.remove(PARENT_KEY_ALIAS).unwrap_or(Value::Null)
                }
                None => continue,
            };
            by_parent.entry(owner.to_string()).or_default().push(row);
        }
        let mut groups = Vec::with_capacity(by_parent.len());
        let mut children = Vec::new();
        for (owner, group) in by_parent {
            let assembled = assemble(&self.ctx, target, &node.includes, group)?;
            groups.push((owner, assembled.len()));
            children.extend(assembled);
        }
        self.load_separate(target, &node.includes, &mut children).await?;

        let mut grouped: IndexMap<String, Vec<Value>> = IndexMap::new();
        let mut rest = children.into_iter();
        for (owner, len) in groups {
            grouped.insert(owner, rest.by_ref().take(len).collect());
        }
        for row in rows.iter_mut() {
            let owner = row.get(parent_key).map(Value::to_string).unwrap_or_default();
            let found = grouped.get(&owner).cloned().unwrap_or_default();
            let value = if node.kind.is_many() {
                Value::Array(found)
            } else {
                found.into_iter().next().unwrap_or(Value::Null)
            };
            if let Some(obj) = row.as_object_mut() {
                obj.insert(node.alias.clone(), value);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageEngine for PgStorage {
    async fn find_all(&self, plan: &QueryPlan) -> Result<Vec<Value>, AppError> {
        let model = self.ctx.model(&plan.model)?;
        let q = select(&self.ctx, plan)?;
        let flat = self.query_many(&q).await?;
        let mut rows = assemble(&self.ctx, model, &plan.includes, flat)?;
        self.load_separate(model, &plan.includes, &mut rows).await?;
        Ok(rows)
    }

    async fn count(&self, plan: &QueryPlan) -> Result<u64, AppError> {
        let q = if plan.is_count() {
            select(&self.ctx, plan)?
        } else {
            let mut counting = plan.clone();
            counting.attributes = IndexSet::from([SelectItem::Count]);
            counting.group.clear();
            select(&self.ctx, &counting)?
        };
        let rows = self.query_many(&q).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get(COUNT_ALIAS))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

fn has_separate(includes: &[IncludeNode]) -> bool {
    includes.iter().any(|n| n.separate || has_separate(&n.includes))
}

/// Zero-attribute includes that only exist for a filter or order path.
fn is_path_only(node: &IncludeNode) -> bool {
    node.attributes.is_empty() && node.includes.iter().all(is_path_only)
}

enum Slot {
    Many(usize),
    One,
    Empty,
}

fn take_children(rows: &mut [Value], alias: &str) -> (Vec<Value>, Vec<Slot>) {
    let mut children = Vec::new();
    let mut slots = Vec::with_capacity(rows.len());
    for row in rows.iter_mut() {
        match row.get_mut(alias).map(Value::take) {
            Some(Value::Array(items)) => {
                slots.push(Slot::Many(items.len()));
                children.extend(items);
            }
            Some(v @ Value::Object(_)) => {
                slots.push(Slot::One);
                children.push(v);
            }
            _ => slots.push(Slot::Empty),
        }
    }
    (children, slots)
}

fn put_children(rows: &mut [Value], alias: &str, children: Vec<Value>, slots: &[Slot]) {
    let mut rest = children.into_iter();
    for (row, slot) in rows.iter_mut().zip(slots) {
        let value = match slot {
            Slot::Many(n) => Value::Array(rest.by_ref().take(*n).collect()),
            Slot::One => rest.next().unwrap_or(Value::Null),
            Slot::Empty => continue,
        };
        if let Some(obj) = row.as_object_mut() {
            obj.insert(alias.to_string(), value);
        }
    }
}

/// Split `"a.b"` keys into nested objects.
fn nest(flat: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut out, &parts, value);
    }
    out
}

fn insert_path(obj: &mut Map<String, Value>, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            obj.insert(last.to_string(), value);
        }
        [head, rest @ ..] => {
            let slot = obj
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// A left-joined object with no matching row.
fn is_unmatched(obj: &Map<String, Value>) -> bool {
    obj.values().all(|v| match v {
        Value::Null => true,
        Value::Object(inner) => is_unmatched(inner),
        Value::Array(items) => items.is_empty(),
        _ => false,
    })
}

/// Turn flat joined rows into one object per base row: to-many children are collected (and
/// de-duplicated by primary key), unmatched to-one joins become `null` and path-only joins are
/// dropped.
pub fn assemble(
    ctx: &SchemaContext,
    model: &ModelDescriptor,
    includes: &[IncludeNode],
    flat: Vec<Value>,
) -> Result<Vec<Value>, PlanError> {
    let rows = flat
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(obj) => Some(nest(obj)),
            _ => None,
        })
        .collect();
    merge_rows(ctx, model, includes, rows)
}

fn merge_rows(
    ctx: &SchemaContext,
    model: &ModelDescriptor,
    includes: &[IncludeNode],
    rows: Vec<Map<String, Value>>,
) -> Result<Vec<Value>, PlanError> {
    let joined: Vec<&IncludeNode> = includes.iter().filter(|n| !n.separate).collect();
    let pk = model.primary_key();
    let mut merged: IndexMap<String, (Map<String, Value>, IndexMap<String, Vec<Map<String, Value>>>)> =
        IndexMap::new();
    for mut row in rows {
        let mut children: Vec<(String, Map<String, Value>)> = Vec::new();
        for node in &joined {
            if let Some(Value::Object(child)) = row.remove(&node.alias) {
                if !is_unmatched(&child) {
                    children.push((node.alias.clone(), child));
                }
            }
        }
        let identity = match row.get(pk) {
            Some(id) if !id.is_null() => id.to_string(),
            _ => Value::Object(row.clone()).to_string(),
        };
        let entry = merged
            .entry(identity)
            .or_insert_with(|| (row, IndexMap::new()));
        for (alias, child) in children {
            entry.1.entry(alias).or_default().push(child);
        }
    }

    let mut out = Vec::with_capacity(merged.len());
    for (_, (mut own, mut children)) in merged {
        for node in &joined {
            if is_path_only(node) {
                continue;
            }
            let target = ctx.model(&node.target_model)?;
            let kids = children.shift_remove(&node.alias).unwrap_or_default();
            let kids = merge_rows(ctx, target, &node.includes, kids)?;
            let value = if node.kind.is_many() {
                Value::Array(kids)
            } else {
                kids.into_iter().next().unwrap_or(Value::Null)
            };
            own.insert(node.alias.clone(), value);
        }
        out.push(Value::Object(own));
    }
    Ok(out)
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(t)) = row.try_get::<Option<chrono::NaiveTime>, _>(name) {
        return Value::String(t.format("%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssociationKind;
    use crate::query::fixtures::shop;
    use serde_json::json;

    fn node(target: &str, alias: &str, kind: AssociationKind, attrs: &[&str]) -> IncludeNode {
        let mut n = IncludeNode::new(target, alias, kind);
        n.attributes = attrs.iter().map(|a| a.to_string()).collect();
        n
    }

    #[test]
    fn nests_dotted_keys() {
        let flat = json!({ "id": 1, "customer.country": "NZ", "items.product.sku": "X" });
        let Value::Object(flat) = flat else { unreachable!() };
        assert_eq!(
            Value::Object(nest(flat)),
            json!({ "id": 1, "customer": { "country": "NZ" }, "items": { "product": { "sku": "X" } } })
        );
    }

    #[test]
    fn collects_to_many_children_and_nulls_unmatched_joins() {
        let ctx = shop();
        let order = ctx.model("Order").unwrap();
        let includes = vec![
            node("Customer", "customer", AssociationKind::BelongsTo, &["country"]),
            node("OrderItem", "items", AssociationKind::HasMany, &["price", "id"]),
        ];
        let flat = vec![
            json!({ "id": 1, "customer.country": "NZ", "items.price": 2.5, "items.id": 10 }),
            json!({ "id": 1, "customer.country": "NZ", "items.price": 4.0, "items.id": 11 }),
            json!({ "id": 1, "customer.country": "NZ", "items.price": 4.0, "items.id": 11 }),
            json!({ "id": 2, "customer.country": null, "items.price": null, "items.id": null }),
        ];
        let rows = assemble(&ctx, order, &includes, flat).unwrap();
        assert_eq!(
            rows,
            vec![
                json!({ "id": 1, "customer": { "country": "NZ" }, "items": [
                    { "price": 2.5, "id": 10 }, { "price": 4.0, "id": 11 }
                ] }),
                json!({ "id": 2, "customer": null, "items": [] }),
            ]
        );
    }

    #[test]
    fn path_only_joins_are_not_returned() {
        let ctx = shop();
        let order = ctx.model("Order").unwrap();
        let includes = vec![node("Customer", "customer", AssociationKind::BelongsTo, &[])];
        let rows = assemble(&ctx, order, &includes, vec![json!({ "id": 7, "status": "paid" })]).unwrap();
        assert_eq!(rows, vec![json!({ "id": 7, "status": "paid" })]);
    }

    #[test]
    fn grouped_rows_without_keys_stay_distinct() {
        let ctx = shop();
        let order = ctx.model("Order").unwrap();
        let flat = vec![
            json!({ "region": "north", "totalPrice": 10.0 }),
            json!({ "region": "south", "totalPrice": 4.0 }),
        ];
        assert_eq!(assemble(&ctx, order, &[], flat.clone()).unwrap(), flat);
    }

    #[test]
    fn children_round_trip_through_slots() {
        let mut rows = vec![
            json!({ "id": 1, "customer": { "id": 5 } }),
            json!({ "id": 2, "customer": null }),
            json!({ "id": 3, "customer": { "id": 6 } }),
        ];
        let (mut children, slots) = take_children(&mut rows, "customer");
        assert_eq!(children.len(), 2);
        for c in children.iter_mut() {
            c["orders"] = json!([]);
        }
        put_children(&mut rows, "customer", children, &slots);
        assert_eq!(rows[0], json!({ "id": 1, "customer": { "id": 5, "orders": [] } }));
        assert_eq!(rows[1], json!({ "id": 2, "customer": null }));
        assert_eq!(rows[2]["customer"]["id"], json!(6));
    }
}

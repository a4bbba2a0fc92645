//! Subscription re-filtering: change events are reduced to primary keys and re-queried through
//! the subscriber's own plan.

use crate::context::SchemaContext;
use crate::error::PlanError;
use crate::query::compiler::compile;
use crate::query::filter::FilterNode;
use crate::query::plan::QueryPlan;
use crate::query::resolver::QueryCompiler;
use crate::query::selection::{ExecutionInfo, FieldSelection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// A change notification for rows of one model. Either bare ids or full instances (or both).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEvent {
    pub model: String,
    #[serde(default)]
    pub ids: Vec<Value>,
    #[serde(default)]
    pub instances: Vec<Value>,
}

/// Unique primary-key values of `model` across `events`, in first-seen order.
pub fn reduce_payloads(
    ctx: &SchemaContext,
    model: &str,
    events: &[ModelEvent],
) -> Result<Vec<Value>, PlanError> {
    let pk = ctx.model(model)?.primary_key();
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for event in events.iter().filter(|e| e.model == model) {
        let from_instances = event.instances.iter().filter_map(|i| i.get(pk));
        for id in event.ids.iter().chain(from_instances) {
            if id.is_null() {
                continue;
            }
            if seen.insert(id.to_string()) {
                ids.push(id.clone());
            }
        }
    }
    Ok(ids)
}

/// Payload of a delete subscription: `{<pk>: id}` per removed row. The rows are gone, so
/// nothing is re-queried.
pub fn deleted_ids(
    ctx: &SchemaContext,
    model: &str,
    events: &[ModelEvent],
) -> Result<Vec<Value>, PlanError> {
    let pk = ctx.model(model)?.primary_key();
    Ok(reduce_payloads(ctx, model, events)?
        .into_iter()
        .map(|id| {
            let mut row = Map::new();
            row.insert(pk.to_string(), id);
            Value::Object(row)
        })
        .collect())
}

impl QueryCompiler {
    /// Plan that re-reads the changed rows through the subscriber's selection and filter. The
    /// id set is ANDed in, so the client filter can only narrow it. `None` when the events
    /// carry no ids for `model`.
    pub fn subscription_instances(
        &self,
        model: &str,
        field: &FieldSelection,
        info: &ExecutionInfo,
        events: &[ModelEvent],
    ) -> Result<Option<QueryPlan>, PlanError> {
        let ctx = self.context();
        let ids = reduce_payloads(ctx, model, events)?;
        if ids.is_empty() {
            return Ok(None);
        }
        tracing::debug!(model, ids = ids.len(), "re-filtering subscription payload");
        let descriptor = ctx.model(model)?;
        let mut by_id = Map::new();
        by_id.insert(descriptor.primary_key().to_string(), json!({ "_inOp": ids }));
        let by_id = compile(ctx, model, &Value::Object(by_id))?;
        let mut plan = self.root_list(model, field, info)?;
        plan.filter = Some(FilterNode::and(
            plan.filter.take().into_iter().chain([by_id]).collect(),
        ));
        Ok(Some(plan))
    }
}

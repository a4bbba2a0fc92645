//! Resolver-facing entry points. Each one turns a GraphQL field plus its execution context into
//! a [`QueryPlan`] the storage engine can run.

use crate::config::{AssociationKind, ModelDescriptor};
use crate::context::SchemaContext;
use crate::error::PlanError;
use crate::query::args::QueryArgs;
use crate::query::compiler::compile;
use crate::query::compose::{compose, lower_virtual};
use crate::query::filter::{AttributePath, FilterNode, FilterValue, Operator};
use crate::query::include::{ensure_path, IncludePlanner};
use crate::query::merge;
use crate::query::plan::{PartialPlan, QueryPlan, SelectItem};
use crate::query::selection::{ExecutionInfo, FieldSelection};
use crate::sql::quoted;
use indexmap::IndexSet;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Mutations whose filter must be explicit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    Update,
    Delete,
}

impl Mutation {
    pub fn name(self) -> &'static str {
        match self {
            Mutation::Update => "update",
            Mutation::Delete => "delete",
        }
    }
}

fn association_field_names(ctx: &SchemaContext, model: &ModelDescriptor) -> Vec<String> {
    model
        .associations
        .values()
        .map(|a| ctx.field_name(a))
        .collect()
}

/// SQL literal for a correlation value. Only numbers and strings can be keys.
fn key_literal(value: &Value) -> Result<String, PlanError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        other => Err(PlanError::malformed(format!(
            "parent key value {} is not a number or a string",
            other
        ))),
    }
}

#[derive(Clone, Debug)]
pub struct QueryCompiler {
    ctx: Arc<SchemaContext>,
}

impl QueryCompiler {
    pub fn new(ctx: Arc<SchemaContext>) -> Self {
        QueryCompiler { ctx }
    }

    pub fn context(&self) -> &SchemaContext {
        &self.ctx
    }

    /// First stage: joins and attributes for the field's selection set.
    pub fn plan_association_joins(
        &self,
        model: &str,
        field: &FieldSelection,
        info: &ExecutionInfo,
    ) -> Result<PartialPlan, PlanError> {
        IncludePlanner::new(&self.ctx, info).plan(model, &field.selections, None, &[])
    }

    /// Second stage: `where`, `without`, grouping, ordering and pagination.
    pub fn apply_query_modifiers(
        &self,
        partial: PartialPlan,
        args: &QueryArgs,
    ) -> Result<QueryPlan, PlanError> {
        let ctx = &*self.ctx;
        let model = ctx.model(&partial.model)?;
        let mut partial = partial;
        let mut conjuncts = Vec::new();
        if let Some(filter) = &args.filter {
            conjuncts.push(compile(ctx, &model.name, filter)?);
        }
        for field in &args.without {
            let assoc = ctx
                .association_for_field(model, field)
                .ok_or_else(|| PlanError::UnknownField {
                    model: model.name.clone(),
                    field: field.clone(),
                    valid: association_field_names(ctx, model),
                })?;
            let target = ctx.registry.target_of(assoc)?;
            let hops = vec![assoc.name.clone()];
            ensure_path(ctx, model, &mut partial.includes, &hops, false)?;
            let pk = target.primary_key();
            conjuncts.push(FilterNode::Comparison {
                path: AttributePath::through(hops, pk),
                operator: Operator::Is,
                value: FilterValue::Json(Value::Null),
                value_type: target.attribute(pk).map(|a| a.scalar_type.clone()),
                negated: false,
            });
        }
        let filter = Some(FilterNode::and(conjuncts)).filter(|f| !f.is_always());
        let plan = compose(ctx, partial, filter, args)?;
        tracing::debug!(
            model = %plan.model,
            includes = plan.includes.len(),
            grouped = !plan.group.is_empty(),
            "query plan composed"
        );
        Ok(plan)
    }

    /// Plan for a root list field of `model`.
    pub fn root_list(
        &self,
        model: &str,
        field: &FieldSelection,
        info: &ExecutionInfo,
    ) -> Result<QueryPlan, PlanError> {
        let partial = self.plan_association_joins(model, field, info)?;
        let args = QueryArgs::from_field(field, info)?.unwrap_or_default();
        self.apply_query_modifiers(partial, &args)
    }

    /// Plan for an association field of one already-loaded parent row: the field's own plan
    /// with the correlation on the parent's key ANDed into its filter.
    pub fn association_list(
        &self,
        parent_model: &str,
        field: &FieldSelection,
        parent_row: &Value,
        info: &ExecutionInfo,
    ) -> Result<QueryPlan, PlanError> {
        let ctx = &*self.ctx;
        let parent = ctx.model(parent_model)?;
        let assoc = ctx
            .association_for_field(parent, &field.name)
            .ok_or_else(|| PlanError::UnknownField {
                model: parent.name.clone(),
                field: field.name.clone(),
                valid: association_field_names(ctx, parent),
            })?;
        let target = ctx.registry.target_of(assoc)?;
        let parent_key = assoc.parent_key(parent);
        let key_value = parent_row
            .get(parent_key)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                PlanError::malformed(format!(
                    "parent {} row has no value for key '{}' of '{}'",
                    parent.name, parent_key, field.name
                ))
            })?;

        let correlation = match (&assoc.kind, &assoc.through) {
            (AssociationKind::BelongsToMany, Some(through)) => FilterNode::Raw {
                sql: format!(
                    "{}.{} IN (SELECT {} FROM {} WHERE {} = {})",
                    quoted(&target.name),
                    quoted(target.column_of(target.primary_key())),
                    quoted(&through.other_key),
                    quoted(&through.table),
                    quoted(&through.foreign_key),
                    key_literal(&key_value)?
                ),
            },
            _ => {
                let mut by_key = Map::new();
                by_key.insert(assoc.child_key(target).to_string(), key_value);
                compile(ctx, &target.name, &Value::Object(by_key))?
            }
        };
        let mut plan = self.root_list(&target.name, field, info)?;
        plan.filter = Some(FilterNode::and(
            plan.filter.take().into_iter().chain([correlation]).collect(),
        ));
        Ok(plan)
    }

    /// `COUNT(DISTINCT pk)` over the rows the field's `where`/`without` select. Selection joins,
    /// grouping, ordering and pagination are ignored.
    pub fn count(
        &self,
        model: &str,
        field: &FieldSelection,
        info: &ExecutionInfo,
    ) -> Result<QueryPlan, PlanError> {
        let model = self.ctx.model(model)?;
        let args = QueryArgs::from_field(field, info)?.unwrap_or_default();
        let args = QueryArgs {
            filter: args.filter,
            without: args.without,
            ..QueryArgs::default()
        };
        let partial = PartialPlan {
            model: model.name.clone(),
            ..PartialPlan::default()
        };
        let mut plan = self.apply_query_modifiers(partial, &args)?;
        plan.attributes = IndexSet::from([SelectItem::Count]);
        Ok(plan)
    }

    /// Filter of an update or delete. A missing `where` is refused rather than read as "all rows",
    /// and so is a path through an association since the statement only sees the target table.
    pub fn mutation_filter(
        &self,
        model: &str,
        mutation: Mutation,
        args: &Value,
    ) -> Result<FilterNode, PlanError> {
        let filter = args
            .get("where")
            .filter(|w| !w.is_null())
            .ok_or(PlanError::MissingRequiredClause {
                operation: mutation.name(),
                clause: "where",
            })?;
        let descriptor = self.ctx.model(model)?;
        let compiled = compile(&self.ctx, model, filter)?;
        if let Some(path) = compiled.paths().into_iter().find(|p| !p.hops.is_empty()) {
            return Err(PlanError::malformed(format!(
                "{} filter cannot reach '{}' through an association",
                mutation.name(),
                path
            )));
        }
        lower_virtual(&self.ctx, compiled, descriptor, &descriptor.name)
    }

    pub fn merge(&self, a: QueryPlan, b: QueryPlan) -> Result<QueryPlan, PlanError> {
        merge::merge(a, b)
    }
}

//! Include planner: turns a selection set into a tree of association joins.

use crate::config::{AssociationKind, ModelDescriptor};
use crate::context::SchemaContext;
use crate::error::PlanError;
use crate::query::args::{is_optimized, QueryArgs};
use crate::query::compiler::compile;
use crate::query::filter::FilterNode;
use crate::query::merge::merge_into;
use crate::query::plan::PartialPlan;
use crate::query::selection::{ExecutionInfo, FieldSelection, Selection};
use indexmap::IndexSet;
use serde::Serialize;
use std::collections::HashSet;

/// One association join. Unique per `(target_model, alias)` among its siblings.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeNode {
    pub target_model: String,
    pub alias: String,
    pub kind: AssociationKind,
    pub attributes: IndexSet<String>,
    #[serde(rename = "where")]
    pub filter: Option<FilterNode>,
    pub includes: Vec<IncludeNode>,
    /// Inner join when set, left outer join otherwise.
    pub required: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Loaded by a second query instead of a join (paginated to-many fields).
    pub separate: bool,
}

impl IncludeNode {
    pub fn new(target_model: impl Into<String>, alias: impl Into<String>, kind: AssociationKind) -> Self {
        IncludeNode {
            target_model: target_model.into(),
            alias: alias.into(),
            kind,
            attributes: IndexSet::new(),
            filter: None,
            includes: Vec::new(),
            required: false,
            limit: None,
            offset: None,
            separate: false,
        }
    }

    pub fn same_join(&self, other: &IncludeNode) -> bool {
        self.target_model == other.target_model && self.alias == other.alias
    }

    pub fn include(&self, alias: &str) -> Option<&IncludeNode> {
        self.includes.iter().find(|i| i.alias == alias)
    }
}

/// Walk `hops` (association aliases) from `model`, creating zero-attribute includes where
/// missing. `required` marks every node on the way as an inner join.
pub fn ensure_path(
    ctx: &SchemaContext,
    model: &ModelDescriptor,
    includes: &mut Vec<IncludeNode>,
    hops: &[String],
    required: bool,
) -> Result<(), PlanError> {
    let Some((first, rest)) = hops.split_first() else {
        return Ok(());
    };
    let assoc = model.association(first).ok_or_else(|| PlanError::UnknownField {
        model: model.name.clone(),
        field: first.clone(),
        valid: model.attribute_names(),
    })?;
    let target = ctx.registry.target_of(assoc)?;
    let idx = match includes
        .iter()
        .position(|n| n.alias == assoc.name && n.target_model == target.name)
    {
        Some(i) => i,
        None => {
            includes.push(IncludeNode::new(&target.name, &assoc.name, assoc.kind));
            includes.len() - 1
        }
    };
    let node = &mut includes[idx];
    if node.separate {
        return Err(PlanError::malformed(format!(
            "cannot filter or order through '{}': it is loaded separately because of limit/offset",
            assoc.name
        )));
    }
    if required {
        node.required = true;
    }
    ensure_path(ctx, target, &mut node.includes, rest, required)
}

/// Add the joins every comparison of `filter` needs. Hops of `!!` comparisons become inner joins.
pub fn attach_filter_paths(
    ctx: &SchemaContext,
    model: &ModelDescriptor,
    includes: &mut Vec<IncludeNode>,
    filter: &FilterNode,
) -> Result<(), PlanError> {
    for path in filter.paths() {
        ensure_path(ctx, model, includes, &path.hops, false)?;
    }
    for hops in filter.negated_hops() {
        ensure_path(ctx, model, includes, hops, true)?;
    }
    Ok(())
}

/// Mark already-planned joins along `hops` as inner joins.
pub(crate) fn require_hops(includes: &mut [IncludeNode], hops: &[String]) {
    if let Some((first, rest)) = hops.split_first() {
        if let Some(node) = includes.iter_mut().find(|n| &n.alias == first) {
            node.required = true;
            require_hops(&mut node.includes, rest);
        }
    }
}

pub struct IncludePlanner<'a> {
    ctx: &'a SchemaContext,
    info: &'a ExecutionInfo,
}

impl<'a> IncludePlanner<'a> {
    pub fn new(ctx: &'a SchemaContext, info: &'a ExecutionInfo) -> Self {
        IncludePlanner { ctx, info }
    }

    /// Plan the joins for `selections` on `model`, plus the joins `filter` and `order_paths`
    /// (hop chains of association aliases) need.
    pub fn plan(
        &self,
        model: &str,
        selections: &[Selection],
        filter: Option<&FilterNode>,
        order_paths: &[Vec<String>],
    ) -> Result<PartialPlan, PlanError> {
        let descriptor = self.ctx.model(model)?;
        let mut plan = PartialPlan {
            model: descriptor.name.clone(),
            ..PartialPlan::default()
        };
        let fields = self.info.expand(selections)?;
        self.plan_level(
            descriptor,
            &fields,
            &mut plan.attributes,
            Some(&mut plan.requested),
            &mut plan.includes,
        )?;
        if let Some(filter) = filter {
            attach_filter_paths(self.ctx, descriptor, &mut plan.includes, filter)?;
        }
        for hops in order_paths {
            ensure_path(self.ctx, descriptor, &mut plan.includes, hops, false)?;
        }
        Ok(plan)
    }

    fn plan_level(
        &self,
        model: &ModelDescriptor,
        fields: &[FieldSelection],
        attributes: &mut IndexSet<String>,
        mut requested: Option<&mut IndexSet<String>>,
        includes: &mut Vec<IncludeNode>,
    ) -> Result<(), PlanError> {
        let cap = self.ctx.options.max_many_associations;
        let mut many: HashSet<&str> = HashSet::new();
        for field in fields {
            let Some(shape) = self.ctx.field_shape(model, &field.name) else {
                tracing::trace!(model = %model.name, field = %field.name, "not a model field");
                continue;
            };
            let Some(target) = shape.target_model() else {
                attributes.insert(field.name.clone());
                if let Some(requested) = requested.as_deref_mut() {
                    requested.insert(field.name.clone());
                }
                continue;
            };
            let Some(assoc) = self.ctx.association_for_field(model, &field.name) else {
                continue;
            };
            attributes.insert(assoc.parent_key(model).to_string());
            if !is_optimized(field, self.info) {
                tracing::debug!(model = %model.name, association = %assoc.name, "optimized: false, join skipped");
                continue;
            }
            if shape.is_list() && !many.contains(assoc.name.as_str()) {
                if many.len() >= cap {
                    tracing::debug!(
                        model = %model.name,
                        association = %assoc.name,
                        cap,
                        "to-many join cap reached, join skipped"
                    );
                    continue;
                }
                many.insert(assoc.name.as_str());
            }
            let node = self.plan_field(assoc.kind, &assoc.name, target, field)?;
            merge_into(includes, node)?;
        }
        Ok(())
    }

    fn plan_field(
        &self,
        kind: AssociationKind,
        alias: &str,
        target: &str,
        field: &FieldSelection,
    ) -> Result<IncludeNode, PlanError> {
        let target = self.ctx.model(target)?;
        let mut node = IncludeNode::new(&target.name, alias, kind);
        let sub = self.info.expand(&field.selections)?;
        self.plan_level(target, &sub, &mut node.attributes, None, &mut node.includes)?;
        if kind.is_many() {
            node.attributes.insert(target.primary_key().to_string());
        }
        if let Some(args) = QueryArgs::from_field(field, self.info)? {
            if let Some(filter) = &args.filter {
                let compiled = compile(self.ctx, &target.name, filter)?;
                attach_filter_paths(self.ctx, target, &mut node.includes, &compiled)?;
                node.filter = Some(compiled).filter(|f| !f.is_always());
            }
            node.required = args.required.unwrap_or(false);
            node.limit = args.limit;
            node.offset = args.offset;
            node.separate = args.is_paginated();
        }
        Ok(node)
    }
}

//! Find-options composer: applies query modifiers (grouping, ordering, pagination) to the
//! output of the include planner and produces the final [`QueryPlan`].

use crate::config::ModelDescriptor;
use crate::context::SchemaContext;
use crate::error::PlanError;
use crate::query::args::QueryArgs;
use crate::query::filter::{Connective, FilterNode};
use crate::query::include::{attach_filter_paths, ensure_path, IncludeNode};
use crate::query::path::{self, parse_path_key};
use crate::query::plan::{
    AggregateFn, Direction, OrderEntry, OrderTarget, PartialPlan, QueryPlan, SelectItem,
};
use crate::sql::{join_alias, qualify_expression, virtual_condition, JOIN_SEPARATOR};
use indexmap::IndexSet;

fn unknown_field(model: &ModelDescriptor, field: &str) -> PlanError {
    PlanError::UnknownField {
        model: model.name.clone(),
        field: field.to_string(),
        valid: model.attribute_names(),
    }
}

fn local_column(model: &ModelDescriptor, column: &str) -> OrderTarget {
    OrderTarget::Column {
        hops: Vec::new(),
        model: model.name.clone(),
        column: column.to_string(),
    }
}

/// Translate one `[field, direction]` entry. Virtual attributes expand to their declared
/// columns (or their expression); path keys order by a column of a joined model.
pub fn order_entries(
    ctx: &SchemaContext,
    model: &ModelDescriptor,
    field: &str,
    direction: Direction,
) -> Result<Vec<OrderEntry>, PlanError> {
    let entry = |target| OrderEntry { target, direction };
    if let Some(attr) = model.attribute(field) {
        return Ok(match &attr.virtual_def {
            Some(def) if def.columns.is_empty() => vec![entry(OrderTarget::Expression {
                sql: format!("({})", qualify_expression(&def.expression, &model.name, model)?),
            })],
            Some(def) => def
                .columns
                .iter()
                .map(|c| entry(local_column(model, model.column_of(c))))
                .collect(),
            None => vec![entry(local_column(model, &attr.column))],
        });
    }
    let key = parse_path_key(field).ok_or_else(|| unknown_field(model, field))?;
    if key.negated {
        return Err(PlanError::malformed(format!(
            "order key '{}' cannot use a negated path",
            field
        )));
    }
    let resolved = path::resolve(ctx, &model.name, &key.tokens)?;
    if !resolved.json_path.is_empty() || resolved.attribute.is_virtual() {
        return Err(PlanError::malformed(format!(
            "order key '{}' must end on a column",
            field
        )));
    }
    Ok(vec![entry(OrderTarget::Column {
        hops: resolved.aliases(),
        model: resolved.target.name.clone(),
        column: resolved.attribute.column.clone(),
    })])
}

/// Select list of a grouped query: group keys as columns, other requested attributes through
/// their aggregate.
fn grouped_attributes(
    model: &ModelDescriptor,
    requested: &IndexSet<String>,
    args: &QueryArgs,
) -> Result<IndexSet<SelectItem>, PlanError> {
    let mut items = IndexSet::new();
    for key in &args.group {
        let attr = model.attribute(key).ok_or_else(|| unknown_field(model, key))?;
        if attr.is_virtual() {
            return Err(PlanError::malformed(format!(
                "cannot group by computed attribute '{}'",
                key
            )));
        }
        items.insert(SelectItem::column(&attr.name));
    }
    for key in args.transform.keys() {
        if model.attribute(key).is_none() {
            return Err(unknown_field(model, key));
        }
    }
    for name in requested {
        if args.group.contains(name) {
            continue;
        }
        let Some(attr) = model.attribute(name) else {
            continue;
        };
        if attr.is_virtual() {
            tracing::trace!(model = %model.name, attribute = %name, "computed attribute dropped from grouped select");
            continue;
        }
        let func = args
            .transform
            .get(name)
            .copied()
            .unwrap_or_else(|| AggregateFn::for_type(&attr.scalar_type));
        items.insert(SelectItem::Aggregate {
            func,
            attribute: attr.name.clone(),
            alias: attr.name.clone(),
        });
    }
    Ok(items)
}

/// Joined to-many rows would multiply the base rows a limit counts, so under pagination they
/// load separately unless a filter or order path runs through them.
fn split_paginated(includes: &mut [IncludeNode], prefix: &mut Vec<String>, pinned: &[Vec<String>]) {
    for node in includes.iter_mut().filter(|n| !n.separate) {
        prefix.push(node.alias.clone());
        let on_path = pinned.iter().any(|p| p.starts_with(prefix));
        if node.kind.is_many() && !on_path && !node.attributes.is_empty() {
            tracing::debug!(alias = %node.alias, "paginated query, to-many include loaded separately");
            node.separate = true;
        } else {
            split_paginated(&mut node.includes, prefix, pinned);
        }
        prefix.pop();
    }
}

fn model_at<'a>(
    ctx: &'a SchemaContext,
    model: &'a ModelDescriptor,
    hops: &[String],
) -> Result<&'a ModelDescriptor, PlanError> {
    hops.iter().try_fold(model, |current, hop| {
        let assoc = current
            .association(hop)
            .ok_or_else(|| unknown_field(current, hop))?;
        ctx.registry.target_of(assoc)
    })
}

/// Replace `Virtual` comparisons with raw boolean SQL. `alias` is the name `model` is joined
/// under where the filter is rendered.
pub fn lower_virtual(
    ctx: &SchemaContext,
    node: FilterNode,
    model: &ModelDescriptor,
    alias: &str,
) -> Result<FilterNode, PlanError> {
    Ok(match node {
        FilterNode::Virtual {
            path,
            expression,
            operator,
            literal,
            negated,
        } => FilterNode::Raw {
            sql: virtual_condition(
                &expression,
                operator,
                &literal,
                negated,
                &join_alias(alias, &path.hops),
                model_at(ctx, model, &path.hops)?,
            )?,
        },
        FilterNode::Logical {
            connective,
            children,
        } => {
            let children = children
                .into_iter()
                .map(|c| lower_virtual(ctx, c, model, alias))
                .collect::<Result<Vec<_>, _>>()?;
            match connective {
                Connective::And => FilterNode::and(children),
                Connective::Or => FilterNode::or(children),
            }
        }
        FilterNode::Not(child) => FilterNode::Not(Box::new(lower_virtual(ctx, *child, model, alias)?)),
        other => other,
    })
}

/// Lower include filters. Joined includes are aliased `parent->alias`; separate ones are
/// fetched on their own with the target model name as base alias.
fn lower_includes(
    ctx: &SchemaContext,
    includes: Vec<IncludeNode>,
    parent: &ModelDescriptor,
    parent_alias: &str,
) -> Result<Vec<IncludeNode>, PlanError> {
    includes
        .into_iter()
        .map(|mut node| -> Result<IncludeNode, PlanError> {
            let assoc = parent
                .association(&node.alias)
                .ok_or_else(|| unknown_field(parent, &node.alias))?;
            let target = ctx.registry.target_of(assoc)?;
            let alias = if node.separate {
                target.name.clone()
            } else {
                format!("{}{}{}", parent_alias, JOIN_SEPARATOR, node.alias)
            };
            node.filter = node
                .filter
                .map(|f| lower_virtual(ctx, f, target, &alias))
                .transpose()?;
            node.includes = lower_includes(ctx, std::mem::take(&mut node.includes), target, &alias)?;
            Ok(node)
        })
        .collect()
}

/// Build the final plan from the planner output, the compiled top-level filter and the
/// remaining `query` arguments.
pub fn compose(
    ctx: &SchemaContext,
    partial: PartialPlan,
    filter: Option<FilterNode>,
    args: &QueryArgs,
) -> Result<QueryPlan, PlanError> {
    let model = ctx.model(&partial.model)?;
    let grouped = !args.group.is_empty();
    // A grouped select has no room for joined columns; only filter and order joins survive.
    let mut includes = if grouped { Vec::new() } else { partial.includes };

    if let Some(filter) = &filter {
        attach_filter_paths(ctx, model, &mut includes, filter)?;
    }

    let mut order = Vec::new();
    for (field, direction) in &args.order {
        for entry in order_entries(ctx, model, field, *direction)? {
            if let OrderTarget::Column { hops, .. } = &entry.target {
                ensure_path(ctx, model, &mut includes, hops, false)?;
            }
            order.push(entry);
        }
    }

    if !grouped && (args.limit.is_some() || args.offset.is_some()) {
        let mut pinned: Vec<Vec<String>> = filter
            .iter()
            .flat_map(|f| f.paths())
            .map(|p| p.hops.clone())
            .collect();
        pinned.extend(order.iter().filter_map(|e| match &e.target {
            OrderTarget::Column { hops, .. } => Some(hops.clone()),
            OrderTarget::Expression { .. } => None,
        }));
        split_paginated(&mut includes, &mut Vec::new(), &pinned);
    }

    let attributes = if grouped {
        if order.is_empty() {
            for key in &args.group {
                order.push(OrderEntry {
                    target: local_column(model, model.column_of(key)),
                    direction: Direction::Asc,
                });
            }
        }
        grouped_attributes(model, &partial.requested, args)?
    } else {
        let mut items: IndexSet<SelectItem> =
            partial.attributes.iter().map(SelectItem::column).collect();
        for pk in &model.primary_keys {
            items.insert(SelectItem::column(pk));
        }
        items
    };

    let filter = filter
        .map(|f| lower_virtual(ctx, f, model, &model.name))
        .transpose()?;
    Ok(QueryPlan {
        model: model.name.clone(),
        includes: lower_includes(ctx, includes, model, &model.name)?,
        attributes,
        filter: filter.filter(|f| !f.is_always()),
        group: args.group.clone(),
        order,
        limit: args.limit,
        offset: args.offset,
    })
}

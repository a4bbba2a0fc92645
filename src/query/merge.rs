//! Plan merge algebra. Used to combine a client plan with system-supplied constraints
//! (correlation filters, subscription id sets).

use crate::error::PlanError;
use crate::query::filter::{AttributePath, Connective, FilterNode, Operator};
use crate::query::include::{require_hops, IncludeNode};
use crate::query::plan::QueryPlan;
use indexmap::IndexMap;

/// What a conjunct constrains. Conjuncts with equal keys are alternatives of each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum MergeKey {
    Comparison(AttributePath, Operator, bool),
    Virtual(AttributePath, Operator, bool),
}

fn key_of(node: &FilterNode) -> Option<MergeKey> {
    match node {
        FilterNode::Comparison {
            path,
            operator,
            negated,
            ..
        } => Some(MergeKey::Comparison(path.clone(), *operator, *negated)),
        FilterNode::Virtual {
            path,
            operator,
            negated,
            ..
        } => Some(MergeKey::Virtual(path.clone(), *operator, *negated)),
        // An OR of alternatives on one key, as produced by an earlier merge.
        FilterNode::Logical {
            connective: Connective::Or,
            children,
        } => {
            let mut keys = children.iter().map(key_of);
            let first = keys.next()??;
            keys.all(|k| k.as_ref() == Some(&first)).then_some(first)
        }
        _ => None,
    }
}

type Grouped = (IndexMap<MergeKey, Vec<FilterNode>>, Vec<FilterNode>);

fn group(node: FilterNode) -> Grouped {
    let mut keyed: IndexMap<MergeKey, Vec<FilterNode>> = IndexMap::new();
    let mut rest = Vec::new();
    for conjunct in node.into_conjuncts() {
        match key_of(&conjunct) {
            Some(key) => keyed.entry(key).or_default().push(conjunct),
            None => rest.push(conjunct),
        }
    }
    (keyed, rest)
}

fn same_set(a: &[FilterNode], b: &[FilterNode]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x)) && b.iter().all(|y| a.contains(y))
}

/// Merge two filters conjunct by conjunct. Equal constraints on one key keep a single copy,
/// differing ones become alternatives, constraints on different keys are all kept.
pub fn merge_filters(a: Option<FilterNode>, b: Option<FilterNode>) -> Option<FilterNode> {
    let (a, b) = match (a, b) {
        (None, x) | (x, None) => return x,
        (Some(a), Some(b)) => (a, b),
    };
    if a == b {
        return Some(a);
    }
    let (keyed_a, rest_a) = group(a);
    let (mut keyed_b, rest_b) = group(b);
    let mut out = Vec::new();
    for (key, xs) in keyed_a {
        match keyed_b.shift_remove(&key) {
            None => out.extend(xs),
            Some(ys) if same_set(&xs, &ys) => out.extend(xs),
            Some(ys) => {
                tracing::trace!(key = ?key, "merging differing constraints into OR");
                out.push(FilterNode::or(vec![FilterNode::and(xs), FilterNode::and(ys)]));
            }
        }
    }
    for (_, ys) in keyed_b {
        out.extend(ys);
    }
    out.extend(rest_a);
    for node in rest_b {
        if !out.contains(&node) {
            out.push(node);
        }
    }
    Some(FilterNode::and(out)).filter(|f| !f.is_always())
}

fn pick<T: PartialEq>(
    modifier: &'static str,
    a: Option<T>,
    b: Option<T>,
) -> Result<Option<T>, PlanError> {
    match (a, b) {
        (Some(a), Some(b)) if a != b => Err(PlanError::ConflictingPlanModifier { modifier }),
        (a, b) => Ok(a.or(b)),
    }
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    Some(v).filter(|v| !v.is_empty())
}

/// Merge two joins of the same `(target_model, alias)`.
pub fn merge_include(a: IncludeNode, b: IncludeNode) -> Result<IncludeNode, PlanError> {
    let mut attributes = a.attributes;
    attributes.extend(b.attributes);
    Ok(IncludeNode {
        target_model: a.target_model,
        alias: a.alias,
        kind: a.kind,
        attributes,
        filter: merge_filters(a.filter, b.filter),
        includes: merge_includes(a.includes, b.includes)?,
        required: a.required && b.required,
        limit: pick("limit", a.limit, b.limit)?,
        offset: pick("offset", a.offset, b.offset)?,
        separate: a.separate || b.separate,
    })
}

/// Insert `node`, merging it into an existing join of the same model and alias.
pub(crate) fn merge_into(includes: &mut Vec<IncludeNode>, node: IncludeNode) -> Result<(), PlanError> {
    match includes.iter().position(|n| n.same_join(&node)) {
        Some(i) => {
            let existing = includes.remove(i);
            includes.insert(i, merge_include(existing, node)?);
        }
        None => includes.push(node),
    }
    Ok(())
}

pub fn merge_includes(a: Vec<IncludeNode>, b: Vec<IncludeNode>) -> Result<Vec<IncludeNode>, PlanError> {
    let mut out = a;
    for node in b {
        merge_into(&mut out, node)?;
    }
    Ok(out)
}

/// Merge two plans on the same model.
pub fn merge(a: QueryPlan, b: QueryPlan) -> Result<QueryPlan, PlanError> {
    if a.model != b.model {
        return Err(PlanError::ConflictingPlanModifier { modifier: "model" });
    }
    let mut attributes = a.attributes;
    attributes.extend(b.attributes);
    let filter = merge_filters(a.filter, b.filter);
    let mut includes = merge_includes(a.includes, b.includes)?;
    if let Some(filter) = &filter {
        for hops in filter.negated_hops() {
            require_hops(&mut includes, hops);
        }
    }
    Ok(QueryPlan {
        model: a.model,
        attributes,
        includes,
        filter,
        group: pick("group", non_empty(a.group), non_empty(b.group))?.unwrap_or_default(),
        order: pick("order", non_empty(a.order), non_empty(b.order))?.unwrap_or_default(),
        limit: pick("limit", a.limit, b.limit)?,
        offset: pick("offset", a.offset, b.offset)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssociationKind;
    use crate::query::compiler::compile;
    use crate::query::fixtures::shop;
    use crate::query::plan::SelectItem;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn plan_with(filter: Value) -> QueryPlan {
        let ctx = shop();
        let mut plan = QueryPlan::new("Order");
        plan.filter = Some(compile(&ctx, "Order", &filter).unwrap());
        plan
    }

    #[test]
    fn differing_values_on_one_key_become_alternatives() {
        let ctx = shop();
        let merged = merge(
            plan_with(json!({ "status": "paid", "region": "EU" })),
            plan_with(json!({ "status": "open", "region": "EU" })),
        )
        .unwrap();
        let expected = compile(
            &ctx,
            "Order",
            &json!({ "_andOp": [
                { "_orOp": [ { "status": "paid" }, { "status": "open" } ] },
                { "region": "EU" }
            ] }),
        )
        .unwrap();
        assert_eq!(merged.filter, Some(expected));
    }

    #[test]
    fn a_third_alternative_extends_the_or() {
        let once = merge(
            plan_with(json!({ "status": "paid" })),
            plan_with(json!({ "status": "open" })),
        )
        .unwrap();
        let twice = merge(once, plan_with(json!({ "status": "void" }))).unwrap();
        match twice.filter {
            Some(FilterNode::Logical {
                connective: Connective::Or,
                children,
            }) => assert_eq!(children.len(), 3),
            other => panic!("expected a flat OR, got {:?}", other),
        }
    }

    #[test]
    fn different_operators_are_different_keys() {
        let ctx = shop();
        let merged = merge(
            plan_with(json!({ "quantity": { "_gtOp": 1 } })),
            plan_with(json!({ "quantity": { "_ltOp": 9 } })),
        )
        .unwrap();
        let expected = compile(
            &ctx,
            "Order",
            &json!({ "quantity": { "_gtOp": 1, "_ltOp": 9 } }),
        )
        .unwrap();
        assert_eq!(merged.filter, Some(expected));
    }

    #[test]
    fn conflicting_modifiers_fail() {
        let mut a = QueryPlan::new("Order");
        let mut b = QueryPlan::new("Order");
        a.limit = Some(10);
        b.limit = Some(20);
        assert_eq!(
            merge(a.clone(), b).unwrap_err(),
            PlanError::ConflictingPlanModifier { modifier: "limit" }
        );
        let mut c = QueryPlan::new("Order");
        c.limit = Some(10);
        assert_eq!(merge(a.clone(), c).unwrap().limit, Some(10));
        assert_eq!(merge(a, QueryPlan::new("Order")).unwrap().limit, Some(10));
        assert_eq!(
            merge(QueryPlan::new("Order"), QueryPlan::new("Customer")).unwrap_err(),
            PlanError::ConflictingPlanModifier { modifier: "model" }
        );
    }

    #[test]
    fn includes_merge_by_alias() {
        let mut a = QueryPlan::new("Order");
        let mut b = QueryPlan::new("Order");
        a.attributes.insert(SelectItem::column("id"));
        b.attributes.insert(SelectItem::column("status"));
        b.attributes.insert(SelectItem::column("id"));
        let mut ca = IncludeNode::new("Customer", "customer", AssociationKind::BelongsTo);
        ca.attributes.insert("country".into());
        ca.required = true;
        let mut cb = IncludeNode::new("Customer", "customer", AssociationKind::BelongsTo);
        cb.attributes.insert("firstName".into());
        a.includes.push(ca);
        b.includes.push(cb);
        let merged = merge(a, b).unwrap();
        assert_eq!(
            merged.attributes.iter().map(|s| s.output_name()).collect::<Vec<_>>(),
            vec!["id", "status"]
        );
        assert_eq!(merged.includes.len(), 1);
        let customer = &merged.includes[0];
        assert_eq!(
            customer.attributes.iter().collect::<Vec<_>>(),
            vec!["country", "firstName"]
        );
        assert!(!customer.required);
    }

    #[test]
    fn include_pagination_conflicts() {
        let mut a = IncludeNode::new("Note", "notes", AssociationKind::HasMany);
        let mut b = a.clone();
        a.limit = Some(1);
        b.limit = Some(2);
        assert!(matches!(
            merge_include(a, b),
            Err(PlanError::ConflictingPlanModifier { modifier: "limit" })
        ));
    }

    /// Sort every JSON array so plans that differ only in ordering compare equal.
    fn canonical(v: Value) -> Value {
        match v {
            Value::Array(items) => {
                let mut items: Vec<Value> = items.into_iter().map(canonical).collect();
                items.sort_by_key(|v| v.to_string());
                Value::Array(items)
            }
            Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, canonical(v))).collect()),
            other => other,
        }
    }

    fn arb_filter() -> impl Strategy<Value = Value> {
        let conjunct = prop_oneof![
            prop::sample::select(vec!["paid", "open", "void"]).prop_map(|s| json!({ "status": s })),
            (0i64..5).prop_map(|n| json!({ "quantity": { "_gtOp": n } })),
            prop::sample::select(vec!["NZ", "FR"]).prop_map(|c| json!({ "customer__country": c })),
            prop::sample::select(vec!["EU", "US"]).prop_map(|r| json!({ "region": { "_neOp": r } })),
        ];
        prop::collection::vec(conjunct, 1..4).prop_map(|cs| json!({ "_andOp": cs }))
    }

    fn arb_plan() -> impl Strategy<Value = QueryPlan> {
        (
            prop::option::of(arb_filter()),
            prop::sample::subsequence(vec!["id", "status", "region", "quantity"], 0..4),
            any::<bool>(),
            prop::option::of(prop::sample::select(vec![10u64, 20])),
        )
            .prop_map(|(filter, attrs, with_customer, limit)| {
                let ctx = shop();
                let mut plan = QueryPlan::new("Order");
                plan.filter = filter.map(|f| compile(&ctx, "Order", &f).unwrap());
                plan.attributes = attrs.into_iter().map(SelectItem::column).collect();
                if with_customer {
                    let mut node = IncludeNode::new("Customer", "customer", AssociationKind::BelongsTo);
                    node.attributes.insert("country".into());
                    plan.includes.push(node);
                }
                plan.limit = limit;
                plan
            })
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_plan(), b in arb_plan()) {
            let ab = merge(a.clone(), b.clone());
            let ba = merge(b, a);
            match (ab, ba) {
                (Ok(ab), Ok(ba)) => prop_assert_eq!(
                    canonical(serde_json::to_value(&ab).unwrap()),
                    canonical(serde_json::to_value(&ba).unwrap())
                ),
                (Err(x), Err(y)) => prop_assert_eq!(x, y),
                (x, y) => prop_assert!(false, "asymmetric merge: {:?} vs {:?}", x, y),
            }
        }

        #[test]
        fn merge_with_itself_is_identity(a in arb_plan()) {
            let merged = merge(a.clone(), a.clone()).unwrap();
            prop_assert_eq!(merged, a);
        }
    }
}

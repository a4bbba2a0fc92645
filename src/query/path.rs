//! Resolves `__`/`!!`-encoded field paths into association hops plus a terminal attribute.

use crate::config::{AssociationDescriptor, AttributeDescriptor, ModelDescriptor};
use crate::context::SchemaContext;
use crate::error::PlanError;

pub const HOP_SEPARATOR: &str = "__";
pub const NEGATED_SEPARATOR: &str = "!!";

/// A cross-model key split into tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathKey {
    pub tokens: Vec<String>,
    /// The key used `!!`: comparisons under it are negated and the joins are inner.
    pub negated: bool,
}

/// Split `a__b__c` or `a!!b`. Returns `None` for plain keys and for keys with empty segments.
pub fn parse_path_key(key: &str) -> Option<PathKey> {
    let negated = key.contains(NEGATED_SEPARATOR);
    if !negated && !key.contains(HOP_SEPARATOR) {
        return None;
    }
    let tokens: Vec<String> = key
        .split(NEGATED_SEPARATOR)
        .flat_map(|part| part.split(HOP_SEPARATOR))
        .map(str::to_string)
        .collect();
    if tokens.iter().any(String::is_empty) {
        return None;
    }
    Some(PathKey { tokens, negated })
}

#[derive(Clone, Debug)]
pub struct ResolvedPath<'a> {
    pub target: &'a ModelDescriptor,
    pub attribute: &'a AttributeDescriptor,
    pub hops: Vec<&'a AssociationDescriptor>,
    /// Keys inside a JSON attribute met before the last token.
    pub json_path: Vec<String>,
}

impl ResolvedPath<'_> {
    /// Association aliases of the hops, from the starting model outwards.
    pub fn aliases(&self) -> Vec<String> {
        self.hops.iter().map(|h| h.name.clone()).collect()
    }
}

fn unknown_field(model: &ModelDescriptor, field: &str) -> PlanError {
    PlanError::UnknownField {
        model: model.name.clone(),
        field: field.to_string(),
        valid: model.attribute_names(),
    }
}

/// Walk `tokens` from `model`. Every token but the last names an association (GraphQL field
/// name, translated through the name formatter); the last names an attribute of the model
/// reached. A JSON attribute met earlier ends the walk and the remaining tokens become an
/// in-document path.
pub fn resolve<'a>(
    ctx: &'a SchemaContext,
    model: &str,
    tokens: &[String],
) -> Result<ResolvedPath<'a>, PlanError> {
    let mut current = ctx.model(model)?;
    let mut hops = Vec::new();
    let last = match tokens.len() {
        0 => return Err(PlanError::malformed("empty field path")),
        n => n - 1,
    };
    for (i, token) in tokens.iter().enumerate() {
        if let Some(attribute) = current.attribute(token) {
            if i == last {
                return Ok(ResolvedPath {
                    target: current,
                    attribute,
                    hops,
                    json_path: Vec::new(),
                });
            }
            if attribute.scalar_type.is_structured() {
                return Ok(ResolvedPath {
                    target: current,
                    attribute,
                    hops,
                    json_path: tokens[i + 1..].to_vec(),
                });
            }
            return Err(PlanError::UnreachablePath {
                model: current.name.clone(),
                segment: token.clone(),
            });
        }
        if i == last {
            return Err(unknown_field(current, token));
        }
        let hop = ctx
            .association_for_field(current, token)
            .ok_or_else(|| unknown_field(current, token))?;
        current = ctx.registry.target_of(hop)?;
        hops.push(hop);
    }
    Err(PlanError::malformed("empty field path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixtures::shop;

    fn tokens(s: &[&str]) -> Vec<String> {
        s.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn parses_path_keys() {
        assert_eq!(parse_path_key("name"), None);
        assert_eq!(
            parse_path_key("customer__country"),
            Some(PathKey {
                tokens: tokens(&["customer", "country"]),
                negated: false
            })
        );
        assert_eq!(
            parse_path_key("items!!product__sku"),
            Some(PathKey {
                tokens: tokens(&["items", "product", "sku"]),
                negated: true
            })
        );
        assert_eq!(parse_path_key("__count"), None);
        assert_eq!(parse_path_key("a____b"), None);
    }

    #[test]
    fn resolves_hops_and_attribute() {
        let ctx = shop();
        let p = resolve(&ctx, "Customer", &tokens(&["orders", "items", "price"])).unwrap();
        assert_eq!(p.aliases(), vec!["orders", "items"]);
        assert_eq!(p.target.name, "OrderItem");
        assert_eq!(p.attribute.name, "price");
    }

    #[test]
    fn removing_a_hop_is_unknown_field() {
        let ctx = shop();
        for broken in [&["orders", "price"][..], &["items", "price"][..]] {
            assert!(matches!(
                resolve(&ctx, "Customer", &tokens(broken)),
                Err(PlanError::UnknownField { .. })
            ));
        }
    }

    #[test]
    fn folds_json_remainder() {
        let ctx = shop();
        let p = resolve(&ctx, "Order", &tokens(&["metadata", "gift", "wrap"])).unwrap();
        assert_eq!(p.attribute.name, "metadata");
        assert_eq!(p.json_path, tokens(&["gift", "wrap"]));
        assert!(p.hops.is_empty());
    }

    #[test]
    fn plain_attribute_cannot_be_a_hop() {
        let ctx = shop();
        assert_eq!(
            resolve(&ctx, "Order", &tokens(&["status", "code"])).unwrap_err(),
            PlanError::UnreachablePath {
                model: "Order".into(),
                segment: "status".into()
            }
        );
    }
}

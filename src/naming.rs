//! Mapping between association aliases and GraphQL field names, and generated type names.

use crate::case::{pluralize, to_camel_case, upper_first};
use crate::config::ModelRegistry;
use std::collections::HashMap;

/// Naming conventions for the generated GraphQL surface.
///
/// Every externally visible association field name goes through
/// [`model_name_to_field_name`](NameFormatter::model_name_to_field_name) and back through
/// [`field_name_to_model_name`](NameFormatter::field_name_to_model_name).
pub trait NameFormatter: Send + Sync {
    /// Field name exposing association `association` of `model`.
    fn model_name_to_field_name(&self, model: &str, association: &str) -> String;

    /// Association alias behind field `field` of `model`. Unknown names map to themselves.
    fn field_name_to_model_name(&self, model: &str, field: &str) -> String;

    fn format_type_name(&self, name: &str) -> String;

    fn format_many_type_name(&self, name: &str) -> String {
        let single = self.format_type_name(name);
        let many = pluralize(&single);
        if many == single {
            format!("{}s", single)
        } else {
            many
        }
    }
}

/// Default conventions: camelCase field names, `Namespace` + PascalCase type names.
///
/// Both directions are precomputed per registry and never change afterwards.
#[derive(Debug, Default)]
pub struct DefaultNameFormatter {
    namespace: String,
    model_to_field: HashMap<(String, String), String>,
    field_to_model: HashMap<(String, String), String>,
}

impl DefaultNameFormatter {
    pub fn new(registry: &ModelRegistry, namespace: impl Into<String>) -> Self {
        let mut model_to_field = HashMap::new();
        let mut field_to_model = HashMap::new();
        for model in registry.models.values() {
            for alias in model.associations.keys() {
                let field = to_camel_case(alias);
                model_to_field.insert((model.name.clone(), alias.clone()), field.clone());
                field_to_model.insert((model.name.clone(), field), alias.clone());
            }
        }
        DefaultNameFormatter {
            namespace: namespace.into(),
            model_to_field,
            field_to_model,
        }
    }
}

impl NameFormatter for DefaultNameFormatter {
    fn model_name_to_field_name(&self, model: &str, association: &str) -> String {
        self.model_to_field
            .get(&(model.to_string(), association.to_string()))
            .cloned()
            .unwrap_or_else(|| association.to_string())
    }

    fn field_name_to_model_name(&self, model: &str, field: &str) -> String {
        self.field_to_model
            .get(&(model.to_string(), field.to_string()))
            .cloned()
            .unwrap_or_else(|| field.to_string())
    }

    fn format_type_name(&self, name: &str) -> String {
        format!("{}{}", self.namespace, upper_first(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_from_str, resolve};

    fn registry() -> ModelRegistry {
        let config = load_from_str(
            r#"{ "models": [
                { "name": "Customer",
                  "attributes": [ { "name": "id", "type": "INTEGER", "primaryKey": true } ],
                  "associations": [
                    { "kind": "HasMany", "target": "Order", "foreignKey": "customerId" },
                    { "kind": "HasOne", "target": "Order", "as": "latest_order", "foreignKey": "customerId" }
                  ] },
                { "name": "Order",
                  "attributes": [
                    { "name": "id", "type": "INTEGER", "primaryKey": true },
                    { "name": "customerId", "type": "INTEGER" }
                  ] }
            ] }"#,
        )
        .unwrap();
        resolve(&config).unwrap()
    }

    #[test]
    fn maps_both_directions() {
        let f = DefaultNameFormatter::new(&registry(), "");
        assert_eq!(f.model_name_to_field_name("Customer", "orders"), "orders");
        assert_eq!(f.model_name_to_field_name("Customer", "latest_order"), "latestOrder");
        assert_eq!(f.field_name_to_model_name("Customer", "latestOrder"), "latest_order");
        assert_eq!(f.field_name_to_model_name("Customer", "unknown"), "unknown");
    }

    #[test]
    fn namespaced_type_names() {
        let f = DefaultNameFormatter::new(&registry(), "Shop");
        assert_eq!(f.format_type_name("order"), "ShopOrder");
        assert_eq!(f.format_many_type_name("Order"), "ShopOrders");
    }
}

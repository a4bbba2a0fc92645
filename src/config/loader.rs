//! Load model config from JSON and resolve it into a `ModelRegistry`.

use crate::config::resolved::{
    AssociationDescriptor, AttributeDescriptor, ModelDescriptor, ModelRegistry, ScalarType,
    ThroughDescriptor, VirtualDefinition,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use indexmap::IndexMap;
use std::path::Path;

/// Build the model registry from full config. Validates first.
pub fn resolve(config: &FullConfig) -> Result<ModelRegistry, ConfigError> {
    validate(config)?;

    let mut models = IndexMap::new();
    for m in &config.models {
        let attributes: IndexMap<String, AttributeDescriptor> = m
            .attributes
            .iter()
            .map(|a| {
                let descriptor = AttributeDescriptor {
                    name: a.name.clone(),
                    column: a.field.clone().unwrap_or_else(|| a.name.clone()),
                    scalar_type: ScalarType::parse(&a.type_),
                    nullable: a.nullable && !a.primary_key,
                    primary_key: a.primary_key,
                    virtual_def: a.virtual_.as_ref().map(|v| VirtualDefinition {
                        expression: v.expression.clone(),
                        columns: v.columns.clone(),
                    }),
                };
                (a.name.clone(), descriptor)
            })
            .collect();
        let primary_keys = m
            .attributes
            .iter()
            .filter(|a| a.primary_key)
            .map(|a| a.name.clone())
            .collect();
        let associations = m
            .associations
            .iter()
            .map(|assoc| {
                let name = assoc.alias();
                let descriptor = AssociationDescriptor {
                    name: name.clone(),
                    kind: assoc.kind,
                    source: m.name.clone(),
                    target: assoc.target.clone(),
                    foreign_key: assoc.foreign_key.clone(),
                    target_key: assoc.target_key.clone(),
                    through: assoc.through.as_ref().map(|t| ThroughDescriptor {
                        table: t.table.clone(),
                        foreign_key: t.foreign_key.clone(),
                        other_key: t.other_key.clone(),
                    }),
                };
                (name, descriptor)
            })
            .collect();
        let model = ModelDescriptor {
            name: m.name.clone(),
            table: m
                .table
                .clone()
                .unwrap_or_else(|| crate::case::to_snake_case(&crate::case::pluralize(&m.name))),
            attributes,
            associations,
            primary_keys,
        };
        models.insert(m.name.clone(), model);
    }

    tracing::debug!(models = models.len(), "resolved model registry");
    Ok(ModelRegistry { models })
}

/// Parse a `FullConfig` from a JSON document.
pub fn load_from_str(json: &str) -> Result<FullConfig, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
}

/// Read and parse a `FullConfig` from a JSON file.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    load_from_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolved::AssociationKind;

    const MODELS: &str = r#"{
        "models": [
            {
                "name": "Customer",
                "attributes": [
                    { "name": "id", "type": "INTEGER", "primaryKey": true },
                    { "name": "country", "type": "STRING" }
                ]
            },
            {
                "name": "Order",
                "table": "orders",
                "attributes": [
                    { "name": "id", "type": "INTEGER", "primaryKey": true },
                    { "name": "customerId", "type": "INTEGER", "field": "customer_id" },
                    { "name": "total", "type": "DECIMAL(10,2)" }
                ],
                "associations": [
                    { "kind": "BelongsTo", "target": "Customer", "foreignKey": "customerId" }
                ]
            }
        ],
        "options": { "maxManyAssociations": 2, "dialect": "mssql" }
    }"#;

    #[test]
    fn resolves_models_and_defaults() {
        let config = load_from_str(MODELS).unwrap();
        assert_eq!(config.options.max_many_associations, 2);
        assert_eq!(config.options.dialect, Dialect::Mssql);

        let registry = resolve(&config).unwrap();
        let customer = registry.model("Customer").unwrap();
        assert_eq!(customer.table, "customers");
        assert_eq!(customer.primary_key(), "id");

        let order = registry.model("Order").unwrap();
        assert_eq!(order.column_of("customerId"), "customer_id");
        let assoc = order.association("customer").unwrap();
        assert_eq!(assoc.kind, AssociationKind::BelongsTo);
        assert_eq!(assoc.parent_key(order), "customerId");
        assert_eq!(assoc.child_key(customer), "id");
    }

    #[test]
    fn rejects_unknown_target() {
        let config = load_from_str(
            r#"{ "models": [ {
                "name": "Order",
                "attributes": [ { "name": "id", "type": "INTEGER", "primaryKey": true } ],
                "associations": [ { "kind": "BelongsTo", "target": "Nope", "foreignKey": "id" } ]
            } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            resolve(&config),
            Err(ConfigError::MissingReference { kind: "model", .. })
        ));
    }

    #[test]
    fn rejects_model_without_primary_key() {
        let config = load_from_str(
            r#"{ "models": [ { "name": "Tag", "attributes": [ { "name": "label", "type": "STRING" } ] } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            resolve(&config),
            Err(ConfigError::MissingPrimaryKey { .. })
        ));
    }
}

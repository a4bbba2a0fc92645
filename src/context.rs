//! Per-build schema context: registry, name formatter and planner options. Generated type names
//! are checked for collisions while building.

use crate::config::{
    resolve, AssociationDescriptor, FieldShape, FullConfig, ModelDescriptor, ModelRegistry,
    PlannerOptions,
};
use crate::error::{ConfigError, PlanError};
use crate::naming::{DefaultNameFormatter, NameFormatter};
use indexmap::IndexMap;
use std::sync::Arc;

/// Everything the planner reads. Built once, then shared read-only through `Arc`.
pub struct SchemaContext {
    pub registry: ModelRegistry,
    pub formatter: Box<dyn NameFormatter>,
    pub options: PlannerOptions,
}

impl std::fmt::Debug for SchemaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaContext")
            .field("models", &self.registry.models.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

impl SchemaContext {
    /// Resolve `config` and build a context with the default name formatter.
    pub fn build(config: &FullConfig) -> Result<Arc<Self>, ConfigError> {
        let registry = resolve(config)?;
        let formatter = DefaultNameFormatter::new(&registry, config.options.namespace.clone());
        Self::with_formatter(registry, Box::new(formatter), config.options.clone())
    }

    pub fn with_formatter(
        registry: ModelRegistry,
        formatter: Box<dyn NameFormatter>,
        options: PlannerOptions,
    ) -> Result<Arc<Self>, ConfigError> {
        let mut type_names: IndexMap<String, String> = IndexMap::new();
        for model in registry.models.values() {
            for type_name in [
                formatter.format_type_name(&model.name),
                formatter.format_many_type_name(&model.name),
            ] {
                match type_names.get(&type_name) {
                    Some(owner) if owner != &model.name => {
                        return Err(ConfigError::DuplicateTypeName(type_name));
                    }
                    Some(_) => {}
                    None => {
                        type_names.insert(type_name, model.name.clone());
                    }
                }
            }
        }
        tracing::debug!(
            models = registry.models.len(),
            types = type_names.len(),
            "schema context built"
        );
        Ok(Arc::new(SchemaContext {
            registry,
            formatter,
            options,
        }))
    }

    pub fn model(&self, name: &str) -> Result<&ModelDescriptor, PlanError> {
        self.registry.require(name)
    }

    /// Association behind a GraphQL field name of `model`.
    pub fn association_for_field<'a>(
        &'a self,
        model: &'a ModelDescriptor,
        field: &str,
    ) -> Option<&'a AssociationDescriptor> {
        let alias = self.formatter.field_name_to_model_name(&model.name, field);
        model.association(&alias)
    }

    /// GraphQL field name of an association.
    pub fn field_name(&self, association: &AssociationDescriptor) -> String {
        self.formatter
            .model_name_to_field_name(&association.source, &association.name)
    }

    /// Shape of a GraphQL field of `model`, if it names an attribute or association.
    pub fn field_shape(&self, model: &ModelDescriptor, field: &str) -> Option<FieldShape> {
        if model.attribute(field).is_some() {
            return self.registry.field_shape(model, field);
        }
        let alias = self.formatter.field_name_to_model_name(&model.name, field);
        self.registry.field_shape(model, &alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    #[test]
    fn rejects_colliding_type_names() {
        let config = load_from_str(
            r#"{ "models": [
                { "name": "order", "attributes": [ { "name": "id", "type": "INTEGER", "primaryKey": true } ] },
                { "name": "Order", "attributes": [ { "name": "id", "type": "INTEGER", "primaryKey": true } ] }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(
            SchemaContext::build(&config),
            Err(ConfigError::DuplicateTypeName(name)) if name == "Order"
        ));
    }
}

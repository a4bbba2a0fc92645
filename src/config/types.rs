//! Raw config types matching the JSON model definitions.

use crate::config::resolved::AssociationKind;
use serde::{Deserialize, Deserializer, Serialize};

/// Definition of a virtual attribute: a raw query expression evaluated by the storage engine.
#[derive(Clone, Debug, Serialize)]
pub struct VirtualConfig {
    pub expression: String,
    /// Underlying columns the expression is built from; ordering by the virtual attribute orders
    /// by each of them in turn.
    pub columns: Vec<String>,
}

impl<'de> Deserialize<'de> for VirtualConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(expression) => Ok(VirtualConfig {
                expression,
                columns: Vec::new(),
            }),
            serde_json::Value::Object(mut obj) => {
                let expression = match obj.remove("expression") {
                    Some(serde_json::Value::String(s)) => s,
                    _ => {
                        return Err(serde::de::Error::custom(
                            "virtual attribute must have a string \"expression\"",
                        ))
                    }
                };
                let columns = match obj.remove("columns") {
                    Some(v) => serde_json::from_value(v).map_err(serde::de::Error::custom)?,
                    None => Vec::new(),
                };
                Ok(VirtualConfig { expression, columns })
            }
            other => Err(serde::de::Error::custom(format!(
                "virtual attribute must be a string or {{ \"expression\": \"...\" }}; got {}",
                type_name_of_json(&other)
            ))),
        }
    }
}

fn type_name_of_json(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    /// Column name when it differs from the attribute name.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, rename = "virtual")]
    pub virtual_: Option<VirtualConfig>,
}

fn default_true() -> bool {
    true
}

/// Join table of a many-to-many association.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughConfig {
    pub table: String,
    /// Through column pointing at the source model.
    pub foreign_key: String,
    /// Through column pointing at the target model.
    pub other_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationConfig {
    pub kind: AssociationKind,
    pub target: String,
    /// Association alias; see [`AssociationConfig::alias`] for the default.
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    pub foreign_key: String,
    #[serde(default)]
    pub target_key: Option<String>,
    #[serde(default)]
    pub through: Option<ThroughConfig>,
}

impl AssociationConfig {
    /// Declared alias, or the target name with a lowercase first letter (pluralized for to-many
    /// kinds).
    pub fn alias(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None if self.kind.is_many() => {
                crate::case::pluralize(&crate::case::lower_first(&self.target))
            }
            None => crate::case::lower_first(&self.target),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub associations: Vec<AssociationConfig>,
}

/// SQL dialect of the storage engine. Only affects dialect-specific casts and expression
/// lowering; rendering targets PostgreSQL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Mssql,
    Mysql,
    Sqlite,
}

impl std::str::FromStr for Dialect {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mssql" => Ok(Dialect::Mssql),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "sqlite" => Ok(Dialect::Sqlite),
            _ => Err(crate::error::ConfigError::Validation(format!(
                "invalid dialect: {} (expected postgres, mssql, mysql or sqlite)",
                s
            ))),
        }
    }
}

pub const DEFAULT_MAX_MANY_ASSOCIATIONS: usize = 3;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerOptions {
    /// To-many associations eagerly joined per selection level; extra ones are skipped.
    #[serde(default = "default_max_many_associations")]
    pub max_many_associations: usize,
    #[serde(default)]
    pub dialect: Dialect,
    /// Prefix applied to generated type names.
    #[serde(default)]
    pub namespace: String,
}

fn default_max_many_associations() -> usize {
    DEFAULT_MAX_MANY_ASSOCIATIONS
}

impl Default for PlannerOptions {
    fn default() -> Self {
        PlannerOptions {
            max_many_associations: DEFAULT_MAX_MANY_ASSOCIATIONS,
            dialect: Dialect::default(),
            namespace: String::new(),
        }
    }
}

impl PlannerOptions {
    /// Apply `MODELGRAPH_*` env overrides on top of these options.
    pub fn with_env_overrides(mut self) -> Result<Self, crate::error::ConfigError> {
        if let Ok(v) = std::env::var("MODELGRAPH_MAX_MANY_ASSOCIATIONS") {
            self.max_many_associations = v.parse().map_err(|_| {
                crate::error::ConfigError::Validation(format!(
                    "MODELGRAPH_MAX_MANY_ASSOCIATIONS must be an integer, got {}",
                    v
                ))
            })?;
        }
        if let Ok(v) = std::env::var("MODELGRAPH_DIALECT") {
            self.dialect = v.parse()?;
        }
        if let Ok(v) = std::env::var("MODELGRAPH_NAMESPACE") {
            self.namespace = v;
        }
        Ok(self)
    }
}

/// All model definitions plus planner options, as loaded from JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub options: PlannerOptions,
}

//! Typed errors and GraphQL error mapping.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("model {model} has no primary key")]
    MissingPrimaryKey { model: String },
    #[error("invalid primary key: model {model} attribute {attribute}")]
    InvalidPrimaryKey { model: String, attribute: String },
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("duplicate generated type name: {0}")]
    DuplicateTypeName(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Request-shape failures raised while compiling, planning, composing or merging a query.
///
/// None of these are transient: they are never retried and only abort the one field being
/// resolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("unknown field '{field}' on {model}, valid attributes: {}", valid.join(", "))]
    UnknownField {
        model: String,
        field: String,
        valid: Vec<String>,
    },
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("unsafe literal in expression: '{0}'")]
    UnsafeLiteralExpression(String),
    #[error("malformed filter: {0}")]
    MalformedFilter(String),
    #[error("conflicting {modifier} between merged plans")]
    ConflictingPlanModifier { modifier: &'static str },
    #[error("unreachable path: '{segment}' on {model} is not an association")]
    UnreachablePath { model: String, segment: String },
    #[error("{operation} requires a {clause} clause")]
    MissingRequiredClause {
        operation: &'static str,
        clause: &'static str,
    },
    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::UnknownField { .. } => "unknown_field",
            PlanError::UnknownOperator(_) => "unknown_operator",
            PlanError::UnsafeLiteralExpression(_) => "unsafe_literal_expression",
            PlanError::MalformedFilter(_) => "malformed_filter",
            PlanError::ConflictingPlanModifier { .. } => "conflicting_plan_modifier",
            PlanError::UnreachablePath { .. } => "unreachable_path",
            PlanError::MissingRequiredClause { .. } => "missing_required_clause",
            PlanError::UnknownModel(_) => "unknown_model",
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        PlanError::MalformedFilter(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

/// A GraphQL field error as placed in a response's `errors` array.
#[derive(Serialize, Debug)]
pub struct GraphQLErrorBody {
    pub message: String,
    pub extensions: ErrorExtensions,
}

#[derive(Serialize, Debug)]
pub struct ErrorExtensions {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Plan(e) => e.code(),
            AppError::Db(_) => "database_error",
        }
    }

    /// Present this error the way the resolver boundary reports it to the client.
    pub fn to_graphql_error(&self) -> GraphQLErrorBody {
        let details = match self {
            AppError::Plan(PlanError::UnknownField { valid, .. }) => {
                Some(serde_json::json!({ "validAttributes": valid }))
            }
            _ => None,
        };
        GraphQLErrorBody {
            message: self.to_string(),
            extensions: ErrorExtensions {
                code: self.code().to_string(),
                details,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_field_lists_valid_attributes() {
        let err = AppError::from(PlanError::UnknownField {
            model: "Person".into(),
            field: "nme".into(),
            valid: vec!["id".into(), "name".into()],
        });
        let body = err.to_graphql_error();
        assert_eq!(body.extensions.code, "unknown_field");
        assert!(body.message.contains("id, name"));
        assert_eq!(
            body.extensions.details,
            Some(serde_json::json!({ "validAttributes": ["id", "name"] }))
        );
    }
}

//! Resolved model metadata: config validated and flattened for runtime use.
//!
//! Everything here is built once at schema-build time and then only read.

use crate::error::PlanError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scalar type tag of an attribute, parsed from the config type name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarType {
    Integer,
    TinyInt,
    SmallInt,
    BigInt,
    Decimal,
    Float,
    Double,
    Real,
    String,
    Text,
    Char,
    Boolean,
    /// Date and time.
    Date,
    DateOnly,
    Time,
    DateTimeOffset,
    Uuid,
    Json,
    Jsonb,
    Blob,
    Enum,
    Other(String),
}

impl ScalarType {
    /// Parse a type name such as `INTEGER`, `decimal(10,2)` or `STRING(255)`.
    pub fn parse(name: &str) -> Self {
        let base = name.split('(').next().unwrap_or(name).trim().to_uppercase();
        match base.as_str() {
            "INTEGER" | "INT" | "MEDIUMINT" => ScalarType::Integer,
            "TINYINT" => ScalarType::TinyInt,
            "SMALLINT" => ScalarType::SmallInt,
            "BIGINT" => ScalarType::BigInt,
            "DECIMAL" | "NUMERIC" => ScalarType::Decimal,
            "FLOAT" => ScalarType::Float,
            "DOUBLE" | "DOUBLE PRECISION" => ScalarType::Double,
            "REAL" => ScalarType::Real,
            "STRING" | "VARCHAR" | "CITEXT" => ScalarType::String,
            "TEXT" => ScalarType::Text,
            "CHAR" => ScalarType::Char,
            "BOOLEAN" | "BOOL" => ScalarType::Boolean,
            "DATE" | "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => ScalarType::Date,
            "DATEONLY" => ScalarType::DateOnly,
            "TIME" => ScalarType::Time,
            "DATETIMEOFFSET" => ScalarType::DateTimeOffset,
            "UUID" | "UUIDV1" | "UUIDV4" => ScalarType::Uuid,
            "JSON" => ScalarType::Json,
            "JSONB" => ScalarType::Jsonb,
            "BLOB" | "BYTEA" => ScalarType::Blob,
            "ENUM" => ScalarType::Enum,
            _ => ScalarType::Other(base),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarType::Integer | ScalarType::TinyInt | ScalarType::SmallInt | ScalarType::BigInt
        )
    }

    /// Types whose filter values are parsed as floating point.
    pub fn is_decimal(&self) -> bool {
        matches!(
            self,
            ScalarType::Decimal | ScalarType::Float | ScalarType::Double | ScalarType::Real
        )
    }

    /// JSON documents: path tokens past such an attribute are in-document keys.
    pub fn is_structured(&self) -> bool {
        matches!(self, ScalarType::Json | ScalarType::Jsonb)
    }

    pub fn is_date(&self) -> bool {
        matches!(self, ScalarType::Date | ScalarType::DateOnly)
    }

    pub fn sql_name(&self) -> &str {
        match self {
            ScalarType::Integer => "INTEGER",
            ScalarType::TinyInt => "TINYINT",
            ScalarType::SmallInt => "SMALLINT",
            ScalarType::BigInt => "BIGINT",
            ScalarType::Decimal => "DECIMAL",
            ScalarType::Float => "FLOAT",
            ScalarType::Double => "DOUBLE PRECISION",
            ScalarType::Real => "REAL",
            ScalarType::String => "VARCHAR",
            ScalarType::Text => "TEXT",
            ScalarType::Char => "CHAR",
            ScalarType::Boolean => "BOOLEAN",
            ScalarType::Date => "TIMESTAMPTZ",
            ScalarType::DateOnly => "DATE",
            ScalarType::Time => "TIME",
            ScalarType::DateTimeOffset => "DATETIMEOFFSET",
            ScalarType::Uuid => "UUID",
            ScalarType::Json => "JSON",
            ScalarType::Jsonb => "JSONB",
            ScalarType::Blob => "BYTEA",
            ScalarType::Enum => "TEXT",
            ScalarType::Other(name) => name.as_str(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VirtualDefinition {
    pub expression: String,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttributeDescriptor {
    pub name: String,
    /// Backing column. Equal to the name unless the config renames it.
    pub column: String,
    pub scalar_type: ScalarType,
    pub nullable: bool,
    pub primary_key: bool,
    pub virtual_def: Option<VirtualDefinition>,
}

impl AttributeDescriptor {
    pub fn is_virtual(&self) -> bool {
        self.virtual_def.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

impl AssociationKind {
    pub fn is_many(self) -> bool {
        matches!(self, AssociationKind::HasMany | AssociationKind::BelongsToMany)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThroughDescriptor {
    pub table: String,
    pub foreign_key: String,
    pub other_key: String,
}

/// A declared relationship from `source` to `target`.
///
/// Key semantics per kind:
/// - `BelongsTo`: `foreign_key` lives on the source and references `target_key` (default: the
///   target's primary key).
/// - `HasOne` / `HasMany`: `foreign_key` lives on the target and references `target_key` on
///   the source (default: the source's primary key).
/// - `BelongsToMany`: `through.foreign_key` references the source key, `through.other_key`
///   references the target's primary key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssociationDescriptor {
    /// Alias (`as`) of the association, unique per source model.
    pub name: String,
    pub kind: AssociationKind,
    pub source: String,
    pub target: String,
    pub foreign_key: String,
    pub target_key: Option<String>,
    pub through: Option<ThroughDescriptor>,
}

impl AssociationDescriptor {
    /// Source-side attribute the join correlates on.
    pub fn parent_key<'a>(&'a self, source: &'a ModelDescriptor) -> &'a str {
        match self.kind {
            AssociationKind::BelongsTo => &self.foreign_key,
            _ => self
                .target_key
                .as_deref()
                .unwrap_or_else(|| source.primary_key()),
        }
    }

    /// Target-side attribute the join correlates on.
    pub fn child_key<'a>(&'a self, target: &'a ModelDescriptor) -> &'a str {
        match self.kind {
            AssociationKind::BelongsTo => self
                .target_key
                .as_deref()
                .unwrap_or_else(|| target.primary_key()),
            AssociationKind::HasOne | AssociationKind::HasMany => &self.foreign_key,
            AssociationKind::BelongsToMany => target.primary_key(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub table: String,
    pub attributes: IndexMap<String, AttributeDescriptor>,
    pub associations: IndexMap<String, AssociationDescriptor>,
    pub primary_keys: Vec<String>,
}

impl ModelDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.get(name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations.get(name)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.keys().cloned().collect()
    }

    /// First primary key attribute. Validation guarantees at least one exists.
    pub fn primary_key(&self) -> &str {
        self.primary_keys.first().map(String::as_str).unwrap_or("id")
    }

    /// Backing column of an attribute, falling back to the name itself.
    pub fn column_of<'a>(&'a self, attribute: &'a str) -> &'a str {
        self.attributes
            .get(attribute)
            .map(|a| a.column.as_str())
            .unwrap_or(attribute)
    }
}

/// Shape of a GraphQL field derived from model metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldShape {
    Scalar(ScalarType),
    /// An object of the named model.
    Object(String),
    List(Box<FieldShape>),
    NonNull(Box<FieldShape>),
}

impl FieldShape {
    /// Shape with any `NonNull` wrappers removed.
    pub fn nullable(&self) -> &FieldShape {
        match self {
            FieldShape::NonNull(inner) => inner.nullable(),
            other => other,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.nullable(), FieldShape::List(_))
    }

    /// Model behind an object or list-of-objects shape.
    pub fn target_model(&self) -> Option<&str> {
        match self.nullable() {
            FieldShape::Object(name) => Some(name),
            FieldShape::List(inner) => inner.target_model(),
            FieldShape::Scalar(_) | FieldShape::NonNull(_) => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ModelRegistry {
    pub models: IndexMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&ModelDescriptor, PlanError> {
        self.models
            .get(name)
            .ok_or_else(|| PlanError::UnknownModel(name.to_string()))
    }

    pub fn target_of(&self, association: &AssociationDescriptor) -> Result<&ModelDescriptor, PlanError> {
        self.require(&association.target)
    }

    /// Shape of `field` (an attribute or association name) on `model`.
    pub fn field_shape(&self, model: &ModelDescriptor, field: &str) -> Option<FieldShape> {
        if let Some(attr) = model.attribute(field) {
            let scalar = FieldShape::Scalar(attr.scalar_type.clone());
            return Some(if attr.nullable {
                scalar
            } else {
                FieldShape::NonNull(Box::new(scalar))
            });
        }
        let assoc = model.association(field)?;
        let object = FieldShape::Object(assoc.target.clone());
        Some(if assoc.kind.is_many() {
            FieldShape::List(Box::new(FieldShape::NonNull(Box::new(object))))
        } else {
            object
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_parameterized_types() {
        assert_eq!(ScalarType::parse("decimal(10, 2)"), ScalarType::Decimal);
        assert_eq!(ScalarType::parse("STRING(255)"), ScalarType::String);
        assert_eq!(ScalarType::parse("smallint"), ScalarType::SmallInt);
        assert_eq!(ScalarType::parse("geometry"), ScalarType::Other("GEOMETRY".into()));
        assert!(ScalarType::parse("jsonb").is_structured());
        assert!(ScalarType::parse("DATEONLY").is_date());
    }

    #[test]
    fn list_shape_survives_non_null() {
        let shape = FieldShape::NonNull(Box::new(FieldShape::List(Box::new(FieldShape::Object(
            "Order".into(),
        )))));
        assert!(shape.is_list());
        assert_eq!(shape.target_model(), Some("Order"));
        let scalar = FieldShape::NonNull(Box::new(FieldShape::Scalar(ScalarType::Integer)));
        assert!(!scalar.is_list());
        assert_eq!(scalar.target_model(), None);
    }
}

//! GraphQL execution-context inputs: argument values, selection sets and fragments.

use crate::error::PlanError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A parsed GraphQL argument value, possibly holding variable references.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Variable {
        #[serde(rename = "$var")]
        var: String,
    },
    List(Vec<ArgValue>),
    Object(IndexMap<String, ArgValue>),
    Scalar(Value),
}

impl ArgValue {
    /// Substitute variables. Unbound variables resolve to `None`; inside lists they become
    /// `null` and inside objects the key is dropped.
    pub fn resolve(&self, variables: &Map<String, Value>) -> Option<Value> {
        match self {
            ArgValue::Variable { var } => variables.get(var).cloned(),
            ArgValue::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|v| v.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            ArgValue::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(k, v)| v.resolve(variables).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            ArgValue::Scalar(v) => Some(v.clone()),
        }
    }
}

impl From<Value> for ArgValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Array(items) => ArgValue::List(items.into_iter().map(ArgValue::from).collect()),
            Value::Object(map) if map.len() == 1 && map.get("$var").is_some_and(Value::is_string) => {
                ArgValue::Variable {
                    var: map
                        .get("$var")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            Value::Object(map) => ArgValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ArgValue::from(v)))
                    .collect(),
            ),
            other => ArgValue::Scalar(other),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSelection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub arguments: IndexMap<String, ArgValue>,
    #[serde(default)]
    pub selections: Vec<Selection>,
}

impl FieldSelection {
    pub fn new(name: impl Into<String>) -> Self {
        FieldSelection {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_selections(mut self, selections: Vec<Selection>) -> Self {
        self.selections = selections;
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Key under which the field appears in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Argument value with variables substituted.
    pub fn argument(&self, name: &str, variables: &Map<String, Value>) -> Option<Value> {
        self.arguments.get(name).and_then(|v| v.resolve(variables))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Selection {
    Field(FieldSelection),
    FragmentSpread {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineFragment {
        #[serde(default)]
        type_condition: Option<String>,
        selections: Vec<Selection>,
    },
}

impl Selection {
    pub fn field(name: impl Into<String>) -> Self {
        Selection::Field(FieldSelection::new(name))
    }

    pub fn spread(name: impl Into<String>) -> Self {
        Selection::FragmentSpread { name: name.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentDefinition {
    pub name: String,
    #[serde(default)]
    pub type_condition: Option<String>,
    pub selections: Vec<Selection>,
}

/// Operation-wide context: named fragments and variable bindings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionInfo {
    #[serde(default)]
    pub fragments: IndexMap<String, FragmentDefinition>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl ExecutionInfo {
    pub fn with_fragment(mut self, fragment: FragmentDefinition) -> Self {
        self.fragments.insert(fragment.name.clone(), fragment);
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Flatten a selection set: fragment spreads are inlined transitively, inline fragments are
    /// unwrapped and fields sharing a response key are merged.
    pub fn expand(&self, selections: &[Selection]) -> Result<Vec<FieldSelection>, PlanError> {
        let mut out: IndexMap<String, FieldSelection> = IndexMap::new();
        let mut visiting = HashSet::new();
        self.expand_into(selections, &mut out, &mut visiting)?;
        Ok(out.into_values().collect())
    }

    fn expand_into<'s>(
        &'s self,
        selections: &'s [Selection],
        out: &mut IndexMap<String, FieldSelection>,
        visiting: &mut HashSet<&'s str>,
    ) -> Result<(), PlanError> {
        for selection in selections {
            match selection {
                Selection::Field(field) => match out.get_mut(field.response_key()) {
                    Some(existing) => existing.selections.extend(field.selections.iter().cloned()),
                    None => {
                        out.insert(field.response_key().to_string(), field.clone());
                    }
                },
                Selection::InlineFragment { selections, .. } => {
                    self.expand_into(selections, out, visiting)?;
                }
                Selection::FragmentSpread { name } => {
                    let fragment = self.fragments.get(name).ok_or_else(|| {
                        PlanError::malformed(format!("unknown fragment '{}'", name))
                    })?;
                    if !visiting.insert(fragment.name.as_str()) {
                        return Err(PlanError::malformed(format!(
                            "fragment '{}' spreads itself",
                            name
                        )));
                    }
                    self.expand_into(&fragment.selections, out, visiting)?;
                    visiting.remove(fragment.name.as_str());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_variables() {
        let arg: ArgValue = serde_json::from_value(json!({
            "where": { "name": { "$var": "who" }, "age": { "_gtOp": { "$var": "missing" } } },
            "limit": 10,
            "ids": [1, { "$var": "missing" }]
        }))
        .unwrap();
        let mut vars = Map::new();
        vars.insert("who".into(), json!("Ada"));
        assert_eq!(
            arg.resolve(&vars),
            Some(json!({ "where": { "name": "Ada", "age": {} }, "limit": 10, "ids": [1, null] }))
        );
    }

    #[test]
    fn expands_fragments_transitively() {
        let info = ExecutionInfo::default()
            .with_fragment(FragmentDefinition {
                name: "A".into(),
                type_condition: None,
                selections: vec![Selection::field("name"), Selection::spread("B")],
            })
            .with_fragment(FragmentDefinition {
                name: "B".into(),
                type_condition: None,
                selections: vec![Selection::Field(
                    FieldSelection::new("customer").with_selections(vec![Selection::field("country")]),
                )],
            });
        let fields = info
            .expand(&[
                Selection::Field(FieldSelection::new("customer").with_selections(vec![Selection::field("id")])),
                Selection::spread("A"),
                Selection::InlineFragment {
                    type_condition: None,
                    selections: vec![Selection::field("status")],
                },
            ])
            .unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["customer", "name", "status"]);
        assert_eq!(fields[0].selections.len(), 2);
    }

    #[test]
    fn rejects_cycles_and_unknown_fragments() {
        let info = ExecutionInfo::default().with_fragment(FragmentDefinition {
            name: "Loop".into(),
            type_condition: None,
            selections: vec![Selection::spread("Loop")],
        });
        assert!(matches!(
            info.expand(&[Selection::spread("Loop")]),
            Err(PlanError::MalformedFilter(_))
        ));
        assert!(matches!(
            info.expand(&[Selection::spread("Nope")]),
            Err(PlanError::MalformedFilter(_))
        ));
    }

    #[test]
    fn selection_json_shape() {
        let s: Selection = serde_json::from_value(json!({
            "kind": "Field",
            "name": "orders",
            "arguments": { "query": { "limit": 2 } },
            "selections": [ { "kind": "FragmentSpread", "name": "OrderFields" } ]
        }))
        .unwrap();
        match s {
            Selection::Field(f) => {
                assert_eq!(f.name, "orders");
                assert_eq!(f.argument("query", &Map::new()), Some(json!({ "limit": 2 })));
                assert_eq!(f.selections, vec![Selection::spread("OrderFields")]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

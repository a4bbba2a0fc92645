//! Query-plan types handed to the storage layer.

use crate::config::ScalarType;
use crate::query::filter::FilterNode;
use crate::query::include::IncludeNode;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Sum,
    Max,
    Min,
    Avg,
    Count,
}

impl AggregateFn {
    /// Default aggregate for a non-key attribute of a grouped query.
    pub fn for_type(ty: &ScalarType) -> Self {
        match ty {
            ScalarType::Decimal => AggregateFn::Sum,
            ScalarType::Date | ScalarType::DateOnly => AggregateFn::Max,
            _ => AggregateFn::Avg,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sum" => Some(AggregateFn::Sum),
            "max" => Some(AggregateFn::Max),
            "min" => Some(AggregateFn::Min),
            "avg" => Some(AggregateFn::Avg),
            "count" => Some(AggregateFn::Count),
            _ => None,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            AggregateFn::Sum => "SUM",
            AggregateFn::Max => "MAX",
            AggregateFn::Min => "MIN",
            AggregateFn::Avg => "AVG",
            AggregateFn::Count => "COUNT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SelectItem {
    Column {
        name: String,
    },
    Aggregate {
        func: AggregateFn,
        attribute: String,
        alias: String,
    },
    /// `COUNT(DISTINCT <primary key>)` of the base model.
    Count,
}

impl SelectItem {
    pub fn column(name: impl Into<String>) -> Self {
        SelectItem::Column { name: name.into() }
    }

    /// Result key of the item.
    pub fn output_name(&self) -> &str {
        match self {
            SelectItem::Column { name } => name,
            SelectItem::Aggregate { alias, .. } => alias,
            SelectItem::Count => COUNT_ALIAS,
        }
    }
}

pub const COUNT_ALIAS: &str = "__count__";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ASC" => Some(Direction::Asc),
            "DESC" => Some(Direction::Desc),
            _ => None,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OrderTarget {
    /// A column of the model reached through `hops` from the base model.
    Column {
        hops: Vec<String>,
        model: String,
        column: String,
    },
    Expression {
        sql: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OrderEntry {
    pub target: OrderTarget,
    pub direction: Direction,
}

/// Output of the join-planning stage: what the selection needs, before query modifiers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPlan {
    pub model: String,
    /// Requested attributes followed by keys the includes need.
    pub attributes: IndexSet<String>,
    /// Attributes the client asked for.
    pub requested: IndexSet<String>,
    pub includes: Vec<IncludeNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub model: String,
    pub attributes: IndexSet<SelectItem>,
    pub includes: Vec<IncludeNode>,
    #[serde(rename = "where")]
    pub filter: Option<FilterNode>,
    pub group: Vec<String>,
    pub order: Vec<OrderEntry>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl QueryPlan {
    pub fn new(model: impl Into<String>) -> Self {
        QueryPlan {
            model: model.into(),
            attributes: IndexSet::new(),
            includes: Vec::new(),
            filter: None,
            group: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn include(&self, alias: &str) -> Option<&IncludeNode> {
        self.includes.iter().find(|i| i.alias == alias)
    }

    pub fn is_count(&self) -> bool {
        self.attributes.contains(&SelectItem::Count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_aggregates() {
        assert_eq!(AggregateFn::for_type(&ScalarType::Decimal), AggregateFn::Sum);
        assert_eq!(AggregateFn::for_type(&ScalarType::DateOnly), AggregateFn::Max);
        assert_eq!(AggregateFn::for_type(&ScalarType::Integer), AggregateFn::Avg);
        assert_eq!(AggregateFn::parse("MIN"), Some(AggregateFn::Min));
        assert_eq!(Direction::parse("desc"), Some(Direction::Desc));
        assert_eq!(Direction::parse("sideways"), None);
    }
}

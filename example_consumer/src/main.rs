//! Example consumer: compiles one model query with modelgraph, prints the plan and its SQL, and
//! runs it when `DATABASE_URL` is set.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! `MODELS_PATH` (default `example_consumer/models.json`) is the model config and
//! `REQUEST_PATH` (default `example_consumer/request.json`) the request to compile.

use modelgraph::sql::select;
use modelgraph::{
    load_from_path, AppError, AppState, ExecutionInfo, FieldSelection, QueryCompiler,
    SchemaContext, Selection, StorageEngine,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    model: String,
    #[serde(default = "default_field")]
    field: String,
    selections: Vec<SelectionSpec>,
    #[serde(default)]
    query: Option<Value>,
    #[serde(default)]
    count: bool,
    #[serde(default)]
    variables: serde_json::Map<String, Value>,
}

fn default_field() -> String {
    "list".into()
}

/// `"name"` for a scalar, `{ "name", "query"?, "selections" }` for an association.
#[derive(Deserialize)]
#[serde(untagged)]
enum SelectionSpec {
    Scalar(String),
    Nested {
        name: String,
        #[serde(default)]
        query: Option<Value>,
        #[serde(default)]
        selections: Vec<SelectionSpec>,
    },
}

fn field_selection(name: &str, query: Option<&Value>, selections: &[SelectionSpec]) -> FieldSelection {
    let mut field =
        FieldSelection::new(name).with_selections(selections.iter().map(to_selection).collect());
    if let Some(query) = query {
        field = field.with_argument("query", query.clone());
    }
    field
}

fn to_selection(spec: &SelectionSpec) -> Selection {
    match spec {
        SelectionSpec::Scalar(name) => Selection::field(name),
        SelectionSpec::Nested {
            name,
            query,
            selections,
        } => Selection::Field(field_selection(name, query.as_ref(), selections)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modelgraph=info")),
        )
        .init();

    let models_path =
        std::env::var("MODELS_PATH").unwrap_or_else(|_| "example_consumer/models.json".into());
    let request_path =
        std::env::var("REQUEST_PATH").unwrap_or_else(|_| "example_consumer/request.json".into());

    let mut config = load_from_path(&models_path).await?;
    config.options = config.options.with_env_overrides()?;
    let schema = SchemaContext::build(&config)?;
    tracing::info!(models = config.models.len(), path = %models_path, "models loaded");

    let request: Request = serde_json::from_str(&tokio::fs::read_to_string(&request_path).await?)?;
    let field = field_selection(&request.field, request.query.as_ref(), &request.selections);
    let info = ExecutionInfo::default().with_variables(request.variables);

    let compiler = QueryCompiler::new(schema.clone());
    let planned = if request.count {
        compiler.count(&request.model, &field, &info)
    } else {
        compiler.root_list(&request.model, &field, &info)
    };
    let plan = match planned {
        Ok(plan) => plan,
        Err(e) => {
            let body = AppError::from(e).to_graphql_error();
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "errors": [body] }))?);
            return Ok(());
        }
    };
    println!("{}", serde_json::to_string_pretty(&plan)?);

    let q = select(&schema, &plan)?;
    println!("{}", q.sql);
    println!("params: {}", Value::Array(q.params.clone()));

    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::info!("DATABASE_URL not set, query not executed");
        return Ok(());
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    let state = AppState::new(pool, schema);
    if request.count {
        let n = state.storage.count(&plan).await?;
        println!("count: {}", n);
    } else {
        let rows = state.storage.find_all(&plan).await?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Ok(())
}

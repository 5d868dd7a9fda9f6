//! Neo4j schema initialization (uniqueness constraints).

use anyhow::{Context, Result};
use neo4rs::Query;
use tracing::info;

use crate::Neo4jGraph;

/// One uniqueness constraint on `id` per node label. The backing index also
/// serves every `MERGE ... {id: $id}` the handlers issue.
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE CONSTRAINT user_id IF NOT EXISTS FOR (n:User) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT project_id IF NOT EXISTS FOR (n:Project) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT standard_id IF NOT EXISTS FOR (n:Standard) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT control_id IF NOT EXISTS FOR (n:Control) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT evidence_id IF NOT EXISTS FOR (n:Evidence) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT tag_id IF NOT EXISTS FOR (n:Tag) REQUIRE n.id IS UNIQUE",
];

/// Initialize Neo4j schema with constraints.
///
/// Safe to run multiple times - uses IF NOT EXISTS clauses.
pub async fn initialize_schema(client: &Neo4jGraph) -> Result<usize> {
    info!("Initializing Neo4j schema...");

    for statement in SCHEMA_STATEMENTS {
        client
            .execute(Query::new(statement.to_string()))
            .await
            .with_context(|| format!("Schema statement failed: {}", statement))?;
    }

    info!("Neo4j schema initialized ({} statements)", SCHEMA_STATEMENTS.len());
    Ok(SCHEMA_STATEMENTS.len())
}

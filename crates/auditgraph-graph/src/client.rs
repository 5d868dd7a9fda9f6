//! Neo4j connection client and Cypher rendering.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query};
use tracing::debug;

use auditgraph_core::config::GraphConfig;
use auditgraph_core::model::{is_valid_property_key, NodeLabel, Properties, PropertyValue};

use crate::ops::{edge_key, Cardinality, GraphOp, NodeRef, EDGE_KEY_PROPERTY};
use crate::store::{GraphCounts, GraphStore};

/// A rendered Cypher statement with scalar parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub cypher: String,
    pub params: Vec<(String, PropertyValue)>,
}

impl Statement {
    fn new(cypher: String) -> Self {
        Self {
            cypher,
            params: Vec::new(),
        }
    }

    fn param(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.params.push((name.to_string(), value.into()));
        self
    }

    fn into_query(self) -> Query {
        self.params
            .into_iter()
            .fold(Query::new(self.cypher), |query, (name, value)| match value {
                PropertyValue::String(s) => query.param(&name, s),
                PropertyValue::Int(i) => query.param(&name, i),
                PropertyValue::Float(f) => query.param(&name, f),
                PropertyValue::Bool(b) => query.param(&name, b),
                // Nulls are rendered inline and never bound.
                PropertyValue::Null => query,
            })
    }
}

fn ensure_key(key: &str) -> Result<()> {
    if !is_valid_property_key(key) {
        bail!("Invalid property key: {:?}", key);
    }
    Ok(())
}

/// Render `var.k = $prefixN, ...` for a property map, appending bound values.
fn assignments(
    var: &str,
    prefix: &str,
    props: &Properties,
    mut stmt: Statement,
) -> Result<(String, Statement)> {
    let mut parts = Vec::with_capacity(props.len());
    for (i, (key, value)) in props.iter().enumerate() {
        ensure_key(key)?;
        if value.is_null() {
            parts.push(format!("{}.{} = null", var, key));
        } else {
            let name = format!("{}{}", prefix, i);
            parts.push(format!("{}.{} = ${}", var, key, name));
            stmt = stmt.param(&name, value.clone());
        }
    }
    Ok((parts.join(", "), stmt))
}

/// Render `{edgeKey: $key, k: $prefixN, ...}` for a relationship identity map.
fn pattern(prefix: &str, key: &Properties, stmt: Statement) -> Result<(String, Statement)> {
    let mut stmt = stmt.param("key", edge_key(key)?);
    let mut parts = Vec::with_capacity(key.len() + 1);
    parts.push(format!("{}: $key", EDGE_KEY_PROPERTY));
    for (i, (name, value)) in key.iter().enumerate() {
        ensure_key(name)?;
        if name == EDGE_KEY_PROPERTY {
            bail!("Relationship key '{}' is reserved", name);
        }
        if value.is_null() {
            bail!("Relationship key '{}' cannot be null", name);
        }
        let param = format!("{}{}", prefix, i);
        parts.push(format!("{}: ${}", name, param));
        stmt = stmt.param(&param, value.clone());
    }
    Ok((format!(" {{{}}}", parts.join(", ")), stmt))
}

fn merge_endpoint(var: &str, node: &NodeRef) -> Statement {
    Statement::new(format!("MERGE ({}:{} {{id: $id}})", var, node.label)).param("id", &node.id)
}

/// Render one op as the statements that apply it, in order.
pub fn render(op: &GraphOp) -> Result<Vec<Statement>> {
    let statements = match op {
        GraphOp::MergeNode { node, props } => {
            let stmt = Statement::new(String::new()).param("id", &node.id);
            let (set, mut stmt) = assignments("n", "p", props, stmt)?;
            stmt.cypher = if set.is_empty() {
                format!("MERGE (n:{} {{id: $id}})", node.label)
            } else {
                format!("MERGE (n:{} {{id: $id}}) SET {}", node.label, set)
            };
            vec![stmt]
        }
        GraphOp::MergeRelationship {
            from,
            rel,
            to,
            key,
            props,
            cardinality,
        } => {
            let mut statements = vec![merge_endpoint("a", from), merge_endpoint("b", to)];
            match cardinality {
                Cardinality::Many => {}
                Cardinality::OnePerSource => statements.push(
                    Statement::new(format!(
                        "MATCH (a:{} {{id: $from_id}})-[old:{}]->(other:{}) \
                         WHERE other.id <> $to_id DELETE old",
                        from.label, rel, to.label
                    ))
                    .param("from_id", &from.id)
                    .param("to_id", &to.id),
                ),
                Cardinality::OnePerTarget => statements.push(
                    Statement::new(format!(
                        "MATCH (other:{})-[old:{}]->(b:{} {{id: $to_id}}) \
                         WHERE other.id <> $from_id DELETE old",
                        from.label, rel, to.label
                    ))
                    .param("from_id", &from.id)
                    .param("to_id", &to.id),
                ),
            }
            let stmt = Statement::new(String::new())
                .param("from_id", &from.id)
                .param("to_id", &to.id);
            let (key_pattern, stmt) = pattern("k", key, stmt)?;
            let (set, mut stmt) = assignments("r", "p", props, stmt)?;
            let mut cypher = format!(
                "MATCH (a:{} {{id: $from_id}}), (b:{} {{id: $to_id}}) MERGE (a)-[r:{}{}]->(b)",
                from.label, to.label, rel, key_pattern
            );
            if !set.is_empty() {
                cypher.push_str(" SET ");
                cypher.push_str(&set);
            }
            stmt.cypher = cypher;
            statements.push(stmt);
            statements
        }
        GraphOp::SetProperty { node, key, value } => {
            ensure_key(key)?;
            let stmt = if value.is_null() {
                Statement::new(format!("MERGE (n:{} {{id: $id}}) SET n.{} = null", node.label, key))
            } else {
                Statement::new(format!("MERGE (n:{} {{id: $id}}) SET n.{} = $value", node.label, key))
                    .param("value", value.clone())
            };
            vec![stmt.param("id", &node.id)]
        }
        GraphOp::DetachDeleteNode(node) => vec![Statement::new(format!(
            "MATCH (n:{} {{id: $id}}) DETACH DELETE n",
            node.label
        ))
        .param("id", &node.id)],
        GraphOp::DetachDeleteDependents {
            dependent,
            rel,
            owner,
        } => vec![Statement::new(format!(
            "MATCH (d:{})-[:{}]->(o:{} {{id: $id}}) DETACH DELETE d",
            dependent, rel, owner.label
        ))
        .param("id", &owner.id)],
    };
    Ok(statements)
}

/// Graph store backed by Neo4j.
#[derive(Clone)]
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    /// Create a new client from config.
    ///
    /// `Graph::connect` only builds a lazy pool, so a `RETURN 1` ping forces
    /// the bolt handshake and surfaces an unreachable server right away.
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .fetch_size(500)
            .build()
            .context("Failed to build Neo4j config")?;

        let graph = Graph::connect(neo4j_config)
            .await
            .context("Failed to create Neo4j connection pool")?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .context("Neo4j is not responding to queries")?;

        debug!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Execute a Cypher query that returns no results.
    pub async fn execute(&self, query: Query) -> Result<()> {
        self.graph
            .run(query)
            .await
            .context("Neo4j query execution failed")?;
        Ok(())
    }

    /// Execute a Cypher query and return results as rows.
    pub async fn query(&self, query: Query) -> Result<Vec<neo4rs::Row>> {
        let mut result = self.graph.execute(query).await.context("Neo4j query failed")?;

        let mut rows = Vec::new();
        while let Some(row) = result.next().await.context("Failed to read Neo4j row")? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let rows = self.query(Query::new(cypher.to_string())).await?;
        let count: i64 = match rows.into_iter().next() {
            Some(row) => row
                .get("count")
                .map_err(|e| anyhow::anyhow!("Failed to get field 'count': {:?}", e))?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn apply(&self, ops: &[GraphOp]) -> Result<()> {
        let mut statements = Vec::new();
        for op in ops {
            statements.extend(render(op)?);
        }
        if statements.is_empty() {
            return Ok(());
        }

        let mut txn = self
            .graph
            .start_txn()
            .await
            .context("Failed to open Neo4j transaction")?;
        for stmt in statements {
            let cypher = stmt.cypher.clone();
            if let Err(e) = txn.run(stmt.into_query()).await {
                // The server discards the transaction on error either way.
                let _ = txn.rollback().await;
                return Err(e).with_context(|| format!("Graph statement failed: {}", cypher));
            }
        }
        txn.commit()
            .await
            .context("Failed to commit Neo4j transaction")?;
        Ok(())
    }

    async fn query_ids_not_in(
        &self,
        label: NodeLabel,
        valid_ids: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = valid_ids.iter().cloned().collect();
        let query = Query::new(format!(
            "MATCH (n:{}) WHERE NOT n.id IN $ids RETURN n.id AS id ORDER BY id",
            label
        ))
        .param("ids", ids);

        self.query(query)
            .await?
            .into_iter()
            .map(|row| {
                row.get::<String>("id")
                    .map_err(|e| anyhow::anyhow!("Failed to get field 'id': {:?}", e))
            })
            .collect()
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let nodes = self.count("MATCH (n) RETURN count(n) AS count").await?;
        let relationships = self
            .count("MATCH ()-[r]->() RETURN count(r) AS count")
            .await?;
        Ok(GraphCounts {
            nodes,
            relationships,
        })
    }
}

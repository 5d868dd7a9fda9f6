//! SQLite-backed relational source.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::debug;

use auditgraph_core::model::NodeLabel;
use auditgraph_core::source::{
    ControlRow, EvidenceRow, IssueRow, ProjectRow, RelationalSource, SourceError, SourceResult,
    StandardRow, TagRow, UserRow,
};

use crate::pool::{DbError, DbPool};

impl From<DbError> for SourceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Poisoned | DbError::Join(_) => SourceError::Unavailable(err.to_string()),
            other => SourceError::Query(other.to_string()),
        }
    }
}

/// Reads entity rows straight from the relational tables.
#[derive(Clone)]
pub struct SqliteSource {
    pool: DbPool,
}

impl SqliteSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open a database file read-only.
    pub fn open(path: &Path) -> SourceResult<Self> {
        let pool = DbPool::open_read_only(path)?;
        debug!(path = %path.display(), "Opened relational source");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Load a two-column join table as `left -> [right]`, ordered.
fn load_links(conn: &Connection, sql: &str) -> rusqlite::Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut links: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (left, right) = row?;
        links.entry(left).or_default().push(right);
    }
    Ok(links)
}

fn table_for(label: NodeLabel) -> &'static str {
    match label {
        NodeLabel::User => "users",
        NodeLabel::Project => "projects",
        NodeLabel::Standard => "frameworks",
        NodeLabel::Control => "controls",
        NodeLabel::Evidence => "evidence",
        NodeLabel::Tag => "tags",
    }
}

#[async_trait]
impl RelationalSource for SqliteSource {
    async fn users(&self) -> SourceResult<Vec<UserRow>> {
        let rows = self
            .pool
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, role, manager_id, linked_customer_id
                     FROM users ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        role: row.get(3)?,
                        manager_id: row.get(4)?,
                        linked_customer_id: row.get(5)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        Ok(rows)
    }

    async fn projects(&self) -> SourceResult<Vec<ProjectRow>> {
        let rows = self
            .pool
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, customer_id, auditor_id, reviewer_auditor_id
                     FROM projects ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(ProjectRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        customer_id: row.get(2)?,
                        auditor_id: row.get(3)?,
                        reviewer_id: row.get(4)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        Ok(rows)
    }

    async fn standards(&self) -> SourceResult<Vec<StandardRow>> {
        let rows = self
            .pool
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name FROM frameworks ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(StandardRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        Ok(rows)
    }

    async fn controls(&self) -> SourceResult<Vec<ControlRow>> {
        let rows = self
            .pool
            .call(|conn| {
                let mut tags = load_links(
                    conn,
                    "SELECT control_id, tag_id FROM control_tags ORDER BY control_id, tag_id",
                )?;
                let mut stmt = conn.prepare(
                    "SELECT id, code, title, description, category, framework_id, keywords
                     FROM controls ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    let id: String = row.get(0)?;
                    let keywords: String = row.get(6)?;
                    Ok(ControlRow {
                        tag_ids: tags.remove(&id).unwrap_or_default(),
                        id,
                        code: row.get(1)?,
                        title: row.get(2)?,
                        description: row.get(3)?,
                        category: row.get(4)?,
                        standard_id: row.get(5)?,
                        // Keywords are informational only; a malformed list is treated as empty.
                        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
                    })
                })?;
                rows.collect()
            })
            .await?;
        Ok(rows)
    }

    async fn evidence(&self) -> SourceResult<Vec<EvidenceRow>> {
        let rows = self
            .pool
            .call(|conn| {
                let mut controls = load_links(
                    conn,
                    "SELECT evidence_id, control_id FROM evidence_controls ORDER BY evidence_id, control_id",
                )?;
                let mut tags = load_links(
                    conn,
                    "SELECT evidence_id, tag_id FROM evidence_tags ORDER BY evidence_id, tag_id",
                )?;
                let mut stmt = conn.prepare(
                    "SELECT id, file_name, project_id, uploaded_by_id FROM evidence ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    let id: String = row.get(0)?;
                    Ok(EvidenceRow {
                        control_ids: controls.remove(&id).unwrap_or_default(),
                        tag_ids: tags.remove(&id).unwrap_or_default(),
                        id,
                        file_name: row.get(1)?,
                        project_id: row.get(2)?,
                        uploaded_by_id: row.get(3)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        Ok(rows)
    }

    async fn tags(&self) -> SourceResult<Vec<TagRow>> {
        let rows = self
            .pool
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(TagRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        Ok(rows)
    }

    async fn issues(&self) -> SourceResult<Vec<IssueRow>> {
        let rows = self
            .pool
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, customer_id, title, status FROM project_issues ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(IssueRow {
                        id: row.get(0)?,
                        customer_id: row.get(1)?,
                        title: row.get(2)?,
                        status: row.get(3)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        Ok(rows)
    }

    async fn valid_ids(&self, label: NodeLabel) -> SourceResult<HashSet<String>> {
        let sql = format!("SELECT id FROM {}", table_for(label));
        let ids = self
            .pool
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
                ids.collect()
            })
            .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    fn seeded_source() -> SqliteSource {
        let pool = DbPool::in_memory().unwrap();
        run_migrations(&pool).unwrap();
        pool.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO users VALUES ('M1', 'Maria', 'maria@example.com', 'manager', NULL, NULL);
                 INSERT INTO users VALUES ('U1', 'Ana', 'ana@example.com', 'auditor', 'M1', NULL);
                 INSERT INTO users VALUES ('K1', 'Kai', 'kai@example.com', 'compliance', NULL, 'C9');
                 INSERT INTO frameworks VALUES ('S1', 'ISO 27001');
                 INSERT INTO projects VALUES ('P1', 'Acme audit', 'C9', 'U1', NULL);
                 INSERT INTO tags VALUES ('T1', 'Policy');
                 INSERT INTO controls VALUES ('CT1', 'A.9.1', 'Access policy', NULL, 'Access', 'S1', '[\"iam\",\"access\"]');
                 INSERT INTO control_tags VALUES ('CT1', 'T1');
                 INSERT INTO evidence VALUES ('E1', 'policy.pdf', 'P1', 'U1');
                 INSERT INTO evidence_controls VALUES ('E1', 'CT1');
                 INSERT INTO evidence_tags VALUES ('E1', 'T1');
                 INSERT INTO project_issues VALUES ('I1', 'C9', 'Late upload', 'open');",
            )
        })
        .unwrap();
        SqliteSource::new(pool)
    }

    #[tokio::test]
    async fn test_reads_users_with_foreign_keys() {
        let source = seeded_source();
        let users = source.users().await.unwrap();
        assert_eq!(users.len(), 3);
        let ana = users.iter().find(|u| u.id == "U1").unwrap();
        assert_eq!(ana.manager_id.as_deref(), Some("M1"));
        assert_eq!(ana.linked_customer_id, None);
    }

    #[tokio::test]
    async fn test_controls_carry_tag_links_and_keywords() {
        let source = seeded_source();
        let controls = source.controls().await.unwrap();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].standard_id.as_deref(), Some("S1"));
        assert_eq!(controls[0].tag_ids, vec!["T1".to_string()]);
        assert_eq!(controls[0].keywords, vec!["iam".to_string(), "access".to_string()]);
    }

    #[tokio::test]
    async fn test_evidence_joins_controls_and_tags() {
        let source = seeded_source();
        let evidence = source.evidence().await.unwrap();
        assert_eq!(evidence[0].control_ids, vec!["CT1".to_string()]);
        assert_eq!(evidence[0].tag_ids, vec!["T1".to_string()]);
        assert_eq!(evidence[0].uploaded_by_id.as_deref(), Some("U1"));
    }

    #[tokio::test]
    async fn test_valid_ids_reflect_deletes() {
        let source = seeded_source();
        assert!(source.valid_ids(NodeLabel::Evidence).await.unwrap().contains("E1"));

        source
            .pool()
            .with_conn(|conn| conn.execute("DELETE FROM evidence WHERE id = 'E1'", []))
            .unwrap();

        assert!(source.valid_ids(NodeLabel::Evidence).await.unwrap().is_empty());
        assert_eq!(
            source.valid_ids(NodeLabel::Standard).await.unwrap(),
            HashSet::from(["S1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_issues_and_projects() {
        let source = seeded_source();
        let issues = source.issues().await.unwrap();
        assert_eq!(issues[0].customer_id, "C9");
        let projects = source.projects().await.unwrap();
        assert_eq!(projects[0].auditor_id.as_deref(), Some("U1"));
        assert_eq!(projects[0].reviewer_id, None);
    }
}

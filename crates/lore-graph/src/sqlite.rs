//! SQLite-backed graph, watermark and retrieval store.
//!
//! Nodes are keyed by id and relationships by `(source, target, label)`, so replaying the
//! same ops is a no-op. Relationship merges only apply when both endpoints exist, which
//! mirrors the `MATCH ... MERGE` semantics of the Cypher rendering.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::{
    AppliedTransaction, GraphFact, GraphRetriever, GraphStoreError, GraphWriter, NodeView,
    PersistenceOp, PropertyMap, WatermarkStore,
};

type StoreResult<T> = Result<T, GraphStoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub id: String,
    pub label: String,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

/// Persistent SQLite graph store.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    db_path: PathBuf,
}

impl SqliteGraphStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS graph_nodes (
                node_id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS graph_relationships (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                label TEXT NOT NULL,
                properties_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (source_id, target_id, label),
                FOREIGN KEY(source_id) REFERENCES graph_nodes(node_id) ON DELETE CASCADE,
                FOREIGN KEY(target_id) REFERENCES graph_nodes(node_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_graph_relationships_target
                ON graph_relationships (target_id);

            CREATE TABLE IF NOT EXISTS stream_watermarks (
                stream_id TEXT PRIMARY KEY,
                last_processed_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn node(&self, id: &str) -> StoreResult<Option<StoredNode>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT node_id, label, properties_json FROM graph_nodes WHERE node_id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, label, properties_json)| {
            Ok(StoredNode {
                id,
                label,
                properties: properties_from_db(&properties_json)?,
            })
        })
        .transpose()
    }

    pub fn counts(&self) -> StoreResult<GraphCounts> {
        let connection = self.open_connection()?;
        let nodes: i64 =
            connection.query_row("SELECT COUNT(*) FROM graph_nodes", [], |row| row.get(0))?;
        let relationships: i64 =
            connection.query_row("SELECT COUNT(*) FROM graph_relationships", [], |row| {
                row.get(0)
            })?;
        Ok(GraphCounts {
            nodes: count_from_db("graph_nodes", nodes)?,
            relationships: count_from_db("graph_relationships", relationships)?,
        })
    }

    fn load_facts(&self) -> StoreResult<Vec<GraphFact>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT r.source_id, s.label, s.properties_json,
                   r.label, r.target_id, t.label, t.properties_json
            FROM graph_relationships r
            JOIN graph_nodes s ON s.node_id = r.source_id
            JOIN graph_nodes t ON t.node_id = r.target_id
            ORDER BY r.source_id, r.label, r.target_id
            "#,
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut facts = Vec::new();
        for row in rows {
            let (
                source_id,
                source_label,
                source_props,
                label,
                target_id,
                target_label,
                target_props,
            ) = row?;
            facts.push(GraphFact {
                source: NodeView {
                    id: source_id,
                    label: source_label,
                    properties: properties_from_db(&source_props)?,
                },
                relationship: label,
                target: NodeView {
                    id: target_id,
                    label: target_label,
                    properties: properties_from_db(&target_props)?,
                },
            });
        }
        Ok(facts)
    }
}

#[async_trait]
impl GraphWriter for SqliteGraphStore {
    async fn apply_transaction(
        &self,
        ops: &[PersistenceOp],
    ) -> StoreResult<AppliedTransaction> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let now = timestamp_to_db(Utc::now());
        let mut applied = AppliedTransaction::default();

        for op in ops {
            match op {
                PersistenceOp::MergeNode {
                    id,
                    label,
                    properties,
                } => merge_node(&transaction, id, label, properties, &now)?,
                PersistenceOp::MergeRelationship {
                    source,
                    target,
                    label,
                    properties,
                } => {
                    if !merge_relationship(&transaction, source, target, label, properties, &now)? {
                        tracing::debug!(
                            source = %source,
                            target = %target,
                            label = %label,
                            "relationship endpoints missing; merge skipped"
                        );
                        applied.relationships_skipped =
                            applied.relationships_skipped.saturating_add(1);
                    }
                }
            }
            applied.statements_applied = applied.statements_applied.saturating_add(1);
        }

        transaction.commit()?;
        Ok(applied)
    }
}

#[async_trait]
impl WatermarkStore for SqliteGraphStore {
    async fn get_watermark(&self, stream_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let connection = self.open_connection()?;
        let raw = connection
            .query_row(
                "SELECT last_processed_at FROM stream_watermarks WHERE stream_id = ?1",
                params![stream_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        raw.map(|value| timestamp_from_db(&value)).transpose()
    }

    async fn set_watermark(&self, stream_id: &str, timestamp: DateTime<Utc>) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO stream_watermarks (stream_id, last_processed_at, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(stream_id) DO UPDATE SET
                last_processed_at = excluded.last_processed_at,
                updated_at = excluded.updated_at
            "#,
            params![
                stream_id,
                timestamp_to_db(timestamp),
                timestamp_to_db(Utc::now())
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl GraphRetriever for SqliteGraphStore {
    async fn retrieve_facts(&self, terms: &[String], limit: usize) -> StoreResult<Vec<GraphFact>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored = self
            .load_facts()?
            .into_iter()
            .filter_map(|fact| {
                let hits = fact.match_count(terms);
                (hits > 0).then_some((hits, fact))
            })
            .collect::<Vec<_>>();
        // Stable sort keeps the deterministic row order among equal scores.
        scored.sort_by(|left, right| right.0.cmp(&left.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, fact)| fact)
            .collect())
    }
}

fn merge_node(
    transaction: &Transaction<'_>,
    id: &str,
    label: &str,
    properties: &PropertyMap,
    now: &str,
) -> StoreResult<()> {
    let existing = transaction
        .query_row(
            "SELECT properties_json FROM graph_nodes WHERE node_id = ?1",
            params![id],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    let merged = merge_properties(existing.as_deref(), properties)?;
    transaction.execute(
        r#"
        INSERT INTO graph_nodes (node_id, label, properties_json, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(node_id) DO UPDATE SET
            label = excluded.label,
            properties_json = excluded.properties_json,
            updated_at = excluded.updated_at
        "#,
        params![id, label, merged, now],
    )?;
    Ok(())
}

/// Returns `false` when either endpoint is missing and nothing was written.
fn merge_relationship(
    transaction: &Transaction<'_>,
    source: &str,
    target: &str,
    label: &str,
    properties: &PropertyMap,
    now: &str,
) -> StoreResult<bool> {
    if !node_exists(transaction, source)? || !node_exists(transaction, target)? {
        return Ok(false);
    }

    let existing = transaction
        .query_row(
            r#"
            SELECT properties_json FROM graph_relationships
            WHERE source_id = ?1 AND target_id = ?2 AND label = ?3
            "#,
            params![source, target, label],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    let merged = merge_properties(existing.as_deref(), properties)?;
    transaction.execute(
        r#"
        INSERT INTO graph_relationships (source_id, target_id, label, properties_json, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(source_id, target_id, label) DO UPDATE SET
            properties_json = excluded.properties_json,
            updated_at = excluded.updated_at
        "#,
        params![source, target, label, merged, now],
    )?;
    Ok(true)
}

fn node_exists(transaction: &Transaction<'_>, id: &str) -> StoreResult<bool> {
    let found = transaction
        .query_row(
            "SELECT 1 FROM graph_nodes WHERE node_id = ?1",
            params![id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// `SET n += $properties`: incoming keys overwrite, other stored keys survive.
fn merge_properties(existing: Option<&str>, incoming: &PropertyMap) -> StoreResult<String> {
    let mut merged = match existing {
        Some(raw) => properties_from_db(raw)?,
        None => PropertyMap::new(),
    };
    merged.extend(
        incoming
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    Ok(serde_json::to_string(&merged)?)
}

fn properties_from_db(raw: &str) -> StoreResult<PropertyMap> {
    Ok(serde_json::from_str(raw)?)
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| GraphStoreError::InvalidPersistedValue {
            field: "last_processed_at",
            value: value.to_string(),
        })
}

fn count_from_db(field: &'static str, value: i64) -> StoreResult<usize> {
    usize::try_from(value).map_err(|_| GraphStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

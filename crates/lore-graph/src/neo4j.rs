//! Neo4j backend speaking the transactional HTTP endpoint (`/db/{database}/tx/commit`).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    AppliedTransaction, CypherStatement, GraphFact, GraphRetriever, GraphStoreError, GraphWriter,
    NodeView, PersistenceOp, PropertyMap, WatermarkStore,
};

pub const DEFAULT_NEO4J_URL: &str = "http://localhost:7474";
pub const DEFAULT_NEO4J_DATABASE: &str = "neo4j";
const MAX_ERROR_BODY_CHARS: usize = 480;

const WATERMARK_READ_CYPHER: &str =
    "MATCH (c:Channel {id: $channelId}) RETURN c.lastProcessedTimestamp AS timestamp";
const WATERMARK_WRITE_CYPHER: &str =
    "MERGE (c:Channel {id: $channelId}) SET c.lastProcessedTimestamp = $timestamp";
const RETRIEVE_CYPHER: &str = r#"
MATCH (a)-[r]->(b)
WHERE NOT a:Channel AND NOT b:Channel
WITH a, r, b,
     toLower(coalesce(a.id, '') + ' ' + type(r) + ' ' + coalesce(b.id, '') + ' ' +
       reduce(acc = '', k IN keys(a) | acc + ' ' + coalesce(toStringOrNull(a[k]), '')) + ' ' +
       reduce(acc = '', k IN keys(b) | acc + ' ' + coalesce(toStringOrNull(b[k]), ''))) AS text
WITH a, r, b, size([term IN $terms WHERE text CONTAINS term]) AS hits
WHERE hits > 0
RETURN a.id AS sourceId, head(labels(a)) AS sourceLabel, properties(a) AS sourceProps,
       type(r) AS relationship,
       b.id AS targetId, head(labels(b)) AS targetLabel, properties(b) AS targetProps
ORDER BY hits DESC, sourceId, relationship, targetId
LIMIT $limit
"#;

#[derive(Debug, Clone)]
pub struct Neo4jHttpConfig {
    pub base_url: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub request_timeout_ms: u64,
}

impl Default for Neo4jHttpConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NEO4J_URL.to_string(),
            database: DEFAULT_NEO4J_DATABASE.to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Neo4jHttpStore {
    client: reqwest::Client,
    config: Neo4jHttpConfig,
}

#[derive(Debug, Deserialize)]
struct TxCommitResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl Neo4jHttpStore {
    pub fn new(config: Neo4jHttpConfig) -> Result<Self, GraphStoreError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        Ok(Self { client, config })
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.base_url.trim_end_matches('/'),
            self.config.database
        )
    }

    /// Runs all statements in one implicit transaction; Neo4j rolls back on any error.
    async fn run_statements(
        &self,
        statements: &[CypherStatement],
    ) -> Result<Vec<Vec<Vec<Value>>>, GraphStoreError> {
        let body = json!({
            "statements": statements
                .iter()
                .map(CypherStatement::to_request_json)
                .collect::<Vec<_>>(),
        });
        let response = self
            .client
            .post(self.commit_url())
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(GraphStoreError::HttpStatus {
                status: status.as_u16(),
                body: raw.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: TxCommitResponse = serde_json::from_str(&raw)?;
        if let Some(error) = parsed.errors.into_iter().next() {
            return Err(GraphStoreError::Neo4j {
                code: error.code,
                message: error.message,
            });
        }
        Ok(parsed
            .results
            .into_iter()
            .map(|result| result.data.into_iter().map(|row| row.row).collect())
            .collect())
    }
}

#[async_trait]
impl GraphWriter for Neo4jHttpStore {
    async fn apply_transaction(
        &self,
        ops: &[PersistenceOp],
    ) -> Result<AppliedTransaction, GraphStoreError> {
        if ops.is_empty() {
            return Ok(AppliedTransaction::default());
        }
        let statements = ops.iter().map(PersistenceOp::to_cypher).collect::<Vec<_>>();
        self.run_statements(&statements).await?;
        Ok(AppliedTransaction {
            statements_applied: statements.len(),
            relationships_skipped: 0,
        })
    }
}

#[async_trait]
impl WatermarkStore for Neo4jHttpStore {
    async fn get_watermark(
        &self,
        stream_id: &str,
    ) -> Result<Option<DateTime<Utc>>, GraphStoreError> {
        let statement =
            CypherStatement::new(WATERMARK_READ_CYPHER, json!({ "channelId": stream_id }));
        let results = self.run_statements(&[statement]).await?;
        let Some(value) = results
            .into_iter()
            .next()
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.into_iter().next())
        else {
            return Ok(None);
        };
        match value {
            Value::Null => Ok(None),
            Value::String(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|parsed| Some(parsed.with_timezone(&Utc)))
                .map_err(|_| GraphStoreError::InvalidPersistedValue {
                    field: "lastProcessedTimestamp",
                    value: raw,
                }),
            other => Err(GraphStoreError::InvalidPersistedValue {
                field: "lastProcessedTimestamp",
                value: other.to_string(),
            }),
        }
    }

    async fn set_watermark(
        &self,
        stream_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GraphStoreError> {
        let statement = CypherStatement::new(
            WATERMARK_WRITE_CYPHER,
            json!({
                "channelId": stream_id,
                "timestamp": timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            }),
        );
        self.run_statements(&[statement]).await?;
        Ok(())
    }
}

#[async_trait]
impl GraphRetriever for Neo4jHttpStore {
    async fn retrieve_facts(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<GraphFact>, GraphStoreError> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let statement =
            CypherStatement::new(RETRIEVE_CYPHER, json!({ "terms": terms, "limit": limit }));
        let rows = self
            .run_statements(&[statement])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(rows.into_iter().filter_map(fact_from_row).collect())
    }
}

fn fact_from_row(row: Vec<Value>) -> Option<GraphFact> {
    let mut columns = row.into_iter();
    let source = node_from_columns(&mut columns)?;
    let relationship = columns.next()?.as_str()?.to_string();
    let target = node_from_columns(&mut columns)?;
    Some(GraphFact {
        source,
        relationship,
        target,
    })
}

fn node_from_columns(columns: &mut impl Iterator<Item = Value>) -> Option<NodeView> {
    let id = columns.next()?.as_str()?.to_string();
    let label = columns
        .next()?
        .as_str()
        .unwrap_or("Entity")
        .to_string();
    let properties = match columns.next()? {
        Value::Object(map) => map
            .into_iter()
            .filter(|(key, _)| key != "id")
            .collect::<PropertyMap>(),
        _ => PropertyMap::new(),
    };
    Some(NodeView {
        id,
        label,
        properties,
    })
}

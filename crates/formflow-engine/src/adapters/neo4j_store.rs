//! Neo4j implementation of the `GraphStore` trait

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query};
use tracing::{debug, error, info, instrument, warn};

use crate::data::errors::GraphStoreError;
use crate::data::types::{GraphNode, GraphValue};
use crate::traits::graph_store::{GraphStore, QueryOptions, QueryReply, Record};

/// Configuration for the Neo4j connection.
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub pool_size: usize,
    pub connection_retry_count: u32,
    pub connection_retry_delay: Duration,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "neo4j://localhost:7687".to_string(),
            username: "neo4j".to_string(),
            password: "password".to_string(),
            database: None,
            pool_size: 10,
            connection_retry_count: 3,
            connection_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Pooled Neo4j driver behind the [`GraphStore`] seam. Each `run_query`
/// call is an independent auto-committed transaction; the engine relies on
/// that for action side effects being visible to subsequent edges.
pub struct Neo4jGraphStore {
    graph: Arc<Graph>,
    config: Neo4jConfig,
}

impl Neo4jGraphStore {
    pub fn config(&self) -> &Neo4jConfig {
        &self.config
    }

    /// Connects with retries and verifies the connection with a probe query.
    pub async fn connect(config: Neo4jConfig) -> Result<Self, GraphStoreError> {
        let mut builder = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.username)
            .password(&config.password)
            .max_connections(config.pool_size);
        if let Some(db) = &config.database {
            builder = builder.db(db.as_str());
        }
        let neo4j_config = builder.build().map_err(|e| {
            GraphStoreError::Unavailable(format!("failed to build Neo4j config: {}", e))
        })?;

        let mut last_error = None;
        for attempt in 1..=config.connection_retry_count {
            match Graph::connect(neo4j_config.clone()).await {
                Ok(graph) => {
                    let probe = Query::new("RETURN 1 AS probe".to_string());
                    match graph.execute(probe).await {
                        Ok(_) => {
                            info!("Connected to Neo4j at {} (attempt {})", config.uri, attempt);
                            return Ok(Self {
                                graph: Arc::new(graph),
                                config,
                            });
                        }
                        Err(e) => {
                            error!("Connection probe failed: {}", e);
                            last_error = Some(e);
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to connect to Neo4j (attempt {}): {}", attempt, e);
                    last_error = Some(e);
                }
            }
            if attempt < config.connection_retry_count {
                tokio::time::sleep(config.connection_retry_delay).await;
            }
        }

        Err(GraphStoreError::Unavailable(format!(
            "failed to connect to Neo4j after {} attempts, last error: {:?}",
            config.connection_retry_count, last_error
        )))
    }

    /// Binds parameters onto the query by JSON type, mirroring what the
    /// driver accepts. Nodes and maps have no parameter representation and
    /// are skipped; authored queries reach those values through templates.
    fn bind_params(mut query: Query, params: HashMap<String, GraphValue>) -> Query {
        for (key, value) in params {
            match value.to_json() {
                serde_json::Value::Null => {}
                serde_json::Value::Bool(b) => {
                    query = query.param(&key, b);
                }
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query = query.param(&key, i);
                    } else if let Some(f) = n.as_f64() {
                        query = query.param(&key, f);
                    }
                }
                serde_json::Value::String(s) => {
                    query = query.param(&key, s.as_str());
                }
                serde_json::Value::Array(items) => {
                    if items.iter().all(|v| v.is_i64()) {
                        let ints: Vec<i64> =
                            items.iter().filter_map(|v| v.as_i64()).collect();
                        query = query.param(&key, ints);
                    } else if items.iter().all(|v| v.is_string()) {
                        let strings: Vec<String> = items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect();
                        query = query.param(&key, strings);
                    } else {
                        debug!("Skipping mixed-type list parameter: {}", key);
                    }
                }
                serde_json::Value::Object(_) => {
                    debug!("Skipping object parameter: {}", key);
                }
            }
        }
        query
    }

    /// Converts one driver row into a record. The row deserialises to a
    /// JSON object keyed by result column; node and relationship columns
    /// are then upgraded so their graph identity survives.
    fn row_to_record(row: &neo4rs::Row) -> Result<Record, GraphStoreError> {
        let value: serde_json::Value = row
            .to()
            .map_err(|e| GraphStoreError::Query(format!("failed to map row: {}", e)))?;
        let serde_json::Value::Object(columns) = value else {
            return Err(GraphStoreError::Query(
                "row did not deserialise to a column map".to_string(),
            ));
        };

        let mut record = Record::new();
        for (column, json) in columns {
            if let Ok(node) = row.get::<neo4rs::Node>(column.as_str()) {
                record.insert(column, GraphValue::Node(Self::convert_node(&node)?));
                continue;
            }
            if let Ok(rel) = row.get::<neo4rs::Relation>(column.as_str()) {
                record.insert(column, Self::convert_relation(&rel)?);
                continue;
            }
            record.insert(column, GraphValue::from_json(&json));
        }
        Ok(record)
    }

    fn convert_node(node: &neo4rs::Node) -> Result<GraphNode, GraphStoreError> {
        let props: serde_json::Value = node
            .to()
            .map_err(|e| GraphStoreError::Query(format!("failed to map node: {}", e)))?;
        let properties = match GraphValue::from_json(&props) {
            GraphValue::Map(map) => map,
            _ => HashMap::new(),
        };
        Ok(GraphNode {
            id: node.id(),
            labels: node.labels().iter().map(|l| l.to_string()).collect(),
            properties,
        })
    }

    /// Relationships surface as maps carrying identity, type and properties.
    fn convert_relation(rel: &neo4rs::Relation) -> Result<GraphValue, GraphStoreError> {
        let props: serde_json::Value = rel
            .to()
            .map_err(|e| GraphStoreError::Query(format!("failed to map relationship: {}", e)))?;
        let mut map = HashMap::from([
            ("id".to_string(), GraphValue::Int(rel.id())),
            ("type".to_string(), GraphValue::from(rel.typ())),
            ("startNodeId".to_string(), GraphValue::Int(rel.start_node_id())),
            ("endNodeId".to_string(), GraphValue::Int(rel.end_node_id())),
        ]);
        map.insert("properties".to_string(), GraphValue::from_json(&props));
        Ok(GraphValue::Map(map))
    }

    fn classify(err: neo4rs::Error) -> GraphStoreError {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("connection")
            || lowered.contains("io error")
            || lowered.contains("authentication")
        {
            GraphStoreError::Unavailable(message)
        } else {
            GraphStoreError::Query(message)
        }
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    #[instrument(skip(self, params), fields(row_cap = options.row_cap))]
    async fn run_query(
        &self,
        statement: &str,
        params: HashMap<String, GraphValue>,
        options: QueryOptions,
    ) -> Result<QueryReply, GraphStoreError> {
        debug!("Executing query: {}", statement);
        let query = Self::bind_params(Query::new(statement.to_string()), params);

        let deadline = Instant::now() + options.timeout;
        let mut stream = match tokio::time::timeout(options.timeout, self.graph.execute(query))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Self::classify(e)),
            Err(_) => return Err(GraphStoreError::Timeout),
        };

        let mut rows = Vec::new();
        let mut truncated = false;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GraphStoreError::Timeout);
            }
            let next = match tokio::time::timeout(remaining, stream.next()).await {
                Ok(next) => next,
                Err(_) => return Err(GraphStoreError::Timeout),
            };
            match next {
                Ok(Some(row)) => {
                    if rows.len() >= options.row_cap {
                        warn!(
                            "Query exceeded row cap of {}, truncating result",
                            options.row_cap
                        );
                        truncated = true;
                        break;
                    }
                    rows.push(Self::row_to_record(&row)?);
                }
                Ok(None) => break,
                Err(e) => return Err(Self::classify(e)),
            }
        }

        Ok(QueryReply { rows, truncated })
    }
}

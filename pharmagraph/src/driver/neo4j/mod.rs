//! Neo4j graph store.
//!
//! Uses `neo4rs` 0.8 for async, pooled Bolt connections. Every write call
//! runs in one explicit transaction built from the parameterized queries in
//! [`crate::driver::query`].

use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph, Query, Txn};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::query::{self as q, ParameterizedQuery, Predicate, QueryParam};
use super::{GraphStore, WriteSummary};
use crate::edges::{RelationshipType, ResolvedRelationship};
use crate::errors::StoreError;
use crate::nodes::{Label, PropertyValue, StagedNode};
use crate::types::StoreConfig;

pub struct Neo4jGraphStore {
    graph: Graph,
    uri: String,
}

impl Neo4jGraphStore {
    /// Open the connection pool. Fails within `connect_timeout`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let neo_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .build()
            .map_err(|e| StoreError::Fatal(format!("invalid Neo4j configuration: {e}")))?;

        let timeout = config.connect_timeout();
        let graph = tokio::time::timeout(timeout, Graph::connect(neo_config))
            .await
            .map_err(|_| StoreError::Timeout {
                operation: "connect".to_string(),
                after_ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| classify("connect", e))?;

        info!(uri = %config.uri, database = %config.database, "connected to Neo4j");
        Ok(Self {
            graph,
            uri: config.uri.clone(),
        })
    }

    /// Execute `pq` inside `txn` and sum the integer `column` over all rows.
    async fn scalar(txn: &mut Txn, pq: &ParameterizedQuery, column: &str) -> Result<i64, StoreError> {
        let mut stream = txn
            .execute(to_query(pq))
            .await
            .map_err(|e| classify("execute", e))?;
        let mut total = 0;
        while let Some(row) = stream
            .next(txn.handle())
            .await
            .map_err(|e| classify("fetch", e))?
        {
            total += row.get::<i64>(column).unwrap_or(0);
        }
        Ok(total)
    }

    async fn finish<T>(txn: Txn, operation: &str, result: Result<T, StoreError>) -> Result<T, StoreError> {
        match result {
            Ok(value) => {
                txn.commit().await.map_err(|e| classify(operation, e))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(operation, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn count(&self, pq: ParameterizedQuery) -> Result<u64, StoreError> {
        let mut stream = self
            .graph
            .execute(to_query(&pq))
            .await
            .map_err(|e| classify("count", e))?;
        let row = stream.next().await.map_err(|e| classify("count", e))?;
        Ok(row.and_then(|r| r.get::<i64>("count").ok()).unwrap_or(0).max(0) as u64)
    }
}

impl GraphStore for Neo4jGraphStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| classify("ping", e))
    }

    async fn write_nodes(&self, nodes: &[StagedNode]) -> Result<WriteSummary, StoreError> {
        let mut by_label: BTreeMap<Label, Vec<&StagedNode>> = BTreeMap::new();
        for node in nodes {
            by_label.entry(node.label).or_default().push(node);
        }

        let mut txn = self.graph.start_txn().await.map_err(|e| classify("begin", e))?;
        let result = async {
            let mut written = 0;
            for (label, group) in &by_label {
                let conflicts = Self::scalar(&mut txn, &q::node_conflicts(*label, group)?, "conflicts").await?;
                if conflicts > 0 {
                    return Err(StoreError::Constraint(format!(
                        "{conflicts} {label} canonical id(s) already bound to another fingerprint"
                    )));
                }
                written += Self::scalar(&mut txn, &q::node_upsert(*label, group)?, "written").await?;
            }
            Ok(written.max(0) as usize)
        }
        .await;

        let written = Self::finish(txn, "write_nodes", result).await?;
        debug!(written, "node batch committed");
        Ok(WriteSummary { written, dangling: 0 })
    }

    async fn write_relationships(
        &self,
        relationships: &[ResolvedRelationship],
    ) -> Result<WriteSummary, StoreError> {
        let mut by_type: BTreeMap<RelationshipType, Vec<&ResolvedRelationship>> = BTreeMap::new();
        for rel in relationships {
            by_type.entry(rel.rel_type).or_default().push(rel);
        }

        let mut txn = self.graph.start_txn().await.map_err(|e| classify("begin", e))?;
        let result = async {
            let mut written = 0;
            for (rel_type, group) in &by_type {
                written += Self::scalar(&mut txn, &q::relationship_upsert(*rel_type, group)?, "written").await?;
            }
            Ok(written.max(0) as usize)
        }
        .await;

        let written = Self::finish(txn, "write_relationships", result).await?;
        let dangling = relationships.len().saturating_sub(written);
        debug!(written, dangling, "relationship batch committed");
        Ok(WriteSummary { written, dangling })
    }

    async fn count_nodes(&self, label: Option<Label>, filter: &[Predicate]) -> Result<u64, StoreError> {
        self.count(q::count_nodes(label, filter)?).await
    }

    async fn count_relationships(&self, rel_type: Option<RelationshipType>) -> Result<u64, StoreError> {
        self.count(q::count_relationships(rel_type)?).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        // The pool closes its connections when dropped.
        info!(uri = %self.uri, "closing Neo4j store");
        Ok(())
    }
}

// ── Conversions ──────────────────────────────────────────────────────────────

fn to_query(pq: &ParameterizedQuery) -> Query {
    pq.params
        .iter()
        .fold(query(&pq.text), |acc, (name, value)| acc.param(name, to_bolt(value)))
}

fn to_bolt(param: &QueryParam) -> BoltType {
    match param {
        QueryParam::Value(value) => value_to_bolt(value),
        QueryParam::Map(entries) => {
            let mut map = BoltMap::new();
            for (key, value) in entries {
                map.put(BoltString::from(key.as_str()), to_bolt(value));
            }
            BoltType::Map(map)
        }
        QueryParam::List(items) => BoltType::List(BoltList::from(items.iter().map(to_bolt).collect::<Vec<_>>())),
    }
}

fn value_to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Null => BoltType::Null(BoltNull),
        PropertyValue::Bool(b) => BoltType::from(*b),
        PropertyValue::Int(i) => BoltType::from(*i),
        PropertyValue::Float(x) => BoltType::from(*x),
        PropertyValue::Text(s) => BoltType::from(s.as_str()),
        PropertyValue::List(items) => {
            BoltType::List(BoltList::from(items.iter().map(value_to_bolt).collect::<Vec<_>>()))
        }
    }
}

/// Map a driver error onto the store taxonomy. Connection failures and
/// server-side transient errors are retryable; everything else is not.
fn classify(operation: &str, error: neo4rs::Error) -> StoreError {
    let message = error.to_string();
    match error {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            StoreError::transient(operation, message)
        }
        _ if message.contains("TransientError")
            || message.contains("DeadlockDetected")
            || message.contains("ServiceUnavailable") =>
        {
            StoreError::transient(operation, message)
        }
        _ if message.contains("ConstraintValidationFailed") => StoreError::Constraint(message),
        _ => StoreError::Fatal(format!("{operation}: {message}")),
    }
}

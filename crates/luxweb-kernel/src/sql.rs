//! SQL collaborator interface.
//!
//! The connection pool itself is an external collaborator; the core only
//! needs the narrow [`QueryExecutor`] contract. When SQL is disabled the
//! runtime wires in [`NullQueryExecutor`], which resolves every query to an
//! empty row set.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by a query executor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueryError {
    #[error("SQL error: {0}")]
    Sql(String),

    #[error("SQL connection unavailable: {0}")]
    Unavailable(String),
}

/// `query(sql, params) -> rows` as the core consumes it. Rows are JSON
/// objects keyed by column name.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, QueryError>;
}

/// No-op stub used when no SQL connection is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullQueryExecutor;

#[async_trait]
impl QueryExecutor for NullQueryExecutor {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Value>, QueryError> {
        Ok(Vec::new())
    }
}

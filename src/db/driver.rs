//! Driver seam: how a connection is opened and what it must support.

use crate::error::DbError;
use crate::sql::Placeholder;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// One result row: column name to value.
pub type Row = Map<String, Value>;

/// Opens raw connections. Shared by every request.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RawConnection>, DbError>;
}

/// A single open connection. Statements run inside an implicit transaction
/// that lasts until `commit` or `rollback`.
#[async_trait]
pub trait RawConnection: Send {
    /// Stable identifier used in open/close logs.
    fn id(&self) -> &str;

    fn placeholder(&self) -> Placeholder;

    async fn fetch(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DbError>;

    async fn fetch_one(&mut self, sql: &str, args: &[Value]) -> Result<Option<Row>, DbError> {
        Ok(self.fetch(sql, args).await?.into_iter().next())
    }

    /// Returns the number of affected rows.
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

/// Process-wide database handle: the connector plus statement profiling threshold.
#[derive(Clone)]
pub struct Engine {
    connector: Arc<dyn Connector>,
    slow_query: Duration,
}

impl Engine {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Engine {
            connector,
            slow_query: Duration::from_millis(100),
        }
    }

    pub fn with_slow_query(mut self, threshold: Duration) -> Self {
        self.slow_query = threshold;
        self
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub fn slow_query(&self) -> Duration {
        self.slow_query
    }
}

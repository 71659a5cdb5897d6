//! Per-request database state: at most one lazily opened connection and a
//! transaction depth counter. Scopes are entered and left with explicit paired
//! calls; only the outermost scope owns teardown and commit/rollback.

use crate::db::{Engine, RawConnection, Row};
use crate::error::DbError;
use crate::sql::translate;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Connector;

/// Holds the raw connection once the first statement needs it.
struct LazyConnection {
    connector: Arc<dyn Connector>,
    raw: Option<Box<dyn RawConnection>>,
}

impl LazyConnection {
    fn new(connector: Arc<dyn Connector>) -> Self {
        LazyConnection { connector, raw: None }
    }

    fn is_open(&self) -> bool {
        self.raw.is_some()
    }

    async fn cursor(&mut self) -> Result<&mut dyn RawConnection, DbError> {
        if self.raw.is_none() {
            let conn = self.connector.connect().await?;
            tracing::info!(connection_id = conn.id(), "open connection");
            self.raw = Some(conn);
        }
        match self.raw.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(DbError::NoConnection),
        }
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.raw.as_deref_mut().ok_or(DbError::NoConnection)?.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.raw.as_deref_mut().ok_or(DbError::NoConnection)?.rollback().await
    }

    async fn cleanup(&mut self) {
        if let Some(conn) = self.raw.take() {
            let id = conn.id().to_string();
            tracing::info!(connection_id = %id, "close connection");
            if let Err(e) = conn.close().await {
                tracing::warn!(connection_id = %id, error = %e, "close connection failed");
            }
        }
    }
}

/// Returned by [`DbContext::connect`]; hand it back to [`DbContext::release`].
#[must_use = "pass the scope to DbContext::release"]
#[derive(Debug)]
pub struct ConnectionScope {
    owner: bool,
}

impl ConnectionScope {
    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

/// Returned by [`DbContext::begin`]; hand it back to [`DbContext::finish`] with the body's result.
#[must_use = "pass the scope to DbContext::finish"]
#[derive(Debug)]
pub struct TransactionScope {
    owns_connection: bool,
    depth: usize,
}

impl TransactionScope {
    /// True for the outermost scope, the only one that commits or rolls back.
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }
}

pub struct DbContext {
    engine: Engine,
    active: Option<LazyConnection>,
    transactions: usize,
}

impl DbContext {
    pub fn new(engine: Engine) -> Self {
        DbContext {
            engine,
            active: None,
            transactions: 0,
        }
    }

    /// True while some connection scope is open (a raw connection may not be yet).
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// True once a raw connection has actually been opened.
    pub fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(LazyConnection::is_open)
    }

    pub fn transaction_depth(&self) -> usize {
        self.transactions
    }

    /// Enter a connection scope, activating the context if nothing else did.
    pub fn connect(&mut self) -> ConnectionScope {
        if self.active.is_some() {
            return ConnectionScope { owner: false };
        }
        self.active = Some(LazyConnection::new(self.engine.connector()));
        self.transactions = 0;
        ConnectionScope { owner: true }
    }

    /// Leave a connection scope; the owning scope closes the connection.
    pub async fn release(&mut self, scope: ConnectionScope) {
        if scope.owner {
            self.cleanup().await;
        }
    }

    /// Close and discard the connection. A second call is a no-op.
    pub async fn cleanup(&mut self) {
        if let Some(mut conn) = self.active.take() {
            conn.cleanup().await;
        }
        self.transactions = 0;
    }

    /// Statement handle, opening the raw connection on first use.
    pub async fn cursor(&mut self) -> Result<&mut dyn RawConnection, DbError> {
        match self.active.as_mut() {
            Some(conn) => conn.cursor().await,
            None => Err(DbError::NoConnection),
        }
    }

    pub async fn commit(&mut self) -> Result<(), DbError> {
        match self.active.as_mut() {
            Some(conn) => conn.commit().await,
            None => Err(DbError::NoConnection),
        }
    }

    pub async fn rollback(&mut self) -> Result<(), DbError> {
        match self.active.as_mut() {
            Some(conn) => conn.rollback().await,
            None => Err(DbError::NoConnection),
        }
    }

    /// Enter a transaction scope. Nested scopes join the enclosing transaction.
    pub fn begin(&mut self) -> TransactionScope {
        let scope = self.connect();
        self.transactions += 1;
        if self.transactions == 1 {
            tracing::info!("begin transaction");
        } else {
            tracing::debug!(depth = self.transactions, "join current transaction");
        }
        TransactionScope {
            owns_connection: scope.owner,
            depth: self.transactions,
        }
    }

    /// Leave a transaction scope with the outcome of its body. The outermost
    /// scope commits on `Ok` and rolls back on `Err`; a failed commit is rolled
    /// back and its error returned. The body's error is always returned as is.
    pub async fn finish<T, E>(&mut self, scope: TransactionScope, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        self.transactions = self.transactions.saturating_sub(1);
        let outcome = if self.transactions == 0 && scope.is_outermost() {
            if result.is_ok() {
                self.commit_transaction().await
            } else {
                self.rollback_transaction().await;
                Ok(())
            }
        } else {
            Ok(())
        };
        if scope.owns_connection {
            self.cleanup().await;
        }
        match (result, outcome) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), _) => Err(e),
        }
    }

    async fn commit_transaction(&mut self) -> Result<(), DbError> {
        let Some(conn) = self.active.as_mut() else {
            return Err(DbError::NoConnection);
        };
        if !conn.is_open() {
            tracing::debug!("no statement issued, nothing to commit");
            return Ok(());
        }
        tracing::info!("commit transaction");
        if let Err(e) = conn.commit().await {
            tracing::warn!(error = %e, "commit failed, rolling back");
            match conn.rollback().await {
                Ok(()) => tracing::warn!("rollback after failed commit ok"),
                Err(re) => tracing::error!(commit_error = %e, rollback_error = %re, "rollback after failed commit failed"),
            }
            return Err(e);
        }
        tracing::debug!("commit ok");
        Ok(())
    }

    async fn rollback_transaction(&mut self) {
        let Some(conn) = self.active.as_mut() else {
            return;
        };
        if !conn.is_open() {
            return;
        }
        tracing::warn!("rollback transaction");
        match conn.rollback().await {
            Ok(()) => tracing::debug!("rollback ok"),
            Err(e) => tracing::error!(error = %e, "rollback failed"),
        }
    }

    /// Run a query and return every row.
    pub async fn select(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DbError> {
        let scope = self.connect();
        let result = self.fetch(sql, args, false).await;
        self.release(scope).await;
        result
    }

    /// Run a query and return its first row, if any.
    pub async fn select_one(&mut self, sql: &str, args: &[Value]) -> Result<Option<Row>, DbError> {
        let scope = self.connect();
        let result = self.fetch(sql, args, true).await;
        self.release(scope).await;
        result.map(|rows| rows.into_iter().next())
    }

    /// Run a single-column aggregate such as `count(...)`.
    pub async fn select_int(&mut self, sql: &str, args: &[Value]) -> Result<i64, DbError> {
        let row = self.select_one(sql, args).await?.ok_or(DbError::EmptyResult)?;
        if row.len() != 1 {
            return Err(DbError::MultiColumn { found: row.len() });
        }
        let value = row.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// Run a write. Outside a transaction it commits immediately (and rolls
    /// back on failure); inside one it is left for the outermost scope.
    pub async fn update(&mut self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let scope = self.connect();
        let result = self.write(sql, args).await;
        self.release(scope).await;
        result
    }

    async fn fetch(&mut self, sql: &str, args: &[Value], first: bool) -> Result<Vec<Row>, DbError> {
        let threshold = self.engine.slow_query();
        let conn = self.cursor().await?;
        let sql = translate(sql, conn.placeholder());
        tracing::debug!(sql = %sql, args = ?args, "query");
        let started = Instant::now();
        let rows = if first {
            conn.fetch_one(&sql, args).await.map(|r| r.into_iter().collect())
        } else {
            conn.fetch(&sql, args).await
        };
        profile(started, threshold, &sql);
        rows
    }

    async fn write(&mut self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let autocommit = self.transactions == 0;
        let threshold = self.engine.slow_query();
        let conn = self.cursor().await?;
        let sql = translate(sql, conn.placeholder());
        tracing::debug!(sql = %sql, args = ?args, "execute");
        let started = Instant::now();
        let result = conn.execute(&sql, args).await;
        profile(started, threshold, &sql);
        if !autocommit {
            return result;
        }
        let result = match result {
            Ok(n) => {
                tracing::debug!("auto commit");
                conn.commit().await.map(|()| n)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "autocommit write failed, rolling back");
            if let Err(re) = conn.rollback().await {
                tracing::error!(error = %re, "rollback failed");
            }
        }
        result
    }
}

fn profile(started: Instant, threshold: Duration, sql: &str) {
    let elapsed = started.elapsed();
    if elapsed > threshold {
        tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, sql = %sql, "slow statement");
    } else {
        tracing::trace!(elapsed_ms = elapsed.as_millis() as u64, "statement done");
    }
}

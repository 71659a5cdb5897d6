//! PostgreSQL driver over a single unpooled `sqlx::PgConnection`.

use crate::config::DbSettings;
use crate::db::{Connector, Engine, RawConnection, Row};
use crate::error::DbError;
use crate::sql::Placeholder;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgTypeInfo, Postgres};
use sqlx::query::Query;
use sqlx::{Connection, Database, Type};
use std::sync::Arc;
use std::time::Duration;

pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(settings: &DbSettings) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .database(&settings.database);
        if !settings.password.is_empty() {
            options = options.password(&settings.password);
        }
        if !settings.options.is_empty() {
            options = options.options(settings.options.iter());
        }
        PgConnector { options }
    }
}

/// Engine backed by PostgreSQL, configured from settings.
pub fn engine(settings: &DbSettings) -> Engine {
    tracing::info!(host = %settings.host, port = settings.port, database = %settings.database, "init postgres engine");
    Engine::new(Arc::new(PgConnector::new(settings))).with_slow_query(Duration::from_millis(settings.slow_query_ms))
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn RawConnection>, DbError> {
        let conn = PgConnection::connect_with(&self.options).await?;
        Ok(Box::new(PgRawConnection {
            id: uuid::Uuid::new_v4().to_string(),
            conn,
            in_transaction: false,
        }))
    }
}

/// Runs every statement inside an explicit transaction opened on demand,
/// so nothing is visible to other sessions before `commit`.
struct PgRawConnection {
    id: String,
    conn: PgConnection,
    in_transaction: bool,
}

impl PgRawConnection {
    async fn begin_if_needed(&mut self) -> Result<(), DbError> {
        if !self.in_transaction {
            sqlx::query("BEGIN").execute(&mut self.conn).await?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

#[async_trait]
impl RawConnection for PgRawConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(&self) -> Placeholder {
        Placeholder::Numbered
    }

    async fn fetch(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DbError> {
        self.begin_if_needed().await?;
        let rows = bind_all(sqlx::query(sql), args).fetch_all(&mut self.conn).await?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn fetch_one(&mut self, sql: &str, args: &[Value]) -> Result<Option<Row>, DbError> {
        self.begin_if_needed().await?;
        let row = bind_all(sqlx::query(sql), args).fetch_optional(&mut self.conn).await?;
        Ok(row.as_ref().map(row_to_map))
    }

    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        self.begin_if_needed().await?;
        let done = bind_all(sqlx::query(sql), args).execute(&mut self.conn).await?;
        Ok(done.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            // A failed COMMIT still ends the transaction server-side.
            self.in_transaction = false;
            sqlx::query("COMMIT").execute(&mut self.conn).await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.in_transaction {
            self.in_transaction = false;
            sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.conn.close().await?;
        Ok(())
    }
}

fn bind_all<'q>(mut query: Query<'q, Postgres, PgArguments>, args: &[Value]) -> Query<'q, Postgres, PgArguments> {
    for a in args {
        query = query.bind(PgArg::from_json(a));
    }
    query
}

/// A JSON value bound with its natural PostgreSQL type. NULL is sent as
/// `unknown` so the server infers the column type.
#[derive(Clone, Debug, PartialEq)]
enum PgArg {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl PgArg {
    fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgArg::Null,
            Value::Bool(b) => PgArg::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgArg::Int(i),
                None => PgArg::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => PgArg::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => PgArg::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgArg {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgArg::Null => Ok(IsNull::Yes),
            PgArg::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgArg::Int(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgArg::Float(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgArg::Text(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            PgArg::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgArg::Null => PgTypeInfo::with_name("unknown"),
            PgArg::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgArg::Int(_) => <i64 as Type<Postgres>>::type_info(),
            PgArg::Float(_) => <f64 as Type<Postgres>>::type_info(),
            PgArg::Text(_) => <String as Type<Postgres>>::type_info(),
            PgArg::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgArg {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("text")
    }
}

fn row_to_map(row: &sqlx::postgres::PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

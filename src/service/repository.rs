//! Generic entity reads and writes over a [`DbContext`].

use crate::db::{DbContext, Row};
use crate::error::{DbError, MappingError};
use crate::model::{Model, TableMapping};
use crate::page::Page;
use crate::sql;
use serde::ser::Error as _;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

/// Reads and writes one entity type. Cheap to clone; the mapping is shared.
pub struct Repository<M> {
    table: Arc<TableMapping>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Repository {
            table: self.table.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> Repository<M> {
    /// Build the mapping once; fails if the model declares no (or two) primary keys.
    pub fn new() -> Result<Self, MappingError> {
        let table = M::mapping()?;
        tracing::info!(
            table = table.table_name(),
            primary_key = table.primary_key().name(),
            fields = table.fields().len(),
            "registered table mapping"
        );
        Ok(Repository {
            table: Arc::new(table),
            _model: PhantomData,
        })
    }

    pub fn table(&self) -> &TableMapping {
        &self.table
    }

    pub async fn get(&self, db: &mut DbContext, pk: impl Into<Value>) -> Result<Option<M>, DbError> {
        let row = db.select_one(&sql::select_by_pk(&self.table), &[pk.into()]).await?;
        row.map(decode).transpose()
    }

    /// First row matching a raw fragment such as `WHERE email = ?`.
    pub async fn find_first(&self, db: &mut DbContext, clause: &str, args: &[Value]) -> Result<Option<M>, DbError> {
        let row = db.select_one(&sql::select_where(&self.table, clause), args).await?;
        row.map(decode).transpose()
    }

    pub async fn find_all(&self, db: &mut DbContext) -> Result<Vec<M>, DbError> {
        self.find_by(db, "", &[]).await
    }

    pub async fn find_by(&self, db: &mut DbContext, clause: &str, args: &[Value]) -> Result<Vec<M>, DbError> {
        let rows = db.select(&sql::select_where(&self.table, clause), args).await?;
        rows.into_iter().map(decode).collect()
    }

    /// One page of rows; `clause` may filter and order but must not limit.
    pub async fn find_page(
        &self,
        db: &mut DbContext,
        page: &Page,
        clause: &str,
        args: &[Value],
    ) -> Result<Vec<M>, DbError> {
        if page.limit() == 0 {
            return Ok(Vec::new());
        }
        let clause = format!("{} LIMIT ? OFFSET ?", clause.trim());
        let mut args = args.to_vec();
        args.push(Value::from(page.limit()));
        args.push(Value::from(page.offset()));
        self.find_by(db, &clause, &args).await
    }

    pub async fn count_all(&self, db: &mut DbContext) -> Result<i64, DbError> {
        self.count_by(db, "", &[]).await
    }

    pub async fn count_by(&self, db: &mut DbContext, clause: &str, args: &[Value]) -> Result<i64, DbError> {
        db.select_int(&sql::count_where(&self.table, clause), args).await
    }

    /// Insert every insertable field. Absent fields are filled from their defaults
    /// and written back to `entity`, so generated values are visible afterwards.
    pub async fn insert(&self, db: &mut DbContext, entity: &mut M) -> Result<(), DbError> {
        entity.pre_insert();
        let mut values = to_object(entity)?;
        for f in self.table.insertable() {
            if is_absent(&values, f.name()) {
                values.insert(f.name().to_string(), f.default());
            }
        }
        let stmt = sql::insert(&self.table, &values)?;
        db.update(&stmt.sql, &stmt.args).await?;
        *entity = serde_json::from_value(Value::Object(values))?;
        Ok(())
    }

    /// Update every updatable field by primary key. Absent fields take their
    /// defaults, which are recorded onto `entity`. Returns the affected row count.
    pub async fn update(&self, db: &mut DbContext, entity: &mut M) -> Result<u64, DbError> {
        entity.pre_update();
        let mut values = to_object(entity)?;
        self.require_primary_key(&values)?;
        for f in self.table.updatable() {
            if is_absent(&values, f.name()) {
                values.insert(f.name().to_string(), f.default());
            }
        }
        let stmt = sql::update(&self.table, &values)?;
        let n = db.update(&stmt.sql, &stmt.args).await?;
        *entity = serde_json::from_value(Value::Object(values))?;
        Ok(n)
    }

    /// Delete by primary key only. Returns the affected row count.
    pub async fn delete(&self, db: &mut DbContext, entity: &mut M) -> Result<u64, DbError> {
        entity.pre_delete();
        let values = to_object(entity)?;
        let pk = self.require_primary_key(&values)?;
        let stmt = sql::delete(&self.table, pk);
        db.update(&stmt.sql, &stmt.args).await
    }

    /// Create the table if it does not exist yet.
    pub async fn create_table(&self, db: &mut DbContext) -> Result<(), DbError> {
        db.update(&sql::create_table(&self.table), &[]).await?;
        Ok(())
    }

    fn require_primary_key<'a>(&self, values: &'a Map<String, Value>) -> Result<&'a Value, DbError> {
        let pk = self.table.primary_key().name();
        match values.get(pk) {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(DbError::MissingPrimaryKey {
                table: self.table.table_name().to_string(),
            }),
        }
    }
}

/// A field is absent when its key is missing or null (an unset `Option`).
fn is_absent(values: &Map<String, Value>, field: &str) -> bool {
    values.get(field).map_or(true, Value::is_null)
}

fn to_object<M: Model>(entity: &M) -> Result<Map<String, Value>, DbError> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(DbError::Codec(serde_json::Error::custom(format!(
            "entity must serialize to an object, got {}",
            other
        )))),
    }
}

fn decode<M: Model>(row: Row) -> Result<M, DbError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

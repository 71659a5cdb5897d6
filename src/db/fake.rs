//! Recording in-memory connector for tests.

use crate::db::{Connector, Engine, RawConnection, Row};
use crate::error::DbError;
use crate::sql::Placeholder;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Shared {
    events: Vec<String>,
    results: VecDeque<Vec<Row>>,
    opened: usize,
}

#[derive(Clone)]
pub struct FakeConnector {
    shared: Arc<Mutex<Shared>>,
    placeholder: Placeholder,
    fail_commit: bool,
    fail_rollback: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        FakeConnector {
            shared: Arc::default(),
            placeholder: Placeholder::Question,
            fail_commit: false,
            fail_rollback: false,
        }
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn engine(&self) -> Engine {
        Engine::new(Arc::new(self.clone()))
    }

    /// Queue the rows returned by the next fetch.
    pub fn push_rows(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|v| match v {
                Value::Object(m) => m,
                other => panic!("row must be an object: {}", other),
            })
            .collect();
        self.shared.lock().unwrap().results.push_back(rows);
    }

    pub fn events(&self) -> Vec<String> {
        self.shared.lock().unwrap().events.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("execute ") || e.starts_with("fetch "))
            .collect()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn RawConnection>, DbError> {
        let mut shared = self.shared.lock().unwrap();
        shared.opened += 1;
        let id = format!("c{}", shared.opened);
        shared.events.push(format!("open {}", id));
        Ok(Box::new(FakeConnection {
            id,
            shared: self.shared.clone(),
            placeholder: self.placeholder,
            fail_commit: self.fail_commit,
            fail_rollback: self.fail_rollback,
        }))
    }
}

struct FakeConnection {
    id: String,
    shared: Arc<Mutex<Shared>>,
    placeholder: Placeholder,
    fail_commit: bool,
    fail_rollback: bool,
}

impl FakeConnection {
    fn record(&self, event: String) {
        self.shared.lock().unwrap().events.push(event);
    }

    fn statement(kind: &str, sql: &str, args: &[Value]) -> String {
        if args.is_empty() {
            format!("{} {}", kind, sql)
        } else {
            let args: Vec<String> = args.iter().map(Value::to_string).collect();
            format!("{} {} [{}]", kind, sql, args.join(", "))
        }
    }
}

#[async_trait]
impl RawConnection for FakeConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn placeholder(&self) -> Placeholder {
        self.placeholder
    }

    async fn fetch(&mut self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DbError> {
        self.record(Self::statement("fetch", sql, args));
        Ok(self.shared.lock().unwrap().results.pop_front().unwrap_or_default())
    }

    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        self.record(Self::statement("execute", sql, args));
        Ok(1)
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if self.fail_commit {
            self.record("commit failed".into());
            return Err(DbError::Driver(sqlx::Error::Protocol("commit rejected".into())));
        }
        self.record("commit".into());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.fail_rollback {
            self.record("rollback failed".into());
            return Err(DbError::Driver(sqlx::Error::Protocol("rollback rejected".into())));
        }
        self.record("rollback".into());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.record(format!("close {}", self.id));
        Ok(())
    }
}

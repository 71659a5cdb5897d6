//! Settings with defaults; every section can be partially overridden.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    pub db: DbSettings,
    pub server: ServerSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Extra driver options (e.g. `application_name`).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Statements slower than this are logged at warn level.
    pub slow_query_ms: u64,
}

impl Default for DbSettings {
    fn default() -> Self {
        DbSettings {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "postgres".into(),
            password: String::new(),
            database: "awesome".into(),
            options: BTreeMap::new(),
            slow_query_ms: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Directory served under `/static/`.
    pub document_root: PathBuf,
    pub max_body_bytes: usize,
    pub serve_static: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "127.0.0.1".into(),
            port: 9000,
            document_root: PathBuf::from("."),
            max_body_bytes: 1024 * 1024,
            serve_static: true,
        }
    }
}

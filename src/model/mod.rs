//! Declarative entity mappings.

mod field;
mod table;

pub use field::{DefaultValue, FieldSpec};
pub use table::{TableBuilder, TableMapping};

use crate::error::MappingError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A persisted entity type. Fields the instance may lack at write time should be
/// `Option`s marked `#[serde(skip_serializing_if = "Option::is_none")]` so the
/// repository can fill them from their defaults.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    /// Column layout; called once when the repository for this type is created.
    fn mapping() -> Result<TableMapping, MappingError>;

    fn pre_insert(&mut self) {}

    fn pre_update(&mut self) {}

    fn pre_delete(&mut self) {}
}

/// Sortable unique id: 15-digit millisecond timestamp, uuid4 hex, `000` suffix (50 chars).
pub fn next_id() -> String {
    format!(
        "{:015}{}000",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

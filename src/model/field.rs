//! Column descriptions for a persisted entity.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Value assigned to a field the entity does not carry at write time.
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    /// Called once per write, e.g. an id generator.
    Generated(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Static(v) => v.clone(),
            DefaultValue::Generated(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(v) => write!(f, "Static({})", v),
            DefaultValue::Generated(_) => f.write_str("Generated(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    name: String,
    sql_type: String,
    default: DefaultValue,
    primary_key: bool,
    nullable: bool,
    updatable: bool,
    insertable: bool,
}

impl FieldSpec {
    /// Field with a NULL default: not nullable, insertable and updatable.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        FieldSpec {
            name: name.into(),
            sql_type: sql_type.into(),
            default: DefaultValue::Static(Value::Null),
            primary_key: false,
            nullable: false,
            updatable: true,
            insertable: true,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        FieldSpec::new(name, "varchar(255)").default_value("")
    }

    pub fn integer(name: impl Into<String>) -> Self {
        FieldSpec::new(name, "bigint").default_value(0)
    }

    pub fn float(name: impl Into<String>) -> Self {
        FieldSpec::new(name, "double precision").default_value(0.0)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        FieldSpec::new(name, "bool").default_value(false)
    }

    pub fn text(name: impl Into<String>) -> Self {
        FieldSpec::new(name, "text").default_value("")
    }

    /// Nullable `bytea` defaulting to NULL.
    pub fn blob(name: impl Into<String>) -> Self {
        FieldSpec::new(name, "bytea").nullable(true)
    }

    /// Optimistic-locking counter column.
    pub fn version(name: impl Into<String>) -> Self {
        FieldSpec::new(name, "bigint").default_value(0)
    }

    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = sql_type.into();
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultValue::Static(value.into());
        self
    }

    pub fn default_with<F>(mut self, generate: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = DefaultValue::Generated(Arc::new(generate));
        self
    }

    /// Mark as the primary key: not nullable and never updated.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self.updatable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    pub fn insertable(mut self, insertable: bool) -> Self {
        self.insertable = insertable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ddl(&self) -> &str {
        &self.sql_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    pub fn is_insertable(&self) -> bool {
        self.insertable
    }

    /// Resolve the default, calling the generator if there is one.
    pub fn default(&self) -> Value {
        self.default.resolve()
    }

    /// Primary keys are never nullable nor updatable; returns true if anything changed.
    pub(crate) fn force_primary_key_flags(&mut self) -> bool {
        let changed = self.nullable || self.updatable;
        self.nullable = false;
        self.updatable = false;
        changed
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{},default({:?})", self.name, self.sql_type, self.default)?;
        if self.nullable {
            f.write_str("N")?;
        }
        if self.updatable {
            f.write_str("U")?;
        }
        if self.insertable {
            f.write_str("I")?;
        }
        f.write_str(">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn kinds_carry_their_type_defaults() {
        assert_eq!(FieldSpec::string("name").ddl(), "varchar(255)");
        assert_eq!(FieldSpec::string("name").default(), Value::from(""));
        assert_eq!(FieldSpec::integer("n").default(), Value::from(0));
        assert_eq!(FieldSpec::boolean("admin").default(), Value::Bool(false));
    }

    #[test]
    fn float_is_double_precision() {
        let field = FieldSpec::float("created_at");
        assert_eq!(field.ddl(), "double precision");
        assert_eq!(field.default(), Value::from(0.0));
    }

    #[test]
    fn blob_defaults_to_null_and_is_nullable() {
        let field = FieldSpec::blob("avatar");
        assert_eq!(field.ddl(), "bytea");
        assert_eq!(field.default(), Value::Null);
        assert!(field.is_nullable());
    }

    #[test]
    fn generated_default_is_called_per_resolution() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        let field = FieldSpec::string("id").default_with(move || Value::from(c.fetch_add(1, Ordering::SeqCst)));
        assert_eq!(field.default(), Value::from(0));
        assert_eq!(field.default(), Value::from(1));
    }

    #[test]
    fn display_lists_flags() {
        let field = FieldSpec::text("summary").nullable(true).updatable(false);
        assert_eq!(field.to_string(), "<summary:text,default(Static(\"\"))NI>");
    }
}

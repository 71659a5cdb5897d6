//! Immutable table description shared by every request.

use crate::error::MappingError;
use crate::model::FieldSpec;
use std::collections::HashSet;

#[derive(Clone, Debug)]
pub struct TableMapping {
    table: String,
    fields: Vec<FieldSpec>,
    primary_key: usize,
}

impl TableMapping {
    pub fn builder(table: impl Into<String>) -> TableBuilder {
        TableBuilder {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Validate the field list: unique names and exactly one primary key.
    /// The primary key is forced to not-null and non-updatable.
    pub fn new(table: impl Into<String>, mut fields: Vec<FieldSpec>) -> Result<Self, MappingError> {
        let table = table.into();
        let mut seen = HashSet::new();
        let mut primary_key: Option<usize> = None;
        for (i, f) in fields.iter().enumerate() {
            if !seen.insert(f.name().to_string()) {
                return Err(MappingError::DuplicateField {
                    table,
                    field: f.name().to_string(),
                });
            }
            if f.is_primary_key() {
                if let Some(first) = primary_key {
                    return Err(MappingError::DuplicatePrimaryKey {
                        first: fields[first].name().to_string(),
                        second: f.name().to_string(),
                        table,
                    });
                }
                primary_key = Some(i);
            }
        }
        let primary_key = primary_key.ok_or_else(|| MappingError::NoPrimaryKey { table: table.clone() })?;
        if fields[primary_key].force_primary_key_flags() {
            tracing::warn!(table = %table, field = fields[primary_key].name(), "primary key forced to non-nullable and non-updatable");
        }
        for f in &fields {
            tracing::debug!(table = %table, field = %f, "mapped field");
        }
        Ok(TableMapping {
            table,
            fields,
            primary_key,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn primary_key(&self) -> &FieldSpec {
        &self.fields[self.primary_key]
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn insertable(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.is_insertable())
    }

    pub fn updatable(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.is_updatable())
    }
}

/// Collects fields in declaration order; `build` validates them.
pub struct TableBuilder {
    table: String,
    fields: Vec<FieldSpec>,
}

impl TableBuilder {
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<TableMapping, MappingError> {
        TableMapping::new(self.table, self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_is_forced_not_null_and_immutable() {
        let table = TableMapping::builder("users")
            .field(FieldSpec::string("id").primary_key().nullable(true))
            .field(FieldSpec::string("email"))
            .build()
            .unwrap();
        let pk = table.primary_key();
        assert_eq!(pk.name(), "id");
        assert!(!pk.is_nullable());
        assert!(!pk.is_updatable());
        assert!(pk.is_insertable());
        assert_eq!(table.updatable().map(|f| f.name()).collect::<Vec<_>>(), vec!["email"]);
    }

    #[test]
    fn missing_primary_key_is_rejected_at_construction() {
        let err = TableMapping::builder("blogs")
            .field(FieldSpec::string("name"))
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::NoPrimaryKey { table: "blogs".into() });
    }

    #[test]
    fn second_primary_key_is_rejected() {
        let err = TableMapping::builder("t")
            .field(FieldSpec::string("a").primary_key())
            .field(FieldSpec::string("b").primary_key())
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::DuplicatePrimaryKey { ref first, ref second, .. } if first == "a" && second == "b"));
    }

    #[test]
    fn duplicate_field_names_are_rejected() {
        let err = TableMapping::builder("t")
            .field(FieldSpec::string("id").primary_key())
            .field(FieldSpec::string("name"))
            .field(FieldSpec::text("name"))
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::DuplicateField { table: "t".into(), field: "name".into() });
    }
}

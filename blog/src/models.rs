//! Blog entities and their table mappings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trestle::{next_id, FieldSpec, MappingError, Model, TableMapping};

fn now() -> Value {
    Value::from(chrono::Utc::now().timestamp_millis() as f64 / 1000.0)
}

fn id_field() -> FieldSpec {
    FieldSpec::string("id")
        .sql_type("varchar(50)")
        .primary_key()
        .default_with(|| Value::from(next_id()))
}

fn created_at() -> FieldSpec {
    FieldSpec::float("created_at").updatable(false).default_with(now)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
}

impl Model for User {
    fn mapping() -> Result<TableMapping, MappingError> {
        TableMapping::builder("users")
            .field(id_field())
            .field(FieldSpec::string("email").updatable(false))
            .field(FieldSpec::string("password"))
            .field(FieldSpec::boolean("admin"))
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("image").sql_type("varchar(500)"))
            .field(created_at())
            .build()
    }

    fn pre_insert(&mut self) {
        self.email = self.email.trim().to_lowercase();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub user_image: String,
    pub name: String,
    pub summary: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
}

impl Model for Blog {
    fn mapping() -> Result<TableMapping, MappingError> {
        TableMapping::builder("blogs")
            .field(id_field())
            .field(FieldSpec::string("user_id").sql_type("varchar(50)").updatable(false))
            .field(FieldSpec::string("user_name").sql_type("varchar(50)"))
            .field(FieldSpec::string("user_image").sql_type("varchar(500)"))
            .field(FieldSpec::string("name").sql_type("varchar(50)"))
            .field(FieldSpec::string("summary").sql_type("varchar(200)"))
            .field(FieldSpec::text("content"))
            .field(created_at())
            .build()
    }

    fn pre_insert(&mut self) {
        self.name = self.name.trim().to_string();
        self.summary = self.summary.trim().to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub blog_id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub user_image: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
}

impl Model for Comment {
    fn mapping() -> Result<TableMapping, MappingError> {
        TableMapping::builder("comments")
            .field(id_field())
            .field(FieldSpec::string("blog_id").sql_type("varchar(50)").updatable(false))
            .field(FieldSpec::string("user_id").sql_type("varchar(50)").updatable(false))
            .field(FieldSpec::string("user_name").sql_type("varchar(50)"))
            .field(FieldSpec::string("user_image").sql_type("varchar(500)"))
            .field(FieldSpec::text("content"))
            .field(created_at())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mappings_are_valid() {
        let users = User::mapping().unwrap();
        assert_eq!(users.primary_key().name(), "id");
        assert!(!users.field("email").unwrap().is_updatable());
        assert_eq!(Blog::mapping().unwrap().fields().len(), 8);
        assert_eq!(Comment::mapping().unwrap().table_name(), "comments");
    }

    #[test]
    fn generated_defaults() {
        let blogs = Blog::mapping().unwrap();
        let id = blogs.primary_key().default();
        assert_eq!(id.as_str().map(str::len), Some(50));
        assert!(blogs.field("created_at").unwrap().default().as_f64().unwrap() > 0.0);
    }
}

//! Load settings: defaults, then an optional JSON override file, then env vars.

use crate::config::Settings;
use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Env var naming the JSON override file.
pub const CONFIG_PATH_ENV: &str = "TRESTLE_CONFIG";

/// Load settings for the current process. A `.env` file is read first if present.
pub fn load() -> Result<Settings, ConfigError> {
    dotenvy::dotenv().ok();
    let overrides = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Load(format!("{}: {}", path, e)))?;
            Some(serde_json::from_str::<Value>(&text)?)
        }
        Err(_) => None,
    };
    let mut settings = from_overrides(overrides.as_ref())?;
    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    tracing::info!(db_host = %settings.db.host, db_name = %settings.db.database, port = settings.server.port, "settings loaded");
    Ok(settings)
}

/// Defaults merged with a JSON override document.
pub fn from_overrides(overrides: Option<&Value>) -> Result<Settings, ConfigError> {
    let defaults = serde_json::to_value(Settings::default())?;
    let merged = match overrides {
        Some(user) => merge(&defaults, user),
        None => defaults,
    };
    Ok(serde_json::from_value(merged)?)
}

/// Keys of `defaults` taken from `user` when present; nested objects merge key by key.
/// Keys only present in `user` are ignored, except inside objects that are empty by default (free-form maps).
pub fn merge(defaults: &Value, user: &Value) -> Value {
    match (defaults, user) {
        (Value::Object(d), Value::Object(u)) => {
            let mut out = Map::new();
            for (k, v) in d {
                let merged = match u.get(k) {
                    Some(uv) if v.as_object().is_some_and(|m| !m.is_empty()) => merge(v, uv),
                    Some(uv) => uv.clone(),
                    None => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Object(out)
        }
        _ => user.clone(),
    }
}

/// Apply individual env overrides; `lookup` abstracts the environment for tests.
pub fn apply_env<F>(settings: &mut Settings, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("DATABASE_HOST") {
        settings.db.host = v;
    }
    if let Some(v) = lookup("DATABASE_PORT") {
        settings.db.port = parse("DATABASE_PORT", &v)?;
    }
    if let Some(v) = lookup("DATABASE_USER") {
        settings.db.user = v;
    }
    if let Some(v) = lookup("DATABASE_PASSWORD") {
        settings.db.password = v;
    }
    if let Some(v) = lookup("DATABASE_NAME") {
        settings.db.database = v;
    }
    if let Some(v) = lookup("SERVER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = lookup("SERVER_PORT") {
        settings.server.port = parse("SERVER_PORT", &v)?;
    }
    if let Some(v) = lookup("DOCUMENT_ROOT") {
        settings.server.document_root = v.into();
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn merge_overrides_nested_keys_and_ignores_unknown() {
        let defaults = json!({"db": {"host": "a", "port": 1}, "debug": false});
        let user = json!({"db": {"port": 2, "extra": true}, "other": 1});
        assert_eq!(
            merge(&defaults, &user),
            json!({"db": {"host": "a", "port": 2}, "debug": false})
        );
    }

    #[test]
    fn free_form_maps_are_taken_whole() {
        let settings = from_overrides(Some(&json!({"db": {"options": {"application_name": "blog"}}}))).unwrap();
        assert_eq!(settings.db.options.get("application_name").map(String::as_str), Some("blog"));
    }

    #[test]
    fn override_document_changes_only_named_fields() {
        let settings = from_overrides(Some(&json!({"db": {"database": "blog", "port": 6543}}))).unwrap();
        assert_eq!(settings.db.database, "blog");
        assert_eq!(settings.db.port, 6543);
        assert_eq!(settings.db.host, "127.0.0.1");
        assert_eq!(settings.server, crate::config::ServerSettings::default());
    }

    #[test]
    fn env_overrides_win_and_are_validated() {
        let env: HashMap<&str, &str> = [("DATABASE_HOST", "db.internal"), ("SERVER_PORT", "8080")].into();
        let mut settings = Settings::default();
        apply_env(&mut settings, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.db.host, "db.internal");
        assert_eq!(settings.server.port, 8080);

        let err = apply_env(&mut settings, |k| (k == "DATABASE_PORT").then(|| "nope".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DATABASE_PORT"));
    }
}

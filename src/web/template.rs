//! Seam to the template engine used for view replies.

use crate::error::TemplateError;
use serde_json::Value;

/// Renders a named template against a JSON object model.
pub trait TemplateEngine: Send + Sync + 'static {
    fn render(&self, name: &str, model: &Value) -> Result<Vec<u8>, TemplateError>;
}

impl<F> TemplateEngine for F
where
    F: Fn(&str, &Value) -> Result<Vec<u8>, TemplateError> + Send + Sync + 'static,
{
    fn render(&self, name: &str, model: &Value) -> Result<Vec<u8>, TemplateError> {
        self(name, model)
    }
}

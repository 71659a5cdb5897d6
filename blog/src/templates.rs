//! Jinja templates loaded from a directory.

use minijinja::{path_loader, Environment};
use serde_json::Value;
use std::path::PathBuf;
use trestle::web::TemplateEngine;
use trestle::TemplateError;

pub struct FileTemplates {
    env: Environment<'static>,
}

impl FileTemplates {
    /// Templates under `root`; `.html` files are auto-escaped.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(root.into()));
        FileTemplates { env }
    }
}

impl TemplateEngine for FileTemplates {
    fn render(&self, name: &str, model: &Value) -> Result<Vec<u8>, TemplateError> {
        let to_error = |e: minijinja::Error| TemplateError {
            name: name.to_string(),
            reason: e.to_string(),
        };
        let template = self.env.get_template(name).map_err(to_error)?;
        template.render(model).map(String::into_bytes).map_err(to_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render(templates: &FileTemplates, name: &str, model: Value) -> String {
        String::from_utf8(templates.render(name, &model).unwrap()).unwrap()
    }

    #[test]
    fn renders_from_the_template_root_escaped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.html"), "<h1>{{ title }}</h1>{{ missing }}").unwrap();
        let templates = FileTemplates::new(dir.path());
        assert_eq!(render(&templates, "hello.html", json!({"title": "<Hi>"})), "<h1>&lt;Hi&gt;</h1>");
        assert!(templates.render("missing.html", &json!({})).is_err());
    }

    #[test]
    fn index_lists_every_blog_on_the_page() {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("templates");
        let templates = FileTemplates::new(root);
        let html = render(
            &templates,
            "blogs.html",
            json!({
                "page": {"page_index": 1, "page_count": 1, "item_count": 2, "has_next": false, "has_previous": false},
                "blogs": [
                    {"id": "b1", "name": "First post", "summary": "one"},
                    {"id": "b2", "name": "Second post", "summary": "two"}
                ],
                "user": null
            }),
        );
        assert!(html.contains("First post"));
        assert!(html.contains("Second post"));
        assert!(html.contains("/api/blogs/b2"));
        assert!(html.contains("Sign in"));
    }
}

//! Template catalog — a stateless view over a directory of mail templates.
//!
//! Backed by a minijinja environment with a filesystem loader. Variable
//! extraction is static: the template is parsed and every identifier that is
//! referenced but not declared inside the template (loop variables, macro
//! parameters, block-local bindings) counts as required.

use std::collections::BTreeSet;
use std::path::PathBuf;

use minijinja::{Environment, ErrorKind, UndefinedBehavior, path_loader};

use crate::config::TemplateConfig;
use crate::error::TemplateError;

/// Name and statically-extracted required variables of one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDescriptor {
    pub name: String,
    pub required_variables: BTreeSet<String>,
}

/// Resolves template names to content and extracts required variables.
pub struct TemplateCatalog {
    env: Environment<'static>,
    root: PathBuf,
}

impl TemplateCatalog {
    /// Create a catalog over the configured template root.
    ///
    /// The environment runs with strict undefined behavior so a variable
    /// missing at render time fails the render instead of producing an
    /// empty string.
    pub fn new(config: &TemplateConfig) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(&config.root));
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            env,
            root: config.root.clone(),
        }
    }

    /// Whether `name` resolves to a template under the root.
    pub fn exists(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    /// The set of variables the named template requires, sorted.
    ///
    /// Recomputed from the template source on demand; the same template text
    /// always yields the same set.
    pub fn required_variables(&self, name: &str) -> Result<BTreeSet<String>, TemplateError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| map_lookup_error(name, &e))?;
        Ok(template.undeclared_variables(false).into_iter().collect())
    }

    /// Descriptor for the named template.
    pub fn describe(&self, name: &str) -> Result<TemplateDescriptor, TemplateError> {
        Ok(TemplateDescriptor {
            name: name.to_string(),
            required_variables: self.required_variables(name)?,
        })
    }

    /// Render the named template with the supplied parameters.
    pub fn render(
        &self,
        name: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, TemplateError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| map_lookup_error(name, &e))?;
        template.render(params).map_err(|e| TemplateError::Render {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Render the named template with each required variable replaced by a
    /// literal `{{ name }}` placeholder. Used by the preview endpoint.
    pub fn preview(&self, name: &str) -> Result<String, TemplateError> {
        let mut params = serde_json::Map::new();
        for var in self.required_variables(name)? {
            params.insert(
                var.clone(),
                serde_json::Value::String(format!("{{{{ {var} }}}}")),
            );
        }
        self.render(name, &params)
    }

    /// Names of all readable template files under the root, sorted.
    ///
    /// Subdirectories and other non-file entries are excluded.
    pub fn list_names(&self) -> Result<Vec<String>, TemplateError> {
        let mut names = Vec::new();
        for dir_entry in std::fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.path().is_file() {
                continue;
            }
            if let Some(name) = dir_entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn map_lookup_error(name: &str, err: &minijinja::Error) -> TemplateError {
    if err.kind() == ErrorKind::TemplateNotFound {
        TemplateError::NotFound(name.to_string())
    } else {
        TemplateError::Render {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(templates: &[(&str, &str)]) -> (tempfile::TempDir, TemplateCatalog) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in templates {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let catalog = TemplateCatalog::new(&TemplateConfig {
            root: dir.path().to_path_buf(),
        });
        (dir, catalog)
    }

    #[test]
    fn exists_known_and_unknown() {
        let (_dir, catalog) = catalog_with(&[("welcome.html", "Hello {{ name }}!")]);
        assert!(catalog.exists("welcome.html"));
        assert!(!catalog.exists("missing.html"));
    }

    #[test]
    fn required_variables_simple() {
        let (_dir, catalog) =
            catalog_with(&[("welcome.html", "Hello {{ name }}, from {{ sender }}!")]);
        let vars = catalog.required_variables("welcome.html").unwrap();
        let expected: BTreeSet<String> = ["name".to_string(), "sender".to_string()].into();
        assert_eq!(vars, expected);
    }

    #[test]
    fn required_variables_excludes_loop_bindings() {
        let (_dir, catalog) = catalog_with(&[(
            "digest.html",
            "{% for item in items %}{{ item }} for {{ user }}{% endfor %}",
        )]);
        let vars = catalog.required_variables("digest.html").unwrap();
        let expected: BTreeSet<String> = ["items".to_string(), "user".to_string()].into();
        assert_eq!(vars, expected);
    }

    #[test]
    fn required_variables_excludes_set_bindings() {
        let (_dir, catalog) = catalog_with(&[(
            "greeting.html",
            "{% set greeting = 'Hi' %}{{ greeting }} {{ name }}",
        )]);
        let vars = catalog.required_variables("greeting.html").unwrap();
        let expected: BTreeSet<String> = ["name".to_string()].into();
        assert_eq!(vars, expected);
    }

    #[test]
    fn required_variables_unknown_template() {
        let (_dir, catalog) = catalog_with(&[]);
        match catalog.required_variables("nope.html") {
            Err(TemplateError::NotFound(name)) => assert_eq!(name, "nope.html"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn required_variables_idempotent() {
        let (_dir, catalog) = catalog_with(&[("welcome.html", "Hello {{ name }}!")]);
        let first = catalog.required_variables("welcome.html").unwrap();
        let second = catalog.required_variables("welcome.html").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn render_substitutes_params() {
        let (_dir, catalog) = catalog_with(&[("welcome.html", "Hello {{ name }}!")]);
        let mut params = serde_json::Map::new();
        params.insert("name".into(), "Ann".into());
        let rendered = catalog.render("welcome.html", &params).unwrap();
        assert_eq!(rendered, "Hello Ann!");
    }

    #[test]
    fn render_fails_on_missing_variable() {
        // Strict undefined behavior: the completeness check upstream should
        // prevent this, but the render itself still refuses.
        let (_dir, catalog) = catalog_with(&[("welcome.html", "Hello {{ name }}!")]);
        let params = serde_json::Map::new();
        match catalog.render("welcome.html", &params) {
            Err(TemplateError::Render { name, .. }) => assert_eq!(name, "welcome.html"),
            other => panic!("expected Render error, got {other:?}"),
        }
    }

    #[test]
    fn list_names_sorted_files_only() {
        let (dir, catalog) = catalog_with(&[
            ("welcome.html", "hi"),
            ("alert.html", "boom"),
            ("digest.txt", "news"),
        ]);
        std::fs::create_dir(dir.path().join("partials")).unwrap();

        let names = catalog.list_names().unwrap();
        assert_eq!(names, vec!["alert.html", "digest.txt", "welcome.html"]);
    }

    #[test]
    fn preview_keeps_placeholders() {
        let (_dir, catalog) = catalog_with(&[("welcome.html", "Hello {{ name }}!")]);
        let rendered = catalog.preview("welcome.html").unwrap();
        assert_eq!(rendered, "Hello {{ name }}!");
    }
}

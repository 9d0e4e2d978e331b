//! Request validation and body resolution.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{TemplateError, ValidationError};
use crate::message::{EmailRequest, ResolvedMessage};
use crate::templates::TemplateCatalog;

/// Validates inbound requests and resolves their body.
///
/// Checks run in a fixed order — conflict, recipient shape, template
/// existence, variable completeness — and only then is the template
/// rendered. The caller therefore gets a complete, actionable error
/// (including the exact missing variable names) before any rendering
/// happens, and rendering failures stay distinguishable from request-shape
/// failures.
pub struct RequestValidator {
    catalog: Arc<TemplateCatalog>,
}

impl RequestValidator {
    pub fn new(catalog: Arc<TemplateCatalog>) -> Self {
        Self { catalog }
    }

    /// Validate a request and produce its resolved message.
    pub fn validate(&self, request: &EmailRequest) -> Result<ResolvedMessage, ValidationError> {
        if request.body.is_some() && request.template_name.is_some() {
            return Err(ValidationError::ConflictingBodySource);
        }

        let recipients = normalize_recipients(&request.recipients)?;

        let rendered_body = match &request.template_name {
            Some(name) => self.resolve_template(name, &request.body_params)?,
            None => request.body.clone().unwrap_or_default(),
        };

        Ok(ResolvedMessage {
            recipients,
            subject: request.subject.clone(),
            rendered_body,
            message_type: request.message_type,
        })
    }

    fn resolve_template(
        &self,
        name: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ValidationError> {
        if !self.catalog.exists(name) {
            return Err(ValidationError::TemplateNotFound(name.to_string()));
        }

        let required = self
            .catalog
            .required_variables(name)
            .map_err(|e| map_template_error(name, e))?;

        // BTreeSet iteration keeps the reported names sorted.
        let missing: Vec<String> = required
            .into_iter()
            .filter(|var| !params.contains_key(var))
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingTemplateVariables {
                template: name.to_string(),
                missing,
            });
        }

        self.catalog
            .render(name, params)
            .map_err(|e| map_template_error(name, e))
    }
}

fn map_template_error(name: &str, err: TemplateError) -> ValidationError {
    match err {
        TemplateError::NotFound(_) => ValidationError::TemplateNotFound(name.to_string()),
        other => ValidationError::Render(other.to_string()),
    }
}

/// Trim, validate, and deduplicate recipient addresses, preserving order.
fn normalize_recipients(recipients: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::new();

    for raw in recipients {
        let addr = raw.trim();
        if addr.is_empty() {
            continue;
        }
        if addr.parse::<lettre::Address>().is_err() {
            return Err(ValidationError::InvalidRecipient(addr.to_string()));
        }
        if seen.insert(addr.to_lowercase()) {
            normalized.push(addr.to_string());
        }
    }

    if normalized.is_empty() {
        return Err(ValidationError::EmptyRecipients);
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateConfig;
    use crate::message::MessageType;

    fn validator_with(templates: &[(&str, &str)]) -> (tempfile::TempDir, RequestValidator) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in templates {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let catalog = Arc::new(TemplateCatalog::new(&TemplateConfig {
            root: dir.path().to_path_buf(),
        }));
        (dir, RequestValidator::new(catalog))
    }

    fn base_request() -> EmailRequest {
        EmailRequest {
            recipients: vec!["a@x.com".into()],
            subject: "Hi".into(),
            body: None,
            template_name: None,
            body_params: serde_json::Map::new(),
            message_type: MessageType::Plain,
        }
    }

    #[test]
    fn direct_body_passes_through_verbatim() {
        let (_dir, validator) = validator_with(&[]);
        let mut request = base_request();
        request.body = Some("Hello".into());

        let resolved = validator.validate(&request).unwrap();
        assert_eq!(resolved.rendered_body, "Hello");
        assert_eq!(resolved.recipients, vec!["a@x.com"]);
        assert_eq!(resolved.message_type, MessageType::Plain);
    }

    #[test]
    fn absent_body_resolves_empty() {
        let (_dir, validator) = validator_with(&[]);
        let resolved = validator.validate(&base_request()).unwrap();
        assert_eq!(resolved.rendered_body, "");
    }

    #[test]
    fn conflicting_body_source_rejected() {
        let (_dir, validator) = validator_with(&[("welcome.html", "Hello {{ name }}!")]);
        let mut request = base_request();
        request.body = Some("Hello".into());
        request.template_name = Some("welcome.html".into());

        assert_eq!(
            validator.validate(&request),
            Err(ValidationError::ConflictingBodySource)
        );
    }

    #[test]
    fn conflict_checked_before_recipients() {
        let (_dir, validator) = validator_with(&[]);
        let mut request = base_request();
        request.recipients = vec![];
        request.body = Some("Hello".into());
        request.template_name = Some("welcome.html".into());

        assert_eq!(
            validator.validate(&request),
            Err(ValidationError::ConflictingBodySource)
        );
    }

    #[test]
    fn empty_recipients_rejected() {
        let (_dir, validator) = validator_with(&[]);
        let mut request = base_request();
        request.recipients = vec![];

        assert_eq!(
            validator.validate(&request),
            Err(ValidationError::EmptyRecipients)
        );
    }

    #[test]
    fn whitespace_only_recipients_rejected() {
        let (_dir, validator) = validator_with(&[]);
        let mut request = base_request();
        request.recipients = vec!["   ".into()];

        assert_eq!(
            validator.validate(&request),
            Err(ValidationError::EmptyRecipients)
        );
    }

    #[test]
    fn invalid_recipient_rejected() {
        let (_dir, validator) = validator_with(&[]);
        let mut request = base_request();
        request.recipients = vec!["not-an-address".into()];

        assert_eq!(
            validator.validate(&request),
            Err(ValidationError::InvalidRecipient("not-an-address".into()))
        );
    }

    #[test]
    fn duplicate_recipients_deduplicated_in_order() {
        let (_dir, validator) = validator_with(&[]);
        let mut request = base_request();
        request.recipients = vec![
            "a@x.com".into(),
            "b@x.com".into(),
            "A@X.com".into(),
            "a@x.com".into(),
        ];

        let resolved = validator.validate(&request).unwrap();
        assert_eq!(resolved.recipients, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn unknown_template_rejected_before_render() {
        let (_dir, validator) = validator_with(&[]);
        let mut request = base_request();
        request.template_name = Some("missing.html".into());

        assert_eq!(
            validator.validate(&request),
            Err(ValidationError::TemplateNotFound("missing.html".into()))
        );
    }

    #[test]
    fn missing_variables_reported_exactly() {
        let (_dir, validator) = validator_with(&[(
            "welcome.html",
            "Hi {{ name }}, your {{ plan }} starts {{ start_date }}.",
        )]);
        let mut request = base_request();
        request.template_name = Some("welcome.html".into());
        request
            .body_params
            .insert("plan".into(), "premium".into());

        match validator.validate(&request) {
            Err(ValidationError::MissingTemplateVariables { template, missing }) => {
                assert_eq!(template, "welcome.html");
                assert_eq!(missing, vec!["name".to_string(), "start_date".to_string()]);
            }
            other => panic!("expected MissingTemplateVariables, got {other:?}"),
        }
    }

    #[test]
    fn extra_params_are_allowed() {
        let (_dir, validator) = validator_with(&[("welcome.html", "Hello {{ name }}!")]);
        let mut request = base_request();
        request.template_name = Some("welcome.html".into());
        request.body_params.insert("name".into(), "Ann".into());
        request.body_params.insert("unused".into(), "x".into());

        let resolved = validator.validate(&request).unwrap();
        assert_eq!(resolved.rendered_body, "Hello Ann!");
    }

    #[test]
    fn complete_params_render() {
        let (_dir, validator) = validator_with(&[("welcome.html", "Hello {{ name }}!")]);
        let mut request = base_request();
        request.template_name = Some("welcome.html".into());
        request.body_params.insert("name".into(), "Ann".into());

        let resolved = validator.validate(&request).unwrap();
        assert!(resolved.rendered_body.contains("Ann"));
    }
}

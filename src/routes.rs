//! REST endpoints for the mail pipeline.
//!
//! Thin bindings only: deserialize, call the pipeline, map errors to status
//! codes. No business logic lives here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::error::{StorageError, TemplateError, ValidationError};
use crate::message::EmailRequest;
use crate::outbox::OutboxStore;
use crate::queue::{DispatchQueue, DispatchTask};
use crate::templates::TemplateCatalog;
use crate::validate::RequestValidator;

/// Shared state for the mail routes.
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<RequestValidator>,
    pub catalog: Arc<TemplateCatalog>,
    pub store: Arc<dyn OutboxStore>,
    pub queue: Arc<DispatchQueue>,
}

/// Caller-visible error with a stable code and optional detail.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    detail: Option<serde_json::Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self {
            status,
            code,
            message,
            detail: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.code,
            "message": self.message,
        });
        if let Some(detail) = self.detail {
            body["detail"] = detail;
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::ConflictingBodySource => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "conflicting_body_source",
                message,
            ),
            ValidationError::EmptyRecipients => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "empty_recipients",
                message,
            ),
            ValidationError::InvalidRecipient(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_recipient",
                message,
            ),
            ValidationError::TemplateNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "template_not_found", message)
            }
            ValidationError::MissingTemplateVariables { missing, .. } => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "missing_template_variables",
                message,
                detail: Some(json!({ "missing": missing })),
            },
            ValidationError::Render(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "template_render_error",
                message,
            ),
        }
    }
}

impl From<TemplateError> for ApiError {
    fn from(err: TemplateError) -> Self {
        let message = err.to_string();
        match err {
            TemplateError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "template_not_found", message)
            }
            TemplateError::Render { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "template_render_error",
                message,
            ),
            TemplateError::Io(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "template_io_error",
                message,
            ),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            // The request was never accepted; the caller may retry.
            StorageError::Unavailable(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", message)
            }
            StorageError::EntryNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "entry_not_found", message)
            }
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", message),
        }
    }
}

/// POST /mail — validate, persist, enqueue for dispatch.
async fn create_mail(
    State(state): State<AppState>,
    Json(request): Json<EmailRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let resolved = state.validator.validate(&request)?;
    let entry = state.store.insert(resolved).await?;
    state.queue.enqueue(DispatchTask::first(entry.id)).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": entry.id, "mail": entry.email })),
    ))
}

/// GET /mail/templates — names of all available templates.
async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let names = state.catalog.list_names()?;
    Ok(Json(json!({ "templates": names })))
}

/// GET /mail/templates/{name}/variables — variables a template requires.
async fn template_variables(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let descriptor = state.catalog.describe(&name)?;
    Ok(Json(json!({
        "template": descriptor.name,
        "variables": descriptor.required_variables,
    })))
}

/// GET /mail/templates/{name} — template rendered with `{{ var }}`
/// placeholders, for previewing.
async fn template_preview(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Html<String>, ApiError> {
    Ok(Html(state.catalog.preview(&name)?))
}

/// Build the mail REST routes.
pub fn mail_routes(state: AppState) -> Router {
    Router::new()
        .route("/mail", post(create_mail))
        .route("/mail/templates", get(list_templates))
        .route("/mail/templates/{name}", get(template_preview))
        .route("/mail/templates/{name}/variables", get(template_variables))
        .with_state(state)
}

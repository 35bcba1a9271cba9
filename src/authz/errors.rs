use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Invalid model: {0}")]
    #[diagnostic(
        code(warden::authz::model),
        help("A model needs [request_definition], [policy_definition], [policy_effect] and [matchers] sections")
    )]
    Model(String),

    #[error("Invalid expression: {0}")]
    #[diagnostic(
        code(warden::authz::invalid_expression),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Fields are referenced as r.<field> or p.<field>")
    )]
    InvalidExpression(String),

    #[error("Policy engine is not initialized")]
    #[diagnostic(
        code(warden::authz::not_ready),
        help("The enforcer must be loaded from its policy store before it can answer requests")
    )]
    NotReady,

    #[error("Rule already exists: {0}")]
    #[diagnostic(code(warden::authz::duplicate_rule))]
    DuplicateRule(String),

    #[error("Rule not found: {0}")]
    #[diagnostic(code(warden::authz::not_found))]
    NotFound(String),

    #[error("Policy store unavailable: {0}")]
    #[diagnostic(
        code(warden::authz::store_unavailable),
        help("The durable policy store could not be read or written; in-memory state was left unchanged")
    )]
    StoreUnavailable(String),

    #[error("Invalid rule: {0}")]
    #[diagnostic(code(warden::authz::invalid_rule))]
    InvalidRule(String),
}

impl AuthzError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthzError::InvalidRule(_) | AuthzError::InvalidExpression(_) => {
                StatusCode::BAD_REQUEST
            }
            AuthzError::DuplicateRule(_) => StatusCode::CONFLICT,
            AuthzError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthzError::NotReady | AuthzError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthzError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

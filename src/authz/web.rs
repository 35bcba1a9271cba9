use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::authz::enforcer::Enforcer;
use crate::authz::errors::AuthzError;
use crate::authz::types::{
    Decision, GroupingRule, LoadSummary, MessageResponse, ModelResponse, PolicyQuery, PolicyRule,
    Request,
};

pub fn router(enforcer: Arc<Enforcer>) -> Router {
    Router::new()
        .route("/v1/enforce", post(handle_enforce))
        .route("/v1/explain", post(handle_explain))
        .route(
            "/v1/policies",
            get(list_policies).post(add_policy).delete(remove_policy),
        )
        .route(
            "/v1/groupings",
            get(list_groupings).post(add_grouping).delete(remove_grouping),
        )
        .route("/v1/reload", post(handle_reload))
        .route("/v1/model", get(handle_model))
        .route("/healthz", get(health))
        .with_state(enforcer)
}

async fn handle_enforce(
    State(enforcer): State<Arc<Enforcer>>,
    Json(req): Json<Request>,
) -> impl IntoResponse {
    match enforcer.enforce(&req) {
        Ok(allowed) => {
            tracing::info!(
                subject = %req.subject,
                domain = %req.domain,
                object = %req.object,
                action = %req.action,
                allowed,
                "access check"
            );
            Json(Decision { allowed }).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn handle_explain(
    State(enforcer): State<Arc<Enforcer>>,
    Json(req): Json<Request>,
) -> impl IntoResponse {
    match enforcer.explain(&req) {
        Ok(explanation) => Json(explanation).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn list_policies(
    State(enforcer): State<Arc<Enforcer>>,
    Query(query): Query<PolicyQuery>,
) -> Result<Json<Vec<PolicyRule>>, AuthzError> {
    let policies = match query.domain {
        Some(domain) => enforcer.policies_for_domain(&domain)?,
        None => enforcer.policies()?,
    };
    Ok(Json(policies))
}

async fn add_policy(
    State(enforcer): State<Arc<Enforcer>>,
    Json(rule): Json<PolicyRule>,
) -> Result<impl IntoResponse, AuthzError> {
    let shown = rule.to_string();
    if !blocking(enforcer, move |e| e.add_policy(rule)).await? {
        return Err(AuthzError::DuplicateRule(shown));
    }
    Ok(created(format!("added {shown}")))
}

async fn remove_policy(
    State(enforcer): State<Arc<Enforcer>>,
    Json(rule): Json<PolicyRule>,
) -> Result<impl IntoResponse, AuthzError> {
    let shown = rule.to_string();
    if !blocking(enforcer, move |e| e.remove_policy(&rule)).await? {
        return Err(AuthzError::NotFound(shown));
    }
    Ok(ok(format!("removed {shown}")))
}

async fn list_groupings(
    State(enforcer): State<Arc<Enforcer>>,
) -> Result<Json<Vec<GroupingRule>>, AuthzError> {
    Ok(Json(enforcer.groupings()?))
}

async fn add_grouping(
    State(enforcer): State<Arc<Enforcer>>,
    Json(rule): Json<GroupingRule>,
) -> Result<impl IntoResponse, AuthzError> {
    let shown = rule.to_string();
    if !blocking(enforcer, move |e| e.add_grouping(rule)).await? {
        return Err(AuthzError::DuplicateRule(shown));
    }
    Ok(created(format!("added {shown}")))
}

async fn remove_grouping(
    State(enforcer): State<Arc<Enforcer>>,
    Json(rule): Json<GroupingRule>,
) -> Result<impl IntoResponse, AuthzError> {
    let shown = rule.to_string();
    if !blocking(enforcer, move |e| e.remove_grouping(&rule)).await? {
        return Err(AuthzError::NotFound(shown));
    }
    Ok(ok(format!("removed {shown}")))
}

async fn handle_reload(
    State(enforcer): State<Arc<Enforcer>>,
) -> Result<Json<LoadSummary>, AuthzError> {
    let summary = blocking(enforcer, |e| e.reload()).await?;
    tracing::info!(
        policies = summary.policies,
        groupings = summary.groupings,
        "Reloaded policies on request"
    );
    Ok(Json(summary))
}

async fn handle_model(
    State(enforcer): State<Arc<Enforcer>>,
    Query(query): Query<PolicyQuery>,
) -> Result<Json<ModelResponse>, AuthzError> {
    let policies = match query.domain {
        Some(domain) => enforcer.policies_for_domain(&domain)?,
        None => enforcer.policies()?,
    };
    Ok(Json(ModelResponse {
        model: enforcer.model().view(),
        policies,
    }))
}

async fn health(State(enforcer): State<Arc<Enforcer>>) -> impl IntoResponse {
    if enforcer.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

fn created(message: String) -> (StatusCode, Json<MessageResponse>) {
    (StatusCode::CREATED, Json(MessageResponse { message }))
}

fn ok(message: String) -> (StatusCode, Json<MessageResponse>) {
    (StatusCode::OK, Json(MessageResponse { message }))
}

/// Run an enforcer call that may touch the durable store off the async workers.
async fn blocking<T, F>(enforcer: Arc<Enforcer>, f: F) -> Result<T, AuthzError>
where
    F: FnOnce(&Enforcer) -> Result<T, AuthzError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&enforcer))
        .await
        .map_err(|e| AuthzError::StoreUnavailable(format!("store task failed: {e}")))?
}

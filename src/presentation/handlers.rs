// HTTP request handlers
use crate::application::query_service::QueryRequest;
use crate::domain::error::GatewayError;
use crate::presentation::app_state::AppState;
use axum::{
    body::Body,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

const DEFAULT_STREAM_INTERVAL_MS: i64 = 10_000;

fn error_response(e: GatewayError) -> (StatusCode, String) {
    let status = match &e {
        GatewayError::InvalidOperator(_)
        | GatewayError::UnknownFunction(_)
        | GatewayError::InvalidParameter { .. }
        | GatewayError::InvalidAliasPattern(_) => StatusCode::BAD_REQUEST,
        GatewayError::EmptyResponse(_) => StatusCode::NOT_FOUND,
        GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
    };
    (status, e.to_string())
}

/// Connectivity probe against the archiver's version endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.query_service.get_version().await {
        Ok(_) => (StatusCode::OK, "ok".to_string()).into_response(),
        Err(e) => {
            tracing::error!("archiver connectivity check failed: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct PvQuery {
    pub pattern: String,
    pub limit: Option<usize>,
}

/// Function catalog for query builders: categories in display order,
/// each with its functions' parameters and defaults.
pub async fn list_functions() -> impl IntoResponse {
    let categories: Vec<serde_json::Value> = crate::domain::functions::get_categories()
        .into_iter()
        .map(|(category, defs)| {
            let functions: Vec<serde_json::Value> = defs
                .iter()
                .map(|def| {
                    serde_json::json!({
                        "name": def.name,
                        "params": def
                            .params
                            .iter()
                            .map(|p| {
                                serde_json::json!({
                                    "name": p.name,
                                    "type": p.param_type.label(),
                                    "options": p.options,
                                })
                            })
                            .collect::<Vec<_>>(),
                        "defaultParams": def.default_params,
                    })
                })
                .collect();

            serde_json::json!({
                "category": category.label(),
                "functions": functions,
            })
        })
        .collect();

    Json(categories)
}

/// PV name lookup with alternation-group expansion.
pub async fn find_pvs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PvQuery>,
) -> impl IntoResponse {
    let pattern = match query.limit {
        Some(limit) => format!("{}?limit={}", query.pattern, limit),
        None => query.pattern,
    };

    match state
        .query_service
        .find_pv_names(&pattern, &HashMap::new())
        .await
    {
        Ok(names) => Json(names).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// One-shot query over all targets in the request.
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    let targets = match state.query_service.build_target_queries(&request) {
        Ok(targets) => targets,
        Err(e) => return error_response(e).into_response(),
    };

    match state.query_service.do_query_flat(&targets).await {
        Ok(frames) => Json(serde_json::json!({ "data": frames })).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Live query: each poll's merged frames are written as one NDJSON line.
/// Dropping the response body (client disconnect) cancels the
/// subscription.
pub async fn run_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    let targets = match state.query_service.build_target_queries(&request) {
        Ok(targets) => targets,
        Err(e) => return error_response(e).into_response(),
    };

    let interval_ms = request.interval_ms.unwrap_or(DEFAULT_STREAM_INTERVAL_MS);
    let handle = state.stream_service.subscribe(targets, interval_ms);
    tracing::debug!("stream subscription {} started", handle.id);

    let body_stream = async_stream::stream! {
        let mut handle = handle;
        while let Some(frames) = handle.receiver.recv().await {
            match serde_json::to_vec(&serde_json::json!({ "data": frames })) {
                Ok(mut line) => {
                    line.push(b'\n');
                    yield Ok::<Bytes, Infallible>(Bytes::from(line));
                }
                Err(e) => {
                    tracing::error!("stream serialization error: {}", e);
                    break;
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

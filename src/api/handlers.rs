//! HTTP request handlers for the payroll engine API.
//!
//! This module contains the handler functions for all API endpoints.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::PaycheckRequest;
use crate::error::EngineError;
use crate::models::{OrganizationId, PaycheckResult};
use crate::run::{CancelToken, RunOptions, run_payroll};

use super::request::{ComputePaycheckRequest, PayrollRunRequest};
use super::response::{ApiError, ApiErrorResponse, HealthResponse};
use super::state::AppState;

/// Creates the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/paychecks/compute", post(compute_handler))
        .route("/paychecks/components", post(components_handler))
        .route("/payroll-runs", post(payroll_run_handler))
        .with_state(state)
}

/// Handler for GET /health.
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handler for POST /paychecks/compute.
///
/// Computes one paycheck and returns the full result, including the audit
/// trace and the usage updates it would commit. Nothing is persisted.
async fn compute_handler(
    State(state): State<AppState>,
    payload: Result<Json<ComputePaycheckRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, "Processing paycheck request");

    let request = match parse_payload(payload, correlation_id) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match compute(&state, request.into(), correlation_id).await {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(error) => error_response(error),
    }
}

/// Handler for POST /paychecks/components.
///
/// Same computation as `/paychecks/compute`, answering with the component
/// breakdown and summary only.
async fn components_handler(
    State(state): State<AppState>,
    payload: Result<Json<ComputePaycheckRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, "Processing component breakdown request");

    let request = match parse_payload(payload, correlation_id) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match compute(&state, request.into(), correlation_id).await {
        Ok(result) => json_response(StatusCode::OK, &result.components),
        Err(error) => error_response(error),
    }
}

/// Handler for POST /payroll-runs.
///
/// Runs payroll for every listed employee and commits usage for the
/// paychecks that succeed. Per-employee failures are reported in the body;
/// the response status is 200 whenever the run itself was accepted.
async fn payroll_run_handler(
    State(state): State<AppState>,
    payload: Result<Json<PayrollRunRequest>, JsonRejection>,
) -> Response {
    let correlation_id = Uuid::new_v4();
    info!(correlation_id = %correlation_id, "Processing payroll run request");

    let request = match parse_payload(payload, correlation_id) {
        Ok(request) => request,
        Err(response) => return response,
    };

    if let Err(err) = OrganizationId::parse(request.organization_id.clone()) {
        warn!(correlation_id = %correlation_id, error = %err, "Payroll run rejected");
        return error_response(err.into());
    }

    let options = RunOptions {
        max_concurrency: request
            .max_concurrency
            .unwrap_or(state.run_options().max_concurrency),
        ..state.run_options()
    };
    let report = run_payroll(
        state.engine().clone(),
        request.paycheck_requests(),
        options,
        CancelToken::new(),
    )
    .await;

    info!(
        correlation_id = %correlation_id,
        run_id = %report.run_id,
        paid = report.paychecks.len(),
        failed = report.failures.len(),
        "Payroll run finished"
    );
    json_response(StatusCode::OK, &report)
}

/// Runs the engine on the blocking pool under the per-employee time budget.
async fn compute(
    state: &AppState,
    request: PaycheckRequest,
    correlation_id: Uuid,
) -> Result<PaycheckResult, ApiErrorResponse> {
    let engine = state.engine().clone();
    let limit = state.run_options().employee_timeout;
    let employee_id = request.employee_id.clone();
    let task = tokio::task::spawn_blocking(move || engine.compute_paycheck(&request));

    let outcome = match tokio::time::timeout(limit, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            return Err(EngineError::integrity(format!(
                "paycheck computation aborted: {}",
                join_error
            ))
            .into());
        }
        Err(_) => {
            warn!(correlation_id = %correlation_id, employee_id = %employee_id, "Paycheck timed out");
            return Err(EngineError::Timeout {
                limit_ms: limit.as_millis() as u64,
            }
            .into());
        }
    };

    match outcome {
        Ok(result) => {
            info!(
                correlation_id = %correlation_id,
                employee_id = %result.employee_id,
                net_pay = %result.components.summary.net_pay,
                "Paycheck computed successfully"
            );
            Ok(result)
        }
        Err(err) => {
            warn!(
                correlation_id = %correlation_id,
                employee_id = %err.employee_id,
                stage = %err.stage,
                error = %err,
                "Paycheck computation failed"
            );
            Err(err.into())
        }
    }
}

/// Extracts a JSON body, mapping rejections to 400 responses.
fn parse_payload<T>(payload: Result<Json<T>, JsonRejection>, correlation_id: Uuid) -> Result<T, Response> {
    let rejection = match payload {
        Ok(Json(body)) => return Ok(body),
        Err(rejection) => rejection,
    };
    let error = match rejection {
        JsonRejection::JsonDataError(err) => {
            // Get the body text which contains the detailed error from serde
            let body_text = err.body_text();
            warn!(
                correlation_id = %correlation_id,
                error = %body_text,
                "JSON data error"
            );
            if body_text.contains("missing field") {
                ApiError::validation_error(body_text)
            } else {
                ApiError::malformed_json(body_text)
            }
        }
        JsonRejection::JsonSyntaxError(err) => {
            warn!(
                correlation_id = %correlation_id,
                error = %err,
                "JSON syntax error"
            );
            ApiError::malformed_json(format!("Invalid JSON syntax: {}", err))
        }
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::new("MISSING_CONTENT_TYPE", "Content-Type must be application/json")
        }
        _ => ApiError::malformed_json("Failed to parse request body"),
    };
    Err(json_response(StatusCode::BAD_REQUEST, &error))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], Json(body)).into_response()
}

fn error_response(error: ApiErrorResponse) -> Response {
    json_response(error.status, &error.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::models::PaycheckComponents;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_test_state() -> AppState {
        let config = ConfigLoader::load("./config/acme").expect("Failed to load config");
        AppState::new(config)
    }

    fn compute_body(employee_id: &str) -> String {
        serde_json::json!({
            "organization_id": "org_acme",
            "employee_id": employee_id,
            "pay_period": { "start_date": "2026-01-01", "end_date": "2026-01-31" },
            "inputs": { "base_salary": "3000", "hours_worked": "160" }
        })
        .to_string()
    }

    async fn post(uri: &str, body: String) -> Response {
        create_router(create_test_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> axum::body::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_compute_returns_paycheck() {
        let response = post("/paychecks/compute", compute_body("emp_001")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type, "application/json");

        let result: PaycheckResult = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(result.employee_id.as_str(), "emp_001");
        assert_eq!(result.components.summary.net_pay.to_string(), "2824.00");
    }

    #[tokio::test]
    async fn test_components_returns_breakdown_only() {
        let response = post("/paychecks/components", compute_body("emp_001")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let components: PaycheckComponents = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(components.earnings.len(), 2);
        assert_eq!(components.taxes.len(), 1);
        assert_eq!(components.deductions.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_returns_400() {
        let response = post("/paychecks/compute", "{invalid json".to_string()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let error: ApiError = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(error.code, "MALFORMED_JSON");
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let response = create_router(create_test_state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(health.status, "ok");
    }
}

//! Integration tests for the payroll engine.
//!
//! This test suite drives the HTTP API and the engine against the
//! `config/acme` fixture organization:
//! - Salaried paycheck with an annual pension cap (emp_001)
//! - Approved override replacing a template amount (emp_002)
//! - Hourly pay, tenure tiers, tax-free allowance, state tax and capped medicare (emp_003)
//! - Dependency cycle in a template (emp_bad)
//! - Payroll runs and usage commits
//! - Error cases

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use tower::ServiceExt;

use payroll_engine::api::{AppState, create_router};
use payroll_engine::config::ConfigLoader;
use payroll_engine::engine::PaycheckRequest;
use payroll_engine::models::{PayPeriod, PeriodInputs};

// =============================================================================
// Test Helpers
// =============================================================================

fn create_test_state() -> AppState {
    let config = ConfigLoader::load("./config/acme").expect("Failed to load config");
    AppState::new(config)
}

fn create_router_for_test() -> Router {
    create_router(create_test_state())
}

fn decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn decimal_at(value: &Value, pointer: &str) -> Decimal {
    let raw = value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("no decimal at {} in {}", pointer, value));
    decimal(raw)
}

async fn post_json(router: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

fn compute_request(employee_id: &str, inputs: Value) -> Value {
    json!({
        "organization_id": "org_acme",
        "employee_id": employee_id,
        "pay_period": {
            "start_date": "2026-01-01",
            "end_date": "2026-01-31",
            "pay_date": "2026-02-01"
        },
        "inputs": inputs
    })
}

fn salaried_inputs(base_salary: &str) -> Value {
    json!({ "base_salary": base_salary, "hours_worked": "160" })
}

fn find_component<'a>(group: &'a Value, code: &str) -> &'a Value {
    group
        .as_array()
        .and_then(|items| items.iter().find(|item| item["code"] == code))
        .unwrap_or_else(|| panic!("component {} not in {}", code, group))
}

// =============================================================================
// Salaried Paycheck (emp_001)
// =============================================================================

#[tokio::test]
async fn test_salaried_paycheck_net_pay() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_001", salaried_inputs("3000")),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let summary = &body["components"]["summary"];
    assert_eq!(summary["total_earnings"], "3300.00");
    assert_eq!(summary["total_taxes"], "456.00");
    assert_eq!(summary["total_deductions"], "20.00");
    assert_eq!(summary["net_pay"], "2824.00");
    assert_eq!(body["template"], json!({ "template_code": "standard", "version": "1.0.0" }));
    assert_eq!(body["currency"], "USD");
}

#[tokio::test]
async fn test_pension_clipped_to_annual_max() {
    let (_, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_001", salaried_inputs("3000")),
    )
    .await;

    let pension = find_component(&body["components"]["deductions"], "pension");
    assert_eq!(pension["amount"], "20.00");
    assert_eq!(pension["metadata"]["deduction_timing"], "pre_tax");
    assert_eq!(pension["metadata"]["clippings"][0]["reason"], "annual_max");

    let updates = body["usage_updates"].as_array().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["usage_key"], "component:pension");
    assert_eq!(decimal_at(&updates[0], "/previous"), decimal("480"));
    assert_eq!(decimal_at(&updates[0], "/new"), decimal("500"));
}

#[tokio::test]
async fn test_income_tax_metadata_lists_bracket_slices() {
    let (_, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_001", salaried_inputs("3000")),
    )
    .await;

    let tax = find_component(&body["components"]["taxes"], "income_tax");
    assert_eq!(tax["amount"], "456.00");
    assert_eq!(tax["metadata"]["rule_sets"], json!(["us_income_2025"]));
    let slices = tax["metadata"]["brackets"].as_array().unwrap();
    assert_eq!(slices.len(), 2);
    assert_eq!(decimal_at(&slices[1], "/slice"), decimal("1280"));
}

#[tokio::test]
async fn test_lifecycle_and_audit_trace() {
    let (_, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_001", salaried_inputs("3000")),
    )
    .await;

    assert_eq!(
        body["lifecycle"],
        json!([
            "pending",
            "resolving",
            "evaluating",
            "tax_applying",
            "deduction_applying",
            "aggregated"
        ])
    );
    let steps = body["audit_trace"]["steps"].as_array().unwrap();
    assert_eq!(steps[0]["stage"], "resolving");
    assert_eq!(steps[0]["step_number"], 1);
    assert_eq!(steps.last().unwrap()["stage"], "aggregating");
}

#[tokio::test]
async fn test_compute_does_not_commit_usage() {
    let router = create_router_for_test();
    let request = compute_request("emp_001", salaried_inputs("3000"));

    let (_, first) = post_json(router.clone(), "/paychecks/compute", request.clone()).await;
    let (_, second) = post_json(router, "/paychecks/compute", request).await;

    assert_eq!(first["components"], second["components"]);
    assert_eq!(second["components"]["summary"]["net_pay"], "2824.00");
}

// =============================================================================
// Overrides (emp_002)
// =============================================================================

#[tokio::test]
async fn test_approved_override_replaces_base_pay() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_002", salaried_inputs("4000")),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let base_pay = find_component(&body["components"]["earnings"], "base_pay");
    assert_eq!(base_pay["amount"], "4000.00");
    assert_eq!(base_pay["source"]["kind"], "override");
    assert_eq!(base_pay["source"]["override_id"], "ovr_002_raise");

    // 4400 gross, 50 pension, tax on 4350 = 200 + 400 + 105
    let summary = &body["components"]["summary"];
    assert_eq!(summary["total_taxes"], "705.00");
    assert_eq!(summary["net_pay"], "3645.00");
}

#[tokio::test]
async fn test_template_default_before_override_starts() {
    let mut request = compute_request("emp_002", salaried_inputs("3000"));
    request["pay_period"] = json!({ "start_date": "2025-12-01", "end_date": "2025-12-31" });
    let (status, body) = post_json(create_router_for_test(), "/paychecks/compute", request).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let base_pay = find_component(&body["components"]["earnings"], "base_pay");
    assert_eq!(base_pay["amount"], "3000.00");
    assert_eq!(base_pay["source"]["kind"], "template_default");
}

// =============================================================================
// Hourly Paycheck (emp_003)
// =============================================================================

#[tokio::test]
async fn test_hourly_paycheck_with_allowance_and_state_tax() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request(
            "emp_003",
            json!({ "hours_worked": "160", "hourly_rate": "25" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    let components = &body["components"];

    assert_eq!(find_component(&components["earnings"], "hourly_pay")["amount"], "4000.00");
    // 4 years of tenure: 2 at 0.00 and 2 at 10.00
    assert_eq!(find_component(&components["earnings"], "tenure_bonus")["amount"], "20.00");

    let meal = find_component(&components["earnings"], "meal");
    assert_eq!(decimal_at(meal, "/metadata/tax_split/tax_free"), decimal("100"));
    assert_eq!(decimal_at(meal, "/metadata/tax_split/taxable"), decimal("50"));

    // taxable income = 4070 - 208.50 retirement = 3861.50
    assert_eq!(find_component(&components["deductions"], "retirement")["amount"], "208.50");
    let income_tax = find_component(&components["taxes"], "income_tax");
    assert_eq!(income_tax["amount"], "726.76");
    assert_eq!(income_tax["metadata"]["rule_sets"], json!(["us_income_2025", "us_ny_income_2025"]));
    assert_eq!(find_component(&components["taxes"], "medicare")["amount"], "55.99");
    assert_eq!(find_component(&components["deductions"], "union_dues")["amount"], "25.00");

    let summary = &components["summary"];
    assert_eq!(summary["total_earnings"], "4170.00");
    assert_eq!(summary["total_tax_free"], "100.00");
    assert_eq!(summary["total_taxable"], "4070.00");
    assert_eq!(summary["total_taxes"], "782.75");
    assert_eq!(summary["total_deductions"], "233.50");
    assert_eq!(summary["net_pay"], "3153.75");

    let keys: Vec<&str> = body["usage_updates"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|u| u["usage_key"].as_str())
        .collect();
    assert_eq!(keys, vec!["allowance:meal", "tax:medicare:us_medicare_2025"]);
}

#[tokio::test]
async fn test_components_endpoint_returns_breakdown() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/paychecks/components",
        compute_request(
            "emp_003",
            json!({ "hours_worked": "160", "hourly_rate": "25" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("audit_trace").is_none());
    assert_eq!(body["summary"]["net_pay"], "3153.75");
    let codes: Vec<&str> = body["earnings"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["code"].as_str())
        .collect();
    assert_eq!(codes, vec!["hourly_pay", "tenure_bonus", "meal"]);
}

// =============================================================================
// Error Cases
// =============================================================================

#[tokio::test]
async fn test_dependency_cycle_returns_configuration_error() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_bad", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "CONFIGURATION_ERROR");
    assert!(body["message"].as_str().unwrap().contains("cycle"));
    let details = body["details"].as_str().unwrap();
    assert!(details.contains("emp_bad"));
    assert!(details.contains("commission_a"));
}

#[tokio::test]
async fn test_unknown_employee_returns_404() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_404", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_blank_organization_returns_400() {
    let mut request = compute_request("emp_001", json!({}));
    request["organization_id"] = json!("   ");
    let (status, body) = post_json(create_router_for_test(), "/paychecks/compute", request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_missing_organization_returns_400() {
    let mut request = compute_request("emp_001", json!({}));
    request.as_object_mut().unwrap().remove("organization_id");
    let (status, body) = post_json(create_router_for_test(), "/paychecks/compute", request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_other_organization_cannot_see_employee() {
    let mut request = compute_request("emp_001", json!({}));
    request["organization_id"] = json!("org_globex");
    let (status, _) = post_json(create_router_for_test(), "/paychecks/compute", request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inverted_pay_period_returns_400() {
    let mut request = compute_request("emp_001", json!({}));
    request["pay_period"] = json!({ "start_date": "2026-01-31", "end_date": "2026-01-01" });
    let (status, body) = post_json(create_router_for_test(), "/paychecks/compute", request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_negative_input_returns_400() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/paychecks/compute",
        compute_request("emp_001", json!({ "base_salary": "-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

// =============================================================================
// Payroll Runs
// =============================================================================

fn run_request(employees: Value) -> Value {
    json!({
        "organization_id": "org_acme",
        "pay_period": { "start_date": "2026-01-01", "end_date": "2026-01-31" },
        "employees": employees
    })
}

#[tokio::test]
async fn test_payroll_run_reports_failures_without_stopping() {
    let (status, body) = post_json(
        create_router_for_test(),
        "/payroll-runs",
        run_request(json!([
            { "employee_id": "emp_001", "inputs": { "base_salary": "3000" } },
            { "employee_id": "emp_bad" },
            { "employee_id": "emp_003", "inputs": { "hours_worked": "160", "hourly_rate": "25" } }
        ])),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "completed");

    let paid: Vec<&str> = body["paychecks"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["employee_id"].as_str())
        .collect();
    assert_eq!(paid, vec!["emp_001", "emp_003"]);

    let failure = &body["failures"][0];
    assert_eq!(failure["employee_id"], "emp_bad");
    assert_eq!(failure["kind"], "configuration");
    assert_eq!(failure["stage"], "resolving");

    assert_eq!(body["operator_alerts"][0]["employee_ids"], json!(["emp_bad"]));
    assert_eq!(body["skipped"], json!([]));
}

#[tokio::test]
async fn test_second_run_sees_committed_usage() {
    let router = create_router_for_test();
    let request = run_request(json!([
        { "employee_id": "emp_001", "inputs": { "base_salary": "3000" } }
    ]));

    let (_, first) = post_json(router.clone(), "/payroll-runs", request.clone()).await;
    assert_eq!(first["paychecks"][0]["components"]["summary"]["net_pay"], "2824.00");

    // The pension cap is exhausted, so nothing is deducted and tax rises to 460
    let (_, second) = post_json(router, "/payroll-runs", request).await;
    let summary = &second["paychecks"][0]["components"]["summary"];
    assert_eq!(summary["total_deductions"], "0.00");
    assert_eq!(summary["total_taxes"], "460.00");
    assert_eq!(summary["net_pay"], "2840.00");
}

#[tokio::test]
async fn test_payroll_run_blank_organization_returns_400() {
    let mut request = run_request(json!([{ "employee_id": "emp_001" }]));
    request["organization_id"] = json!("");
    let (status, body) = post_json(create_router_for_test(), "/payroll-runs", request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

// =============================================================================
// Engine
// =============================================================================

#[test]
fn test_engine_recompute_is_byte_identical() {
    let engine = ConfigLoader::load("./config/acme").unwrap().engine();
    let request = PaycheckRequest {
        organization_id: "org_acme".to_string(),
        employee_id: "emp_003".to_string(),
        pay_period: PayPeriod {
            start_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            pay_date: None,
        },
        inputs: PeriodInputs {
            hours_worked: decimal("160"),
            hourly_rate: Some(decimal("25")),
            ..PeriodInputs::default()
        },
    };

    let first = engine.compute_paycheck(&request).unwrap();
    let second = engine.compute_paycheck(&request).unwrap();
    assert_eq!(
        serde_json::to_string(&first.components).unwrap(),
        serde_json::to_string(&second.components).unwrap()
    );
    assert_eq!(first.usage_updates, second.usage_updates);
}

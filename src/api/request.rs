//! Request types for the payroll engine API.
//!
//! This module defines the JSON request structures for the `/paychecks/*`
//! and `/payroll-runs` endpoints.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::engine::PaycheckRequest;
use crate::models::{PayPeriod, PeriodInputs};

/// Request body for `/paychecks/compute` and `/paychecks/components`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputePaycheckRequest {
    /// The tenant the employee belongs to.
    pub organization_id: String,
    /// The employee to compute.
    pub employee_id: String,
    /// The pay period for the calculation.
    pub pay_period: PayPeriodRequest,
    /// Period inputs available to formulas.
    #[serde(default)]
    pub inputs: PeriodInputs,
}

/// Pay period information in a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPeriodRequest {
    /// The start date of the pay period (inclusive).
    pub start_date: NaiveDate,
    /// The end date of the pay period (inclusive).
    pub end_date: NaiveDate,
    /// The date the paycheck is paid, if known.
    #[serde(default)]
    pub pay_date: Option<NaiveDate>,
}

impl From<PayPeriodRequest> for PayPeriod {
    fn from(req: PayPeriodRequest) -> Self {
        PayPeriod {
            start_date: req.start_date,
            end_date: req.end_date,
            pay_date: req.pay_date,
        }
    }
}

impl From<ComputePaycheckRequest> for PaycheckRequest {
    fn from(req: ComputePaycheckRequest) -> Self {
        PaycheckRequest {
            organization_id: req.organization_id,
            employee_id: req.employee_id,
            pay_period: req.pay_period.into(),
            inputs: req.inputs,
        }
    }
}

/// Request body for `/payroll-runs`.
///
/// Every employee shares the organization and pay period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollRunRequest {
    /// The tenant being paid.
    pub organization_id: String,
    /// The pay period for every employee.
    pub pay_period: PayPeriodRequest,
    /// The employees to pay, in report order.
    pub employees: Vec<RunEmployeeRequest>,
    /// Overrides the configured concurrency limit for this run.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// One employee in a payroll run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEmployeeRequest {
    /// The employee to pay.
    pub employee_id: String,
    /// Period inputs for this employee.
    #[serde(default)]
    pub inputs: PeriodInputs,
}

impl PayrollRunRequest {
    /// Expands the run into one paycheck request per employee.
    pub fn paycheck_requests(&self) -> Vec<PaycheckRequest> {
        let pay_period: PayPeriod = self.pay_period.clone().into();
        self.employees
            .iter()
            .map(|employee| PaycheckRequest {
                organization_id: self.organization_id.clone(),
                employee_id: employee.employee_id.clone(),
                pay_period: pay_period.clone(),
                inputs: employee.inputs.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_compute_request_deserialization() {
        let json = r#"{
            "organization_id": "org_acme",
            "employee_id": "emp_001",
            "pay_period": {
                "start_date": "2026-01-01",
                "end_date": "2026-01-31"
            },
            "inputs": {
                "base_salary": "3000",
                "hours_worked": "160"
            }
        }"#;

        let request: ComputePaycheckRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.employee_id, "emp_001");
        assert_eq!(request.inputs.base_salary, Decimal::from_str("3000").unwrap());
        assert_eq!(request.pay_period.pay_date, None);
    }

    #[test]
    fn test_inputs_default_when_absent() {
        let json = r#"{
            "organization_id": "org_acme",
            "employee_id": "emp_001",
            "pay_period": { "start_date": "2026-01-01", "end_date": "2026-01-31" }
        }"#;

        let request: ComputePaycheckRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.inputs, PeriodInputs::default());
    }

    #[test]
    fn test_run_request_expands_per_employee() {
        let json = r#"{
            "organization_id": "org_acme",
            "pay_period": { "start_date": "2026-01-01", "end_date": "2026-01-31" },
            "employees": [
                { "employee_id": "emp_002" },
                { "employee_id": "emp_001", "inputs": { "base_salary": "3000" } }
            ]
        }"#;

        let request: PayrollRunRequest = serde_json::from_str(json).unwrap();
        let expanded = request.paycheck_requests();
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].employee_id, "emp_002");
        assert_eq!(expanded[1].organization_id, "org_acme");
        assert_eq!(expanded[1].pay_period.end_date, NaiveDate::from_ymd_opt(2026, 1, 31).unwrap());
    }
}

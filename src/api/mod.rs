//! HTTP API module for the payroll engine.
//!
//! This module provides the REST API endpoints for computing paychecks and
//! running payroll.

mod handlers;
mod request;
mod response;
mod state;

pub use handlers::create_router;
pub use request::{ComputePaycheckRequest, PayPeriodRequest, PayrollRunRequest, RunEmployeeRequest};
pub use response::{ApiError, ApiErrorResponse, HealthResponse};
pub use state::AppState;

//! Liveness plus a glance at the data the API serves.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::api::routes::ApiState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub rows: usize,
    /// First exchange-rate date found on the served rows.
    pub exchange_rate_date: Option<String>,
}

impl HealthResponse {
    pub fn from_state(state: &ApiState) -> Self {
        Self {
            status: "ok",
            rows: state.rows.len(),
            exchange_rate_date: state
                .rows
                .iter()
                .filter_map(|r| r.exchange_rate_date.as_deref())
                .find(|d| !d.is_empty())
                .map(str::to_string),
        }
    }
}

pub async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_state(&state))
}

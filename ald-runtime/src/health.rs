//! Health HTTP endpoint (spec.md §6), a thin axum wrapper over the
//! shared [`ald_common::HealthState`] every component reports into.
//!
//! Grounded on `ob-poc-web`'s `axum::Router` + shared `Arc<AppState>`
//! wiring, scaled down to the one status endpoint this runtime needs.

use std::sync::Arc;

use ald_common::HealthState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new().route(
        "/health",
        get(move || {
            let state = state.clone();
            async move {
                Json(json!({
                    "status": state.status().as_str(),
                    "uptime_seconds": state.uptime_seconds(),
                    "components": {
                        "plc_connected": state.plc_connected(),
                        "db_listen_degraded": state.db_listen_degraded(),
                        "db_reachable": state.db_reachable(),
                        "sampler_consecutive_errors": state.sampler_error_count(),
                    }
                }))
            }
        }),
    )
}

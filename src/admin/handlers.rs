use axum::{
    extract::{Request, State},
    Json,
};
use serde_json::{json, Value};

use crate::admin::auth::operator_context;
use crate::admin::AdminState;

pub async fn get_status() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
    }))
}

/// Aggregate security statistics.
pub async fn get_security_stats(State(state): State<AdminState>, request: Request) -> Json<Value> {
    let stats = state.events.stats();
    state.events.record_audit(
        "security_stats_accessed",
        json!({ "totalEvents": stats.total_events }),
        &operator_context(&request),
    );
    Json(json!({ "success": true, "stats": stats }))
}

/// Wipe in-memory security state. Log files are kept.
pub async fn clear_security_logs(State(state): State<AdminState>, request: Request) -> Json<Value> {
    let cleared = state.events.clear();
    state.events.record_audit(
        "security_logs_cleared",
        json!({ "clearedEvents": cleared }),
        &operator_context(&request),
    );
    Json(json!({
        "success": true,
        "message": "Security logs cleared",
        "clearedEvents": cleared,
    }))
}

//! HTTP request handlers.

use super::AppState;
use crate::stats::{SiteKey, SiteStat, SiteSummary};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SiteRequest {
    pub url: String,
    pub tenant: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub tenant: String,
    pub url: String,
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": if state.monitor.is_shutting_down() { "shutting_down" } else { "ok" },
        "sites": state.monitor.stats().snapshot(None).len(),
    }))
}

pub async fn handle_get_sites(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> impl IntoResponse {
    let result = match &query.tenant {
        Some(tenant) => state.monitor.store().get_tenant_sites(tenant),
        None => state.monitor.store().get_sites(),
    };
    match result {
        Ok(sites) => Json(sites).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_add_site(
    State(state): State<AppState>,
    Json(req): Json<SiteRequest>,
) -> impl IntoResponse {
    let outcome = state.monitor.add_site(&req.url, &req.tenant).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(outcome))
}

pub async fn handle_remove_site(
    State(state): State<AppState>,
    Json(req): Json<SiteRequest>,
) -> impl IntoResponse {
    let outcome = state.monitor.remove_site(&req.url, &req.tenant);
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(outcome))
}

/// One row of the stats listing: the site identity plus its live summary.
#[derive(Debug, Serialize)]
pub struct StatsEntry {
    pub tenant: String,
    pub url: String,
    #[serde(flatten)]
    pub summary: SiteSummary,
}

fn stats_entry((key, summary): (SiteKey, SiteSummary)) -> StatsEntry {
    StatsEntry {
        tenant: key.tenant,
        url: key.url,
        summary,
    }
}

pub async fn handle_get_stats(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> impl IntoResponse {
    let entries: Vec<StatsEntry> = state
        .monitor
        .stats()
        .snapshot(query.tenant.as_deref())
        .into_iter()
        .map(stats_entry)
        .collect();
    Json(entries)
}

/// Persisted history for one site, replayed into the same summary shape the
/// live endpoint serves, plus the raw log rows.
pub async fn handle_get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let logs = match state.monitor.store().get_logs(&query.tenant, &query.url) {
        Ok(logs) => logs,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };
    let caps = state.monitor.stats().caps();
    let summary = SiteStat::replay(&logs, &caps).summary();
    Json(json!({
        "tenant": query.tenant,
        "url": query.url,
        "summary": summary,
        "logs": logs,
    }))
    .into_response()
}

//! Request handlers. Each one is a thin mapping onto `LookupCoordinator`.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditFilter};
use crate::coordinator::{LookupStatus, PersonWithSite};
use crate::model::{CallerIdentity, PersonRecord, Provenance, SiteAssignment};
use crate::server::auth::SessionToken;
use crate::server::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub caller: CallerIdentity,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload?;
    if request.username.trim().is_empty() || request.password.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "username and password are required".to_string(),
        ));
    }

    let (token, caller) = state
        .sessions
        .login(&request.username, &request.password)
        .ok_or_else(|| {
            tracing::warn!(username = %request.username.trim(), "Login refused");
            ApiError::Unauthorized("invalid credentials".to_string())
        })?;

    Ok(Json(LoginResponse { token, caller }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> StatusCode {
    state.sessions.logout(&token);
    tracing::info!(caller = %caller.id, "Session closed");
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct VoterResponse {
    pub person: Option<Arc<PersonRecord>>,
    pub site: Option<SiteAssignment>,
    pub provenance: Vec<Provenance>,
    pub message: &'static str,
}

/// GET /api/voters/id/:number
pub async fn voter_by_id(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(number): Path<String>,
) -> Result<Json<VoterResponse>, ApiError> {
    let result = state.coordinator.resolve_detached(number, caller).await?;

    let message = match (&result.person, &result.site) {
        (Some(_), Some(_)) => "registered person with a polling site",
        (Some(_), None) => "registered person, no polling site on record",
        (None, Some(_)) => "not a registered person, but has a polling site",
        (None, None) => {
            return Err(ApiError::NotFound(
                "no information for this identifying number".to_string(),
            ))
        }
    };

    Ok(Json(VoterResponse {
        person: result.person,
        site: result.site,
        provenance: result.provenance,
        message,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct NameSearchParams {
    #[serde(default)]
    pub with_sites: bool,
}

#[derive(Debug, Serialize)]
pub struct NameSearchResponse {
    pub total: usize,
    pub matches: Vec<PersonWithSite>,
}

/// GET /api/voters/name/:text
pub async fn voters_by_name(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(text): Path<String>,
    params: Result<Query<NameSearchParams>, QueryRejection>,
) -> Result<Json<NameSearchResponse>, ApiError> {
    let Query(params) = params?;
    let records = state.coordinator.search_by_name(&text, &caller)?;
    if records.is_empty() {
        return Err(ApiError::NotFound("no registered person matches that name".to_string()));
    }

    let matches = if params.with_sites {
        state.coordinator.attach_sites(&records).await
    } else {
        records
            .into_iter()
            .map(|person| PersonWithSite { person, site: None })
            .collect()
    };

    Ok(Json(NameSearchResponse {
        total: matches.len(),
        matches,
    }))
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<LookupStatus> {
    Json(state.coordinator.status())
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub total: usize,
    pub entries: Vec<AuditEntry>,
}

/// GET /api/audit
pub async fn audit(
    State(state): State<AppState>,
    filter: Result<Query<AuditFilter>, QueryRejection>,
) -> Result<Json<AuditResponse>, ApiError> {
    let Query(filter) = filter?;
    let entries = state.coordinator.audit_entries(&filter);
    Ok(Json(AuditResponse {
        total: entries.len(),
        entries,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    pub local_records: usize,
    pub users: usize,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.coordinator.status();
    Json(HealthResponse {
        status: "ok",
        store: if status.store_available {
            "connected"
        } else {
            "disconnected"
        },
        local_records: status.local_records,
        users: state.sessions.user_count(),
    })
}

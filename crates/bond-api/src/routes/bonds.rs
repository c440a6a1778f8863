use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bond_common::{ActivityEventType, ActivityLogEntry, Bond, BondId, BondMembership, UserId};
use bond_engine::LeaveOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{parse_id, ApiJson};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct CreateBondRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub bond_id: BondId,
    pub members: BTreeSet<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EmitActivityRequest {
    pub event_type: ActivityEventType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/bonds", get(list_bonds).post(create_bond))
        .route("/bonds/:bond_id", get(get_bond))
        .route("/bonds/:bond_id/join", post(join_bond))
        .route("/bonds/:bond_id/leave", post(leave_bond))
        .route("/bonds/:bond_id/members", get(list_members))
        .route("/bonds/:bond_id/history", get(membership_history))
        .route("/bonds/:bond_id/activity", get(list_activity).post(emit_activity))
}

async fn create_bond(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    ApiJson(request): ApiJson<CreateBondRequest>,
) -> ApiResult<(StatusCode, Json<Bond>)> {
    let bond = state.engine.create_bond(&user, &request.name).await?;
    Ok((StatusCode::CREATED, Json(bond)))
}

async fn list_bonds(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<Bond>>> {
    Ok(Json(state.engine.bonds_for_user(&user).await?))
}

async fn get_bond(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
) -> ApiResult<Json<Bond>> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    Ok(Json(state.engine.get_bond(&bond_id, &user).await?))
}

async fn join_bond(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
) -> ApiResult<(StatusCode, Json<BondMembership>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let membership = state.engine.join(&bond_id, &user).await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

async fn leave_bond(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
) -> ApiResult<Json<LeaveOutcome>> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    Ok(Json(state.engine.leave(&bond_id, &user).await?))
}

async fn list_members(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
) -> ApiResult<Json<MembersResponse>> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let members = state.engine.active_members(&bond_id, &user).await?;
    Ok(Json(MembersResponse { bond_id, members }))
}

async fn membership_history(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
) -> ApiResult<Json<Vec<BondMembership>>> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    Ok(Json(state.engine.membership_history(&bond_id, &user).await?))
}

async fn list_activity(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<Vec<ActivityLogEntry>>> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let entries = state
        .engine
        .activity_for_bond(&bond_id, &user, query.limit)
        .await?;
    Ok(Json(entries))
}

async fn emit_activity(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
    ApiJson(request): ApiJson<EmitActivityRequest>,
) -> ApiResult<(StatusCode, Json<ActivityLogEntry>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let outcome = state
        .engine
        .emit(
            &bond_id,
            &user,
            request.event_type,
            request.payload,
            request.idempotency_key,
        )
        .await?;
    let status = if outcome.newly_recorded {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.entry)))
}

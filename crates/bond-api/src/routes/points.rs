use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use bond_common::{BondId, LedgerEntry, UserId, UserPreferences};
use bond_engine::{BalanceReport, PointsAward, StreakReport};
use serde::Deserialize;

use super::{parse_id, ApiJson};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct AwardRequest {
    pub points: i64,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub cost: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub user_id: UserId,
    pub delta: i64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimezoneRequest {
    pub utc_offset_minutes: i32,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/bonds/:bond_id/tasks/:task_ref/complete", post(complete_task))
        .route(
            "/bonds/:bond_id/achievements/:achievement_ref/unlock",
            post(unlock_achievement),
        )
        .route("/bonds/:bond_id/rewards/:reward_ref/redeem", post(redeem_reward))
        .route("/bonds/:bond_id/check-in", post(check_in))
        .route("/bonds/:bond_id/adjustments", post(adjust_points))
        .route("/points/balance", get(balance))
        .route("/points/streak", get(streak))
        .route("/points/history", get(history))
        .route("/me/timezone", put(set_timezone))
}

/// 201 for a fresh entry, 200 when an idempotency key replayed an earlier one
fn award_response(award: PointsAward) -> (StatusCode, Json<PointsAward>) {
    let status = if award.newly_recorded {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(award))
}

fn idempotency_key(headers: &HeaderMap) -> ApiResult<Option<String>> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        None => Ok(None),
        Some(value) => {
            let key = value
                .to_str()
                .map_err(|_| ApiError::InvalidRequest("idempotency key must be ASCII".to_string()))?
                .trim();
            if key.is_empty() {
                return Err(ApiError::InvalidRequest(
                    "idempotency key must not be blank".to_string(),
                ));
            }
            Ok(Some(key.to_string()))
        }
    }
}

async fn complete_task(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path((bond_id, task_ref)): Path<(String, String)>,
    ApiJson(request): ApiJson<AwardRequest>,
) -> ApiResult<(StatusCode, Json<PointsAward>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let award = state
        .engine
        .complete_task(&bond_id, &user, &task_ref, request.points)
        .await?;
    Ok(award_response(award))
}

async fn unlock_achievement(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path((bond_id, achievement_ref)): Path<(String, String)>,
    ApiJson(request): ApiJson<AwardRequest>,
) -> ApiResult<(StatusCode, Json<PointsAward>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let award = state
        .engine
        .unlock_achievement(&bond_id, &user, &achievement_ref, request.points)
        .await?;
    Ok(award_response(award))
}

async fn redeem_reward(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path((bond_id, reward_ref)): Path<(String, String)>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<RedeemRequest>,
) -> ApiResult<(StatusCode, Json<PointsAward>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let key = idempotency_key(&headers)?;
    let award = state
        .engine
        .redeem_reward(&bond_id, &user, &reward_ref, request.cost, key.as_deref())
        .await?;
    Ok(award_response(award))
}

async fn check_in(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
) -> ApiResult<(StatusCode, Json<PointsAward>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    Ok(award_response(state.engine.check_in(&bond_id, &user).await?))
}

async fn adjust_points(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(bond_id): Path<String>,
    ApiJson(request): ApiJson<AdjustmentRequest>,
) -> ApiResult<(StatusCode, Json<PointsAward>)> {
    let bond_id: BondId = parse_id(&bond_id, "bond")?;
    let award = state
        .engine
        .adjust_points(
            &bond_id,
            &user,
            &request.user_id,
            request.delta,
            request.note.as_deref(),
        )
        .await?;
    Ok(award_response(award))
}

async fn balance(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<BalanceReport>> {
    Ok(Json(state.engine.balance_report(&user).await?))
}

async fn streak(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<StreakReport>> {
    Ok(Json(state.engine.streak_report(&user).await?))
}

async fn history(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    Ok(Json(state.engine.ledger_history(&user).await?))
}

async fn set_timezone(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    ApiJson(request): ApiJson<TimezoneRequest>,
) -> ApiResult<Json<UserPreferences>> {
    let preferences = state
        .engine
        .set_utc_offset(&user, request.utc_offset_minutes)
        .await?;
    Ok(Json(preferences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_idempotency_key_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers).unwrap(), None);

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("  r-1 "));
        assert_eq!(idempotency_key(&headers).unwrap(), Some("r-1".to_string()));

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("   "));
        assert!(matches!(
            idempotency_key(&headers),
            Err(ApiError::InvalidRequest(_))
        ));
    }
}

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use bond_common::{Notification, NotificationId};
use serde::Deserialize;

use super::parse_id;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::SharedState;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/:notification_id/read", post(mark_read))
}

async fn list_notifications(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.engine.notifications_for(&user, query.unread).await?))
}

async fn mark_read(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(notification_id): Path<String>,
) -> ApiResult<Json<Notification>> {
    let notification_id: NotificationId = parse_id(&notification_id, "notification")?;
    Ok(Json(
        state
            .engine
            .mark_notification_read(&user, &notification_id)
            .await?,
    ))
}

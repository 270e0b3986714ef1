use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Form, Json, Router,
};
use time::OffsetDateTime;
use tracing::instrument;

use super::{
    dto::{
        CampaignResponse, CountResponse, LinkQuery, MailForm, MessageResponse, SubscribeForm,
        SubscriberListResponse,
    },
    services::{SubscribeOutcome, Subscriptions},
};
use crate::{
    auth::extractors::require_admin,
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", get(active_count).post(subscribe))
        .route("/active", get(activate))
        .route("/unsubscribe", get(unsubscribe))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/subscribers", get(list_subscribers))
        .route("/subscribers/mail", post(send_campaign))
        .route("/subscribers/:id/mail", post(send_direct))
        .route_layer(middleware::from_fn(require_admin))
}

pub async fn active_count(State(state): State<AppState>) -> ApiResult<Json<CountResponse>> {
    let count = state.subscribers.count_active().await?;
    Ok(Json(CountResponse {
        succeed: true,
        count,
    }))
}

#[instrument(skip(state, form))]
pub async fn subscribe(
    State(state): State<AppState>,
    Form(form): Form<SubscribeForm>,
) -> ApiResult<Json<MessageResponse>> {
    let outcome = Subscriptions::from_state(&state)
        .subscribe(&form.email, OffsetDateTime::now_utc())
        .await?;
    match outcome {
        SubscribeOutcome::Created | SubscribeOutcome::Reactivated | SubscribeOutcome::Resubscribed => {
            Ok(Json(MessageResponse::ok("subscribe succeed")))
        }
        SubscribeOutcome::AlreadyPending => Err(ApiError::AlreadyPending),
    }
}

#[instrument(skip_all)]
pub async fn activate(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> ApiResult<Json<MessageResponse>> {
    Subscriptions::from_state(&state)
        .activate(&query.sid, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(MessageResponse::ok("subscription activated")))
}

#[instrument(skip_all)]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Query(query): Query<LinkQuery>,
) -> ApiResult<Json<MessageResponse>> {
    Subscriptions::from_state(&state)
        .unsubscribe(&query.sid, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(MessageResponse::ok("Unsubscribe succeed.")))
}

#[instrument(skip(state))]
pub async fn list_subscribers(State(state): State<AppState>) -> ApiResult<Json<SubscriberListResponse>> {
    let subscribers = state.subscribers.list().await?;
    let count = state.subscribers.count_active().await?;
    Ok(Json(SubscriberListResponse {
        succeed: true,
        count,
        subscribers,
    }))
}

#[instrument(skip(state, form))]
pub async fn send_campaign(
    State(state): State<AppState>,
    Form(form): Form<MailForm>,
) -> ApiResult<Json<CampaignResponse>> {
    if form.subject.trim().is_empty() || form.content.trim().is_empty() {
        return Err(ApiError::validation("subject and content are required"));
    }
    let report = Subscriptions::from_state(&state)
        .send_campaign(&form.subject, &form.content, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(CampaignResponse {
        succeed: true,
        delivered: report.delivered,
        failed: report.failed,
    }))
}

#[instrument(skip(state, form))]
pub async fn send_direct(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<MailForm>,
) -> ApiResult<Json<MessageResponse>> {
    if form.subject.trim().is_empty() || form.content.trim().is_empty() {
        return Err(ApiError::validation("subject and content are required"));
    }
    Subscriptions::from_state(&state)
        .send_direct(id, &form.subject, &form.content, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(MessageResponse::ok("mail sent")))
}

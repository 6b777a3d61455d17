use crate::dtos::{AssignOrderRequest, ImportOrdersRequest, OrderResponse};
use crate::middleware::Caller;
use crate::orders::{self, CompletionSubmission, NewOrder, OrderUpdate};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn create_order(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<NewOrder>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;

    let order =
        orders::create_order(&state.db, state.geocoder.as_ref(), &input, caller.user_id).await?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(order))))
}

pub async fn update_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(input): Json<OrderUpdate>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;

    let order = orders::update_order(
        &state.db,
        state.geocoder.as_ref(),
        order_id,
        &input,
        caller.user_id,
    )
    .await?;

    Ok(Json(OrderResponse::from(order)))
}

pub async fn assign_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(input): Json<AssignOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;

    let order =
        orders::assign_order(&state.db, order_id, input.technician_id, caller.user_id).await?;

    Ok(Json(OrderResponse::from(order)))
}

pub async fn import_orders(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<ImportOrdersRequest>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;
    input.validate()?;

    let summary = orders::import_orders(
        &state.db,
        state.geocoder.as_ref(),
        &input.orders,
        caller.user_id,
    )
    .await;

    Ok(Json(summary))
}

pub async fn get_order(
    State(state): State<AppState>,
    _caller: Caller,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .db
        .get_order_detail(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))?;

    Ok(Json(detail))
}

pub async fn complete_order(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(submission): Json<CompletionSubmission>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_technician()?;

    let outcome = orders::complete_order(
        &state.db,
        state.resolver.as_ref(),
        order_id,
        caller.user_id,
        &submission,
    )
    .await?;

    Ok(Json(outcome))
}

pub async fn amend_completion(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(submission): Json<CompletionSubmission>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_technician()?;

    let outcome = orders::amend_completion(
        &state.db,
        state.resolver.as_ref(),
        state.amend_policy.as_ref(),
        order_id,
        caller.user_id,
        &submission,
    )
    .await?;

    Ok(Json(outcome))
}

pub async fn admin_edit_completion(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_id): Path<Uuid>,
    Json(submission): Json<CompletionSubmission>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;

    tracing::info!(
        order_id = %order_id,
        editor_id = %caller.user_id,
        role = caller.role.as_str(),
        "Back-office completion edit"
    );

    let outcome = orders::admin_edit_completion(
        &state.db,
        state.resolver.as_ref(),
        order_id,
        caller.user_id,
        &submission,
    )
    .await?;

    Ok(Json(outcome))
}

use crate::dtos::{DefineMaterialRequest, IssueItemRequest, ItemResponse};
use crate::inventory::{intake, ReceiveItem};
use crate::middleware::Caller;
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

async fn commit(tx: sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), AppError> {
    tx.commit()
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e)))
}

pub async fn receive_item(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<ReceiveItem>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;
    input.validate()?;

    let mut tx = state.db.begin().await?;
    let item = intake::receive_item(&mut tx, &input, caller.user_id).await?;
    commit(tx).await?;

    Ok((StatusCode::CREATED, Json(ItemResponse::from(item))))
}

pub async fn issue_item(
    State(state): State<AppState>,
    caller: Caller,
    Path(item_id): Path<Uuid>,
    Json(input): Json<IssueItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;

    let mut tx = state.db.begin().await?;
    let item = intake::issue_item(&mut tx, item_id, input.technician_id, caller.user_id).await?;
    commit(tx).await?;

    Ok(Json(ItemResponse::from(item)))
}

pub async fn item_ledger(
    State(state): State<AppState>,
    _caller: Caller,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if state.db.get_item(item_id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Item {} not found",
            item_id
        )));
    }

    let entries = state.db.item_history(item_id).await?;

    Ok(Json(entries))
}

pub async fn item_projection(
    State(state): State<AppState>,
    _caller: Caller,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.db.verify_projection(item_id).await?;

    Ok(Json(report))
}

pub async fn define_material(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<DefineMaterialRequest>,
) -> Result<impl IntoResponse, AppError> {
    caller.require_back_office()?;
    input.validate()?;

    let material = state
        .db
        .define_material(input.name.trim(), input.unit.trim(), input.unit_price)
        .await?;

    Ok((StatusCode::CREATED, Json(material)))
}

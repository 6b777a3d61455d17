//! Completion orchestrator.
//!
//! One transaction per submission. The three entry points differ only in the
//! [`CompletionMode`] they build; the script below is shared.

use super::service_records;
use super::store;
use super::submission::CompletionSubmission;
use crate::inventory::{collected, equipment, materials, DeviceCategoryResolver};
use crate::models::Order;
use crate::policy::{authorize_amend, AmendPolicy, CompletionMode};
use crate::services::metrics::{record_error, COMPLETIONS_TOTAL};
use crate::services::Database;
use chrono::Utc;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Result of a successful submission. Warnings never block a commit.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub success: bool,
    pub warnings: Vec<String>,
}

/// Preconditions each mode places on the order row.
pub fn check_mode(order: &Order, mode: &CompletionMode) -> Result<(), AppError> {
    match mode {
        CompletionMode::Complete { technician_id } => {
            if order.technician_id != Some(*technician_id) {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "Order {} is not assigned to technician {}",
                    order.order_id,
                    technician_id
                )));
            }
            if !order.status.is_open() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Order {} is already {}; submit an amendment instead",
                    order.order_id,
                    order.status
                )));
            }
        }
        CompletionMode::Amend { grant } => {
            if grant.order_id() != order.order_id
                || order.technician_id != Some(grant.technician_id())
            {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "Amendment grant does not cover order {}",
                    order.order_id
                )));
            }
            if order.status.is_open() {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Order {} has not been completed yet",
                    order.order_id
                )));
            }
        }
        CompletionMode::Admin { .. } => {}
    }

    Ok(())
}

/// First completion by the assigned technician.
pub async fn complete_order(
    db: &Database,
    resolver: &dyn DeviceCategoryResolver,
    order_id: Uuid,
    technician_id: Uuid,
    submission: &CompletionSubmission,
) -> Result<CompletionOutcome, AppError> {
    let mode = CompletionMode::Complete { technician_id };
    submit_completion(db, resolver, order_id, &mode, submission).await
}

/// Technician correction of a closed order, gated by `policy`.
pub async fn amend_completion(
    db: &Database,
    resolver: &dyn DeviceCategoryResolver,
    policy: &dyn AmendPolicy,
    order_id: Uuid,
    technician_id: Uuid,
    submission: &CompletionSubmission,
) -> Result<CompletionOutcome, AppError> {
    let order = db
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))?;

    let grant = authorize_amend(policy, &order, technician_id, Utc::now()).await?;
    let mode = CompletionMode::Amend { grant };
    submit_completion(db, resolver, order_id, &mode, submission).await
}

/// Unrestricted rewrite by an administrator or coordinator.
pub async fn admin_edit_completion(
    db: &Database,
    resolver: &dyn DeviceCategoryResolver,
    order_id: Uuid,
    editor_id: Uuid,
    submission: &CompletionSubmission,
) -> Result<CompletionOutcome, AppError> {
    let mode = CompletionMode::Admin { editor_id };
    submit_completion(db, resolver, order_id, &mode, submission).await
}

/// Validate, then apply a submission atomically.
#[instrument(skip(db, resolver, submission), fields(order_id = %order_id, mode = mode.label()))]
pub async fn submit_completion(
    db: &Database,
    resolver: &dyn DeviceCategoryResolver,
    order_id: Uuid,
    mode: &CompletionMode,
    submission: &CompletionSubmission,
) -> Result<CompletionOutcome, AppError> {
    let result = apply_submission(db, resolver, order_id, mode, submission).await;

    match &result {
        Ok(outcome) => {
            COMPLETIONS_TOTAL
                .with_label_values(&[mode.label(), "success"])
                .inc();
            info!(
                status = %submission.status,
                warnings = outcome.warnings.len(),
                "Completion applied"
            );
        }
        Err(e) => {
            COMPLETIONS_TOTAL
                .with_label_values(&[mode.label(), "error"])
                .inc();
            record_error(e.kind());
            warn!(error = %e, "Completion rejected");
        }
    }

    result
}

async fn apply_submission(
    db: &Database,
    resolver: &dyn DeviceCategoryResolver,
    order_id: Uuid,
    mode: &CompletionMode,
    submission: &CompletionSubmission,
) -> Result<CompletionOutcome, AppError> {
    submission.validate()?;

    // Fail fast before opening a transaction.
    let order = db
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))?;
    check_mode(&order, mode)?;
    submission.check_against(&order)?;

    let mut tx = db.begin().await?;

    // Re-check under the row lock; a concurrent edit may have moved the order.
    let order = store::lock_order(&mut tx, order_id).await?;
    check_mode(&order, mode)?;

    let editor = mode.editor_id();
    let technician_id = mode.acting_technician().or(order.technician_id);
    let mut warnings = Vec::new();

    let updated = store::record_outcome(
        &mut tx,
        order_id,
        submission.status,
        submission.notes.as_deref(),
        submission.failure_reason.as_deref(),
        Utc::now(),
    )
    .await?;

    store::replace_settlements(&mut tx, order_id, &submission.settlement_lines()?).await?;

    let material_outcome = materials::reconcile_materials(
        &mut tx,
        order_id,
        technician_id,
        &submission.used_materials,
    )
    .await?;
    warnings.extend(material_outcome.warnings);

    equipment::reconcile_equipment(&mut tx, order_id, mode, &submission.equipment_ids).await?;

    collected::sync_collected_devices(
        &mut tx,
        order_id,
        editor,
        technician_id,
        &submission.collected_devices,
    )
    .await?;

    service_records::replace_services(&mut tx, resolver, order_id, &submission.services).await?;

    store::append_history(
        &mut tx,
        order_id,
        Some(order.status),
        updated.status,
        editor,
        mode.label(),
        submission
            .failure_reason
            .as_deref()
            .or(submission.notes.as_deref()),
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e)))?;

    Ok(CompletionOutcome {
        success: true,
        warnings,
    })
}

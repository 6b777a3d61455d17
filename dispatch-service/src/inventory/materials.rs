//! Material usage reconciliation against technician virtual stock.

use crate::models::MaterialUsage;
use crate::services::metrics::MATERIAL_DEFICITS_TOTAL;
use serde::Deserialize;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Material consumed on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Validate)]
pub struct UsedMaterial {
    pub material_id: Uuid,
    #[validate(range(
        min = 1,
        max = 100000,
        message = "Material quantity must be between 1 and 100000"
    ))]
    pub quantity: i32,
}

/// Change in usage of one material on one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialChange {
    pub material_id: Uuid,
    pub old_quantity: i32,
    pub new_quantity: i32,
}

impl MaterialChange {
    /// Amount to take from the technician (negative gives stock back).
    pub fn delta(&self) -> i32 {
        self.new_quantity - self.old_quantity
    }
}

/// Pair existing usage with the requested list.
///
/// Duplicate requests for the same material are summed. Materials whose
/// quantity does not change are still listed so the usage rewrite keeps them.
/// Totals that do not fit the stock counter are rejected.
pub fn plan_material_changes(
    existing: &[MaterialUsage],
    requested: &[UsedMaterial],
) -> Result<Vec<MaterialChange>, AppError> {
    let mut changes: BTreeMap<Uuid, MaterialChange> = BTreeMap::new();

    for usage in existing {
        let change = changes.entry(usage.material_id).or_insert(MaterialChange {
            material_id: usage.material_id,
            old_quantity: 0,
            new_quantity: 0,
        });
        change.old_quantity = change
            .old_quantity
            .checked_add(usage.quantity)
            .ok_or_else(|| quantity_overflow(usage.material_id))?;
    }

    for used in requested {
        let change = changes.entry(used.material_id).or_insert(MaterialChange {
            material_id: used.material_id,
            old_quantity: 0,
            new_quantity: 0,
        });
        change.new_quantity = change
            .new_quantity
            .checked_add(used.quantity)
            .ok_or_else(|| quantity_overflow(used.material_id))?;
    }

    for change in changes.values() {
        change
            .new_quantity
            .checked_sub(change.old_quantity)
            .and_then(i32::checked_neg)
            .ok_or_else(|| quantity_overflow(change.material_id))?;
    }

    Ok(changes.into_values().collect())
}

fn quantity_overflow(material_id: Uuid) -> AppError {
    AppError::BadRequest(anyhow::anyhow!(
        "Total quantity of material {} is out of range",
        material_id
    ))
}

pub fn deficit_warning(material_name: &str, technician_id: Uuid, balance: i32) -> String {
    format!(
        "Technician {} is short of {}: balance {}",
        technician_id, material_name, balance
    )
}

#[derive(Debug, Clone, Default)]
pub struct MaterialOutcome {
    pub changes: Vec<MaterialChange>,
    pub warnings: Vec<String>,
}

async fn existing_usage(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Vec<MaterialUsage>, AppError> {
    sqlx::query_as::<_, MaterialUsage>(
        r#"
        SELECT usage_id, order_id, material_id, quantity
        FROM order_material_usage
        WHERE order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get material usage: {}", e)))
}

async fn material_names(
    conn: &mut PgConnection,
    material_ids: &[Uuid],
) -> Result<HashMap<Uuid, String>, AppError> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT material_id, name FROM material_definition WHERE material_id = ANY($1)",
    )
    .bind(material_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get materials: {}", e)))?;

    Ok(rows.into_iter().collect())
}

/// Move `quantity` into a technician's stock and return the new balance.
pub(crate) async fn adjust_stock(
    conn: &mut PgConnection,
    technician_id: Uuid,
    material_id: Uuid,
    quantity: i32,
) -> Result<i32, AppError> {
    sqlx::query_scalar(
        r#"
        INSERT INTO technician_material_stock (technician_id, material_id, quantity)
        VALUES ($1, $2, $3)
        ON CONFLICT (technician_id, material_id)
        DO UPDATE SET quantity = technician_material_stock.quantity + EXCLUDED.quantity,
                      updated_utc = NOW()
        RETURNING quantity
        "#,
    )
    .bind(technician_id)
    .bind(material_id)
    .bind(quantity)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to adjust stock: {}", e)))
}

/// Apply usage deltas to the technician's stock and rewrite the usage rows.
#[instrument(skip(conn, requested), fields(order_id = %order_id))]
pub async fn reconcile_materials(
    conn: &mut PgConnection,
    order_id: Uuid,
    technician_id: Option<Uuid>,
    requested: &[UsedMaterial],
) -> Result<MaterialOutcome, AppError> {
    let existing = existing_usage(conn, order_id).await?;
    let changes = plan_material_changes(&existing, requested)?;

    let ids: Vec<Uuid> = changes.iter().map(|c| c.material_id).collect();
    let names = material_names(conn, &ids).await?;

    let unknown: Vec<String> = requested
        .iter()
        .filter(|used| !names.contains_key(&used.material_id))
        .map(|used| used.material_id.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Materials not found: {}",
            unknown.join(", ")
        )));
    }

    let mut warnings = Vec::new();
    let moved = changes.iter().filter(|c| c.delta() != 0);

    match technician_id {
        Some(technician_id) => {
            for change in moved {
                let balance =
                    adjust_stock(conn, technician_id, change.material_id, -change.delta()).await?;
                if balance < 0 {
                    let name = names
                        .get(&change.material_id)
                        .map(String::as_str)
                        .unwrap_or("unknown material");
                    warn!(
                        technician_id = %technician_id,
                        material_id = %change.material_id,
                        balance = balance,
                        "Technician material stock in deficit"
                    );
                    MATERIAL_DEFICITS_TOTAL.inc();
                    warnings.push(deficit_warning(name, technician_id, balance));
                }
            }
        }
        None => {
            if moved.count() > 0 {
                warn!("Order has no technician; material stock not adjusted");
                warnings.push(
                    "Order has no assigned technician; material stock was not adjusted".to_string(),
                );
            }
        }
    }

    sqlx::query("DELETE FROM order_material_usage WHERE order_id = $1")
        .bind(order_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to clear material usage: {}", e)))?;

    for change in changes.iter().filter(|c| c.new_quantity > 0) {
        sqlx::query(
            r#"
            INSERT INTO order_material_usage (usage_id, order_id, material_id, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(change.material_id)
        .bind(change.new_quantity)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record material usage: {}", e)))?;
    }

    info!(
        materials = changes.len(),
        deficits = warnings.len(),
        "Materials reconciled"
    );

    Ok(MaterialOutcome { changes, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(material_id: Uuid, quantity: i32) -> MaterialUsage {
        MaterialUsage {
            usage_id: Uuid::new_v4(),
            order_id: Uuid::nil(),
            material_id,
            quantity,
        }
    }

    #[test]
    fn first_submission_takes_full_quantity() {
        let cable = Uuid::new_v4();
        let changes = plan_material_changes(
            &[],
            &[UsedMaterial {
                material_id: cable,
                quantity: 12,
            }],
        )
        .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].delta(), 12);
    }

    #[test]
    fn removed_material_is_given_back() {
        let cable = Uuid::new_v4();
        let changes = plan_material_changes(&[usage(cable, 5)], &[]).unwrap();
        assert_eq!(changes[0].delta(), -5);
        assert_eq!(changes[0].new_quantity, 0);
    }

    #[test]
    fn duplicates_are_summed() {
        let clip = Uuid::new_v4();
        let changes = plan_material_changes(
            &[usage(clip, 4)],
            &[
                UsedMaterial {
                    material_id: clip,
                    quantity: 3,
                },
                UsedMaterial {
                    material_id: clip,
                    quantity: 2,
                },
            ],
        )
        .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_quantity, 5);
        assert_eq!(changes[0].delta(), 1);
    }

    #[test]
    fn resubmitting_same_usage_moves_nothing() {
        let cable = Uuid::new_v4();
        let changes = plan_material_changes(
            &[usage(cable, 7)],
            &[UsedMaterial {
                material_id: cable,
                quantity: 7,
            }],
        )
        .unwrap();
        assert!(changes.iter().all(|c| c.delta() == 0));
    }

    #[test]
    fn zero_quantity_fails_validation() {
        let used = UsedMaterial {
            material_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(used.validate().is_err());
    }

    #[test]
    fn quantity_above_ceiling_fails_validation() {
        let used = UsedMaterial {
            material_id: Uuid::new_v4(),
            quantity: 100_001,
        };
        assert!(used.validate().is_err());

        let used = UsedMaterial {
            quantity: 100_000,
            ..used
        };
        assert!(used.validate().is_ok());
    }

    #[test]
    fn duplicate_lines_past_the_counter_are_rejected() {
        let clip = Uuid::new_v4();
        let line = UsedMaterial {
            material_id: clip,
            quantity: i32::MAX,
        };

        let err = plan_material_changes(&[], &[line, line]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn deficit_warning_names_material_and_balance() {
        let tech = Uuid::new_v4();
        let message = deficit_warning("Coax cable", tech, -3);
        assert!(message.contains("Coax cable"));
        assert!(message.contains("-3"));
        assert!(message.contains(&tech.to_string()));
    }
}

//! Bulk order import. Each row commits or fails on its own.

use super::lifecycle::{create_order, NewOrder};
use crate::policy::Geocoder;
use crate::services::metrics::IMPORT_ROWS_TOTAL;
use crate::services::Database;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ImportRowError {
    /// 1-based position in the submitted batch.
    pub row: usize,
    pub order_number: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportRowError>,
}

impl ImportSummary {
    fn record(&mut self, row: usize, input: &NewOrder, result: Result<Uuid, AppError>) {
        let outcome = match result {
            Ok(_) => {
                self.created += 1;
                "created"
            }
            Err(e) => {
                let outcome = match e {
                    AppError::Conflict(_) => {
                        self.skipped += 1;
                        "skipped"
                    }
                    _ => {
                        self.failed += 1;
                        "failed"
                    }
                };
                self.errors.push(ImportRowError {
                    row,
                    order_number: input.order_number.clone(),
                    message: e.to_string(),
                });
                outcome
            }
        };
        IMPORT_ROWS_TOTAL.with_label_values(&[outcome]).inc();
    }
}

/// Create every row in its own transaction and summarize the results.
///
/// Rows that already have an open attempt are counted as skipped; any other
/// failure is counted as failed. Neither stops the batch.
#[instrument(skip(db, geocoder, rows), fields(rows = rows.len()))]
pub async fn import_orders(
    db: &Database,
    geocoder: &dyn Geocoder,
    rows: &[NewOrder],
    imported_by: Uuid,
) -> ImportSummary {
    let mut summary = ImportSummary::default();

    for (index, row) in rows.iter().enumerate() {
        let result = create_order(db, geocoder, row, imported_by)
            .await
            .map(|order| order.order_id);
        if let Err(e) = &result {
            warn!(row = index + 1, error = %e, "Import row rejected");
        }
        summary.record(index + 1, row, result);
    }

    info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        "Order import finished"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;

    fn row(number: &str) -> NewOrder {
        NewOrder {
            order_number: number.to_string(),
            city: "Gdańsk".to_string(),
            street: "Długa 1".to_string(),
            order_type: OrderType::Service,
            technician_id: None,
            notes: None,
        }
    }

    #[test]
    fn summary_separates_duplicates_from_failures() {
        let mut summary = ImportSummary::default();
        summary.record(1, &row("A-1"), Ok(Uuid::new_v4()));
        summary.record(
            2,
            &row("A-1"),
            Err(AppError::Conflict(anyhow::anyhow!("open attempt"))),
        );
        summary.record(
            3,
            &row(""),
            Err(AppError::BadRequest(anyhow::anyhow!("bad row"))),
        );

        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.errors[0].row, 2);
        assert_eq!(summary.errors[1].row, 3);
    }
}

//! Database service for dispatch-service.
//!
//! Owns the pool and the read-side queries. Mutations run inside a
//! transaction obtained from [`Database::begin`] and are implemented by the
//! `inventory` and `orders` engines on a borrowed connection.

use crate::inventory::ledger::{self, item_columns_for, ITEM_COLUMNS};
use crate::models::{
    replay, Custody, InventoryItem, LedgerEntry, MaterialDefinition, MaterialUsage, Order,
    OrderHistory, OrderService, ServiceExtraDevice, SettlementEntry,
};
use crate::orders::store::ORDER_COLUMNS;
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A service record with its extra devices.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDetail {
    #[serde(flatten)]
    pub service: OrderService,
    pub extra_devices: Vec<ServiceExtraDevice>,
}

/// Everything recorded against an order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub equipment: Vec<InventoryItem>,
    pub collected_devices: Vec<InventoryItem>,
    pub materials: Vec<MaterialUsage>,
    pub settlements: Vec<SettlementEntry>,
    pub services: Vec<ServiceDetail>,
    pub history: Vec<OrderHistory>,
}

/// Stored item projection compared against a replay of its ledger.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectionReport {
    pub item_id: Uuid,
    pub stored: Custody,
    pub replayed: Option<Custody>,
    pub entries: usize,
    pub consistent: bool,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "dispatch-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Open a transaction. Dropping it without `commit` rolls everything back.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Order Operations
    // -------------------------------------------------------------------------

    /// Get an order by ID.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order"])
            .start_timer();

        let query = format!(r#"SELECT {ORDER_COLUMNS} FROM "order" WHERE order_id = $1"#);
        let order = sqlx::query_as::<_, Order>(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get order: {}", e)))?;

        timer.observe_duration();

        Ok(order)
    }

    /// Get an order together with all of its completion records.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order_detail(&self, order_id: Uuid) -> Result<Option<OrderDetail>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_order_detail"])
            .start_timer();

        let Some(order) = self.get_order(order_id).await? else {
            return Ok(None);
        };

        let item_query = format!(
            r#"
            SELECT {} FROM inventory_item i
            JOIN order_equipment_link l ON l.item_id = i.item_id
            WHERE l.order_id = $1
            ORDER BY l.linked_utc, i.item_id
            "#,
            item_columns_for("i")
        );
        let linked = sqlx::query_as::<_, InventoryItem>(&item_query)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get equipment: {}", e)))?;

        let (collected_devices, equipment): (Vec<_>, Vec<_>) = linked
            .into_iter()
            .partition(|item| item.state == crate::models::ItemState::CollectedFromClient);

        let materials = sqlx::query_as::<_, MaterialUsage>(
            r#"
            SELECT usage_id, order_id, material_id, quantity
            FROM order_material_usage
            WHERE order_id = $1
            ORDER BY material_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get materials: {}", e)))?;

        let settlements = sqlx::query_as::<_, SettlementEntry>(
            r#"
            SELECT entry_id, order_id, work_code, quantity
            FROM order_settlement_entry
            WHERE order_id = $1
            ORDER BY work_code
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get settlements: {}", e)))?;

        let service_rows = sqlx::query_as::<_, OrderService>(
            r#"
            SELECT service_id, order_id, service_type,
                   device_source, device_item_id, device_category, device_serial,
                   device2_source, device2_item_id, device2_category, device2_serial,
                   download_mbps, upload_mbps, notes
            FROM order_service
            WHERE order_id = $1
            ORDER BY service_type, service_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get services: {}", e)))?;

        let extras = sqlx::query_as::<_, ServiceExtraDevice>(
            r#"
            SELECT e.extra_id, e.service_id, e.source, e.item_id, e.category, e.name, e.serial
            FROM order_service_extra_device e
            JOIN order_service s ON s.service_id = e.service_id
            WHERE s.order_id = $1
            ORDER BY e.extra_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get extra devices: {}", e)))?;

        let services = service_rows
            .into_iter()
            .map(|service| {
                let extra_devices = extras
                    .iter()
                    .filter(|extra| extra.service_id == service.service_id)
                    .cloned()
                    .collect();
                ServiceDetail {
                    service,
                    extra_devices,
                }
            })
            .collect();

        let history = sqlx::query_as::<_, OrderHistory>(
            r#"
            SELECT history_id, order_id, status_before, status_after, changed_by, mode, note, changed_utc
            FROM order_history
            WHERE order_id = $1
            ORDER BY changed_utc, history_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get history: {}", e)))?;

        timer.observe_duration();

        Ok(Some(OrderDetail {
            order,
            equipment,
            collected_devices,
            materials,
            settlements,
            services,
            history,
        }))
    }

    // -------------------------------------------------------------------------
    // Inventory Operations
    // -------------------------------------------------------------------------

    /// Get an item by ID.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn get_item(&self, item_id: Uuid) -> Result<Option<InventoryItem>, AppError> {
        let mut conn = self.acquire().await?;
        ledger::fetch_item(&mut *conn, item_id).await
    }

    /// Get an item by its normalized serial number.
    #[instrument(skip(self))]
    pub async fn get_item_by_serial(
        &self,
        serial_number: &str,
    ) -> Result<Option<InventoryItem>, AppError> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM inventory_item WHERE serial_number = $1");

        sqlx::query_as::<_, InventoryItem>(&query)
            .bind(serial_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get item: {}", e)))
    }

    /// Full ledger of an item, oldest first.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn item_history(&self, item_id: Uuid) -> Result<Vec<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["item_history"])
            .start_timer();

        let mut conn = self.acquire().await?;
        let entries = ledger::item_history(&mut *conn, item_id).await?;

        timer.observe_duration();

        Ok(entries)
    }

    /// Compare an item's stored projection with a replay of its ledger.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn verify_projection(&self, item_id: Uuid) -> Result<ProjectionReport, AppError> {
        let mut conn = self.acquire().await?;

        let item = ledger::fetch_item(&mut *conn, item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Item {} not found", item_id)))?;
        let entries = ledger::item_history(&mut *conn, item_id).await?;

        let stored = item.custody();
        let replayed = replay(&entries);
        let consistent = replayed == Some(stored);

        if !consistent {
            warn!(
                stored_state = %stored.state,
                entries = entries.len(),
                "Item projection diverges from its ledger"
            );
        }

        Ok(ProjectionReport {
            item_id,
            stored,
            replayed,
            entries: entries.len(),
            consistent,
        })
    }

    /// Get a material definition by ID.
    #[instrument(skip(self), fields(material_id = %material_id))]
    pub async fn get_material(
        &self,
        material_id: Uuid,
    ) -> Result<Option<MaterialDefinition>, AppError> {
        sqlx::query_as::<_, MaterialDefinition>(
            r#"
            SELECT material_id, name, unit, unit_price, created_utc
            FROM material_definition
            WHERE material_id = $1
            "#,
        )
        .bind(material_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get material: {}", e)))
    }

    /// Register a material in the catalog.
    #[instrument(skip(self))]
    pub async fn define_material(
        &self,
        name: &str,
        unit: &str,
        unit_price: Decimal,
    ) -> Result<MaterialDefinition, AppError> {
        let material = sqlx::query_as::<_, MaterialDefinition>(
            r#"
            INSERT INTO material_definition (material_id, name, unit, unit_price)
            VALUES ($1, $2, $3, $4)
            RETURNING material_id, name, unit, unit_price, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(unit)
        .bind(unit_price)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to define material: {}", e)))?;

        info!(material_id = %material.material_id, "Material defined");

        Ok(material)
    }

    /// Current virtual stock of one material held by a technician.
    #[instrument(skip(self))]
    pub async fn material_stock(
        &self,
        technician_id: Uuid,
        material_id: Uuid,
    ) -> Result<i32, AppError> {
        let quantity: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT quantity FROM technician_material_stock
            WHERE technician_id = $1 AND material_id = $2
            "#,
        )
        .bind(technician_id)
        .bind(material_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get stock: {}", e)))?;

        Ok(quantity.unwrap_or(0))
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, AppError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e)))
    }
}

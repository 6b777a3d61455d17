//! Technician amendment gate.
//!
//! The policy is evaluated before any transaction opens. Passing it yields an
//! [`AmendGrant`], which is the only way to build [`super::CompletionMode::Amend`].

use crate::models::{Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// Proof that a technician may amend a specific order's completion.
#[derive(Debug, Clone)]
pub struct AmendGrant {
    order_id: Uuid,
    technician_id: Uuid,
    granted_utc: DateTime<Utc>,
}

impl AmendGrant {
    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn technician_id(&self) -> Uuid {
        self.technician_id
    }

    pub fn granted_utc(&self) -> DateTime<Utc> {
        self.granted_utc
    }
}

/// Ownership and time-window check for technician amendments.
#[async_trait]
pub trait AmendPolicy: Send + Sync {
    async fn check(
        &self,
        order: &Order,
        technician_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

/// Run `policy` and mint a grant when it approves.
pub async fn authorize_amend(
    policy: &dyn AmendPolicy,
    order: &Order,
    technician_id: Uuid,
    now: DateTime<Utc>,
) -> Result<AmendGrant, AppError> {
    policy.check(order, technician_id, now).await?;

    Ok(AmendGrant {
        order_id: order.order_id,
        technician_id,
        granted_utc: now,
    })
}

/// Default policy: the assigned technician may amend a closed order for a
/// fixed window after its first completion.
#[derive(Debug, Clone)]
pub struct AmendWindowPolicy {
    window: Duration,
}

impl AmendWindowPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

#[async_trait]
impl AmendPolicy for AmendWindowPolicy {
    async fn check(
        &self,
        order: &Order,
        technician_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if order.technician_id != Some(technician_id) {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Order {} is not assigned to technician {}",
                order.order_id,
                technician_id
            )));
        }

        if !matches!(order.status, OrderStatus::Completed | OrderStatus::NotCompleted) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order {} has not been completed yet",
                order.order_id
            )));
        }

        let completed = order.completed_utc.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "Order {} has no completion time",
                order.order_id
            ))
        })?;

        if now > completed + self.window {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Amendment window for order {} closed at {}",
                order.order_id,
                completed + self.window
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;

    fn completed_order(technician_id: Uuid, completed_utc: DateTime<Utc>) -> Order {
        Order {
            order_id: Uuid::new_v4(),
            order_number: "A-100".to_string(),
            city: "Gdańsk".to_string(),
            street: "Długa 1".to_string(),
            order_number_key: "a-100".to_string(),
            address_key: "gdańsk|długa 1".to_string(),
            order_type: OrderType::Installation,
            status: OrderStatus::Completed,
            attempt_number: 1,
            previous_order_id: None,
            technician_id: Some(technician_id),
            notes: None,
            failure_reason: None,
            latitude: None,
            longitude: None,
            completed_utc: Some(completed_utc),
            created_utc: completed_utc,
            updated_utc: completed_utc,
        }
    }

    #[tokio::test]
    async fn grants_owner_inside_window() {
        let tech = Uuid::new_v4();
        let now = Utc::now();
        let order = completed_order(tech, now - Duration::minutes(30));
        let policy = AmendWindowPolicy::new(Duration::hours(24));

        let grant = authorize_amend(&policy, &order, tech, now).await.unwrap();
        assert_eq!(grant.order_id(), order.order_id);
        assert_eq!(grant.technician_id(), tech);
        assert_eq!(grant.granted_utc(), now);
    }

    #[tokio::test]
    async fn rejects_other_technician() {
        let now = Utc::now();
        let order = completed_order(Uuid::new_v4(), now);
        let policy = AmendWindowPolicy::new(Duration::hours(24));

        let err = authorize_amend(&policy, &order, Uuid::new_v4(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn rejects_after_window() {
        let tech = Uuid::new_v4();
        let now = Utc::now();
        let order = completed_order(tech, now - Duration::hours(25));
        let policy = AmendWindowPolicy::new(Duration::hours(24));

        let err = authorize_amend(&policy, &order, tech, now).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn rejects_open_order() {
        let tech = Uuid::new_v4();
        let now = Utc::now();
        let mut order = completed_order(tech, now);
        order.status = OrderStatus::Assigned;
        order.completed_utc = None;
        let policy = AmendWindowPolicy::new(Duration::hours(24));

        let err = authorize_amend(&policy, &order, tech, now).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}

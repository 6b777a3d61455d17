use async_trait::async_trait;
use serde::Serialize;
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Address lookup collaborator, called only when an order's address changes.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, city: &str, street: &str) -> Result<Option<GeoPoint>, AppError>;
}

/// Geocoder used when no lookup service is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopGeocoder;

#[async_trait]
impl Geocoder for NoopGeocoder {
    async fn geocode(&self, _city: &str, _street: &str) -> Result<Option<GeoPoint>, AppError> {
        Ok(None)
    }
}

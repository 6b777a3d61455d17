use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Role of the caller, as asserted by the trusted front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Technician,
    Coordinator,
    Admin,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "technician" => Some(Self::Technician),
            "coordinator" => Some(Self::Coordinator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Technician => "technician",
            Self::Coordinator => "coordinator",
            Self::Admin => "admin",
        }
    }
}

/// Caller identity extracted from `X-User-ID` and `X-User-Role`.
///
/// The headers are only trusted because the front end in front of this
/// service authenticates the user and overwrites them.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    /// Administrators and coordinators run back-office edits.
    pub fn require_back_office(&self) -> Result<(), AppError> {
        match self.role {
            Role::Admin | Role::Coordinator => Ok(()),
            Role::Technician => Err(AppError::Forbidden(anyhow::anyhow!(
                "Administrator or coordinator role required"
            ))),
        }
    }

    pub fn require_technician(&self) -> Result<(), AppError> {
        match self.role {
            Role::Technician => Ok(()),
            _ => Err(AppError::Forbidden(anyhow::anyhow!(
                "Only technicians submit field completions"
            ))),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
            })?;
        let user_id = Uuid::parse_str(user_id.trim()).map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("Malformed {} header", USER_ID_HEADER))
        })?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing or unknown {} header",
                    USER_ROLE_HEADER
                ))
            })?;

        tracing::debug!(user_id = %user_id, role = role.as_str(), "Caller identified");

        Ok(Caller { user_id, role })
    }
}

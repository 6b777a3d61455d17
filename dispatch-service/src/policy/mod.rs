//! Edit modes and the externally supplied gates around them.

mod amend;
mod geocoder;

pub use amend::{authorize_amend, AmendGrant, AmendPolicy, AmendWindowPolicy};
pub use geocoder::{GeoPoint, Geocoder, NoopGeocoder};

use uuid::Uuid;

/// How a completion submission is being applied.
///
/// Threaded through every reconciler so the three entry points share one script.
#[derive(Debug, Clone)]
pub enum CompletionMode {
    /// First submission by the assigned technician.
    Complete { technician_id: Uuid },
    /// Technician correction inside the window granted by an [`AmendPolicy`].
    Amend { grant: AmendGrant },
    /// Unrestricted rewrite by an administrator or coordinator.
    Admin { editor_id: Uuid },
}

impl CompletionMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "COMPLETE",
            Self::Amend { .. } => "AMEND",
            Self::Admin { .. } => "ADMIN",
        }
    }

    /// Technician acting in the field, if any.
    pub fn acting_technician(&self) -> Option<Uuid> {
        match self {
            Self::Complete { technician_id } => Some(*technician_id),
            Self::Amend { grant } => Some(grant.technician_id()),
            Self::Admin { .. } => None,
        }
    }

    /// Who is recorded as performing the changes.
    pub fn editor_id(&self) -> Uuid {
        match self {
            Self::Complete { technician_id } => *technician_id,
            Self::Amend { grant } => grant.technician_id(),
            Self::Admin { editor_id } => *editor_id,
        }
    }

    /// Administrators may bind any item regardless of custody.
    pub fn binds_any_item(&self) -> bool {
        matches!(self, Self::Admin { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_mode_has_no_field_technician() {
        let editor = Uuid::new_v4();
        let mode = CompletionMode::Admin { editor_id: editor };
        assert_eq!(mode.acting_technician(), None);
        assert_eq!(mode.editor_id(), editor);
        assert!(mode.binds_any_item());
        assert_eq!(mode.label(), "ADMIN");
    }

    #[test]
    fn complete_mode_acts_as_technician() {
        let tech = Uuid::new_v4();
        let mode = CompletionMode::Complete { technician_id: tech };
        assert_eq!(mode.acting_technician(), Some(tech));
        assert_eq!(mode.editor_id(), tech);
        assert!(!mode.binds_any_item());
    }
}

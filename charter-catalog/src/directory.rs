use charter_core::repository::CatalogProvider;
use charter_core::vessel::{AddOn, ScheduleRule, Vessel};
use charter_core::{CoreError, CoreResult};
use std::sync::Arc;
use uuid::Uuid;

/// Read-only lookups over the catalog with the booking flow's validation rules
/// applied (inactive vessels do not exist as far as booking is concerned).
#[derive(Clone)]
pub struct VesselDirectory {
    catalog: Arc<dyn CatalogProvider>,
}

impl VesselDirectory {
    pub fn new(catalog: Arc<dyn CatalogProvider>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogProvider> {
        &self.catalog
    }

    /// Active vessel by public code, else `VesselNotFound`.
    pub async fn active_vessel(&self, code: &str) -> CoreResult<Vessel> {
        match self.catalog.vessel_by_code(code).await? {
            Some(vessel) if vessel.active => Ok(vessel),
            _ => Err(CoreError::VesselNotFound(code.to_string())),
        }
    }

    /// Vessel by id regardless of the active flag; existing reservations
    /// still need their vessel after a deactivation.
    pub async fn vessel_by_id(&self, id: Uuid) -> CoreResult<Vessel> {
        self.catalog
            .vessel_by_id(id)
            .await?
            .ok_or_else(|| CoreError::VesselNotFound(id.to_string()))
    }

    pub fn require_duration(&self, vessel: &Vessel, hours: u32) -> CoreResult<()> {
        if hours == 0 || !vessel.offers_duration(hours) {
            return Err(CoreError::InvalidDuration {
                vessel: vessel.code.clone(),
                hours,
            });
        }
        Ok(())
    }

    pub async fn schedule_for(&self, vessel: &Vessel) -> CoreResult<ScheduleRule> {
        self.catalog
            .schedule_rule(vessel.id)
            .await?
            .ok_or_else(|| CoreError::ScheduleNotConfigured(vessel.code.clone()))
    }

    /// Active add-on by code, else `AddOnNotFound`.
    pub async fn add_on(&self, code: &str) -> CoreResult<AddOn> {
        match self.catalog.add_on_by_code(code).await? {
            Some(add_on) if add_on.active => Ok(add_on),
            _ => Err(CoreError::AddOnNotFound(code.to_string())),
        }
    }
}

use charter_catalog::{candidate_starts, VesselDirectory};
use charter_core::repository::ReservationStore;
use charter_core::{CoreError, CoreResult, TimeRange};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityReport {
    pub vessel_code: String,
    pub date: NaiveDate,
    pub duration_hours: u32,
    pub timezone: String,
    /// Chronological.
    pub slots: Vec<SlotAvailability>,
}

/// Point-in-time slot view. Never locks or reserves; a free slot here can
/// still lose the race at hold time.
#[derive(Clone)]
pub struct AvailabilityEngine {
    directory: VesselDirectory,
    store: Arc<dyn ReservationStore>,
}

impl AvailabilityEngine {
    pub fn new(directory: VesselDirectory, store: Arc<dyn ReservationStore>) -> Self {
        Self { directory, store }
    }

    pub async fn slots(
        &self,
        vessel_code: &str,
        date: NaiveDate,
        duration_hours: u32,
    ) -> CoreResult<AvailabilityReport> {
        let vessel = self.directory.active_vessel(vessel_code).await?;
        self.directory.require_duration(&vessel, duration_hours)?;
        let rule = self.directory.schedule_for(&vessel).await?;

        let candidates = candidate_starts(&rule, date, duration_hours)?
            .into_iter()
            .map(|start| {
                TimeRange::from_hours(start, duration_hours).ok_or_else(|| {
                    CoreError::InvalidDuration {
                        vessel: vessel.code.clone(),
                        hours: duration_hours,
                    }
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let mut report = AvailabilityReport {
            vessel_code: vessel.code.clone(),
            date,
            duration_hours,
            timezone: rule.timezone.to_string(),
            slots: Vec::with_capacity(candidates.len()),
        };

        let (Some(first), Some(last)) = (candidates.first(), candidates.last()) else {
            return Ok(report);
        };
        // Any block type counts here, external ones included.
        let blocks = self
            .store
            .blocks_overlapping(vessel.id, first.hull(last))
            .await?;
        debug!(vessel = %vessel.code, %date, candidates = candidates.len(), blocks = blocks.len(), "Computing availability");

        report.slots = candidates
            .iter()
            .map(|slot| SlotAvailability {
                start_time: slot.start(),
                end_time: slot.end(),
                available: !blocks.iter().any(|b| b.overlaps(slot)),
            })
            .collect();
        Ok(report)
    }
}

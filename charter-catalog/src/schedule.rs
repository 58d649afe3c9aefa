use charter_core::vessel::{ScheduleMode, ScheduleRule};
use charter_core::{CoreError, CoreResult};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Candidate departure instants for `date` (in the vessel's local zone),
/// chronological and deduplicated.
///
/// Rolling windows step by the increment while the charter still returns by
/// `latest_return`; a partial slot is never offered. Local times that do not
/// exist on `date` (spring-forward gap) are skipped.
pub fn candidate_starts(
    rule: &ScheduleRule,
    date: NaiveDate,
    duration_hours: u32,
) -> CoreResult<Vec<DateTime<Utc>>> {
    let mut starts: Vec<DateTime<Utc>> = match &rule.mode {
        ScheduleMode::Fixed { start_times } => start_times
            .iter()
            .filter_map(|t| to_utc(rule.timezone, date.and_time(*t)))
            .collect(),
        ScheduleMode::Rolling {
            earliest_departure,
            latest_return,
            increment_minutes,
        } => {
            if *increment_minutes == 0 {
                return Err(CoreError::ScheduleNotConfigured(format!(
                    "vessel {} has a zero slot increment",
                    rule.vessel_id
                )));
            }
            let step = Duration::minutes(i64::from(*increment_minutes));
            let length = Duration::hours(i64::from(duration_hours));
            let window_end = date.and_time(*latest_return);

            let mut starts = Vec::new();
            let mut cursor = date.and_time(*earliest_departure);
            // Wall-clock comparison against the marina's return time.
            while cursor + length <= window_end {
                if let Some(start) = to_utc(rule.timezone, cursor) {
                    starts.push(start);
                }
                cursor += step;
            }
            starts
        }
    };

    starts.sort();
    starts.dedup();
    Ok(starts)
}

fn to_utc(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

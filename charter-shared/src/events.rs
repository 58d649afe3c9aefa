use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotEventKind {
    Held,
    Confirmed,
    Released,
}

impl SlotEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotEventKind::Held => "held",
            SlotEventKind::Confirmed => "confirmed",
            SlotEventKind::Released => "released",
        }
    }
}

/// Broadcast whenever a vessel interval changes hands, so open availability
/// views can refresh without polling.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SlotEvent {
    pub vessel_id: Uuid,
    pub reservation_id: Uuid,
    pub kind: SlotEventKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub emitted_at: i64,
}

pub mod pii;
pub mod events;

pub use pii::Masked;
pub use events::{SlotEvent, SlotEventKind};

pub mod cache;
pub mod directory;
pub mod pricing;
pub mod schedule;

pub use cache::{CachePolicy, CachedCatalog};
pub use directory::VesselDirectory;
pub use pricing::{add_on_charge, AddOnCharge, BasePrice, PricingResolver};
pub use schedule::candidate_starts;

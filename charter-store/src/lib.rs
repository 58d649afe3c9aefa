pub mod app_config;
pub mod catalog_repo;
pub mod database;
pub mod memory;
pub mod redis_repo;
pub mod reservation_repo;
pub mod stripe;

pub use catalog_repo::PgCatalogProvider;
pub use database::DbClient;
pub use memory::InMemoryStore;
pub use redis_repo::RedisClient;
pub use reservation_repo::PgReservationStore;
pub use stripe::StripeGateway;

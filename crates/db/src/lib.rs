pub mod actions;
pub mod audit;
pub mod connection;
pub mod memory;
pub mod migrations;
pub mod scoped;
pub mod seed;
pub mod sql_store;
pub mod store;

pub use actions::{ActionStore, SqlActionStore};
pub use audit::{AuditStore, SqlAuditStore};
pub use connection::{connect, connect_with_settings, DbPool};
pub use memory::{InMemoryActionStore, InMemoryAuditStore, InMemoryEntityStore};
pub use scoped::ScopedRepository;
pub use seed::{DemoSeedDataset, SeedResult, VerificationResult};
pub use sql_store::SqlEntityStore;
pub use store::{EntityStore, StoreError};

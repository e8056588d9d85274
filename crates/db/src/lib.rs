pub mod connection;
pub mod directory;
pub mod fixtures;
pub mod migrations;
pub mod store;

pub use connection::{open_pool, open_with, DbPool};
pub use directory::SqlMemberDirectory;
pub use fixtures::{DemoSeedDataset, SeedResult, VerificationResult};
pub use store::SqlRequestStore;

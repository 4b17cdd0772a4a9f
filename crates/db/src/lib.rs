pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{seed_demo_dataset, SeedSummary};
pub use repositories::{
    RepositoryError, SqlDocumentRepository, SqlGroupRepository, SqlPrincipalDirectory,
    SqlWorkflowStore,
};

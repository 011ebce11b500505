//! tally-store: metric repositories for tally.
//!
//! The [`Repository`] trait is the only storage contract the rest of the
//! system sees. Two backends implement it with the same merge semantics:
//!
//! - [`InMemoryStore`]: a `RwLock`-guarded map, used by the agent and by
//!   servers running without a database.
//! - [`RelationalStore`]: PostgreSQL via sqlx, with server-side upserts.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

use std::sync::Arc;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use postgres::RelationalStore;
pub use repository::{Repository, render_metrics};

/// Open the repository selected by configuration and bootstrap it.
///
/// A connection string selects PostgreSQL; otherwise the store is in memory.
pub async fn open_repository(database_dsn: Option<&str>) -> StoreResult<Arc<dyn Repository>> {
    let repo: Arc<dyn Repository> = match database_dsn {
        Some(dsn) => Arc::new(RelationalStore::connect(dsn).await?),
        None => Arc::new(InMemoryStore::new()),
    };
    repo.bootstrap().await?;
    Ok(repo)
}

//! PostgreSQL adapters for the convergence pipeline.
//!
//! One newtype adapter per converge_core port trait, all over a shared
//! [`sqlx::PgPool`]. Schema lives in `migrations/0001_convergence.sql`.

pub mod lock;
pub mod rows;
pub mod store;

pub use lock::PgLockStore;
pub use store::{PgBranchStore, PgCommentStore, PgOperationStore, PgReviewStore};

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

/// Connect a pool from a database URL.
pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let opts = PgConnectOptions::from_str(database_url)?;
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

//! Persistence of unit observations
//!
//! Observations are appended to a single `service_status` table, one row per
//! unit per probe. The store actor writes through the [`StorageBackend`] trait,
//! the health aggregation reads through it.
//!
//! ## Backends
//!
//! - **SQLite** ([`sqlite::SqliteBackend`]): embedded database in WAL mode,
//!   schema provisioned by sqlx migrations on open.
//!
//! ## Usage
//!
//! ```no_run
//! use unitwatch::storage::sqlite::SqliteBackend;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./unitwatch.db").await?;
//!     // Hand it to the store actor and the health aggregator
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use schema::{NewStatusRow, StatusRow};

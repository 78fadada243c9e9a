//! Storage backends for the machine registry, telemetry snapshots, alerts
//! and brews
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, survives restarts
//! - **In-Memory**: No persistence, used when no storage is configured and in tests
//!
//! ## Usage
//!
//! ```no_run
//! use coffee_monitoring::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./brewwatch.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{AlertQuery, MachineInfo, MachineRecord, NewAlert, OpenAlertResult};

/// Create the backend selected by the configuration
pub async fn open_backend(config: Option<&StorageConfig>) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        None | Some(StorageConfig::None) => {
            info!("using in-memory storage (nothing survives a restart)");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        Some(StorageConfig::Sqlite { path }) => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        Some(StorageConfig::Sqlite { .. }) => Err(StorageError::ConnectionFailed(
            "SQLite storage requested but the 'storage-sqlite' feature is disabled".to_string(),
        )),
    }
}

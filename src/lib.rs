//! Table engine coordinator.
//!
//! Owns table-id allocation, the writer/reader lease pools, and the
//! boot-time metadata upgrade for a columnar, file-backed table
//! store. The column storage format, query execution, and network
//! surface are external collaborators; this crate treats them as
//! opaque.

pub mod config;
pub mod engine;
pub mod error;
pub mod handles;
pub mod id_allocator;
pub mod maintenance;
pub mod metadata;
pub mod pool;
pub mod security;
pub mod telemetry;
pub mod vfs;
pub mod upgrade;

pub use config::CoordinatorConfig;
pub use engine::{TableEngine, TableEngineBuilder, TableStatus};
pub use error::{CoordinatorError, Result};

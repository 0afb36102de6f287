//! Core plumbing for the consent governance engine
//!
//! This crate provides the key/value storage abstraction the engine persists
//! through, its in-memory and file-backed implementations, and a few runtime
//! helpers (timestamps, tracing setup).

pub mod storage;
pub mod utils;

// Re-export key components
pub use storage::{
    FileStorage, JsonStorage, MemoryStorage, Storage, StorageError, StorageOptions, StorageResult,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing with the given default level.
///
/// `RUST_LOG` takes precedence when set. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

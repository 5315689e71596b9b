/// In-process backend. Nothing survives the process.
pub mod memory;

/// Persistent backend based on redb.
pub mod redb;

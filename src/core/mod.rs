/*!
 * Core Module
 * Error handling, configuration and worker topology shared by all primitives
 */

mod copy_guard;
pub mod config;
pub mod errors;
pub mod shard_manager;

// Re-export for convenience
pub use config::SyncConfig;
pub use errors::*;
pub use shard_manager::ShardManager;

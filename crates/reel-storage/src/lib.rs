//! Local run store.
//!
//! This crate provides:
//! - One directory per pipeline run under a work root
//! - Durable artifact and state writes (temp file, fsync, rename)
//! - Artifact reference resolution
//! - Run listing for resume and status reporting
//! - Retention of published runs (delete, keep or archive)
//! - The scheduler's private state file

pub mod error;
pub mod fs_utils;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use fs_utils::{move_dir, write_atomic};
pub use store::{Disposition, Retention, RunStore};

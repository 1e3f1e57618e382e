//! # nestsync-memory
//!
//! In-memory persistence collaborators for `nestsync-core`.
//!
//! This crate provides:
//! - `MemoryTable`: one entity type's child rows, soft-delete aware
//! - `MemoryAssociations`: many-to-many association sets
//! - JSONL snapshots of a table (portable fixtures)
//!
//! ## Data model
//!
//! ```text
//! JSONL (on disk, one line per row)
//!     ↕  load_jsonl / save_jsonl
//! MemoryTable (rows by id, `deleted_at` marks soft deletes)
//! ```

pub mod associations;
pub mod jsonl;
pub mod table;

pub use associations::MemoryAssociations;
pub use jsonl::{JsonlError, read_rows, read_rows_from_path, write_rows, write_rows_to_path};
pub use table::MemoryTable;

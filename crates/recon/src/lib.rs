//! `postindex-recon`: spreadsheet-to-table reconciliation engine.
//!
//! Syncs a relational table and its dictionary tables against a snapshot
//! of source rows: dictionary labels become surrogate ids, rows are diffed
//! by natural key and applied in chunked batches, and rows the snapshot no
//! longer contains are removed unless they were entered manually.
//! No file-format or CLI dependencies: rows arrive as plain strings.

pub mod address;
pub mod applier;
pub mod dictionary;
pub mod differ;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod model;
pub mod query;
pub mod reclaim;
pub mod schema;
pub mod store;
pub mod translit;
mod usage;
pub mod value;

pub use engine::{Reconciler, SyncOptions, DEFAULT_CHUNK_SIZE};
pub use error::SyncError;
pub use model::{RunCounts, SyncReport};
pub use query::{ListQuery, Page, Record};
pub use reclaim::ReclaimPolicy;
pub use schema::{FieldDescriptor, Language, StorageType, TableSchema, POST_INFO};

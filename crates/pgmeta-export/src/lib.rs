//! Exports discovered catalog objects into a schema-partitioned file tree.
//!
//! [`layout`] decides where each object lands, [`writer`] performs the
//! concurrent writes with race-free directory creation, and [`Engine`]
//! stitches discovery, definition fetching, and export together under one
//! error-escalation policy.

pub mod engine;
pub mod layout;
pub mod writer;

pub use engine::{export_objects, Engine, ExportOutcome};
pub use layout::{plan_layout, target_path, FileTask};
pub use writer::{WriteSummary, Writer, DEFAULT_WRITE_CONCURRENCY};

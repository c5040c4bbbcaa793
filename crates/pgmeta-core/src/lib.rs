//! Core contracts for pgmeta.
//!
//! This crate defines the object model shared by the catalog driver, the
//! exporter, and the CLI, along with the error taxonomy and the
//! connection-string redaction helper. It has no database dependency.

pub mod error;
pub mod redaction;
pub mod types;

pub use error::{Error, Result};
pub use redaction::redact_connection_string;
pub use types::{ObjectDescriptor, ObjectType, OnError, QueryRequest, DATABASE_SCHEMA, MATCH_ALL};

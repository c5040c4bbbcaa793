use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::ObjectType;

/// Boxed source for errors raised by collaborators this crate does not
/// depend on (the database driver lives in `pgmeta-catalog`).
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error taxonomy shared across the pgmeta crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Could not open or ping the database. Always fatal.
    #[error("failed to connect to database")]
    Connection(#[source] BoxedSource),

    /// A requested schema does not exist. Fatal regardless of the error
    /// policy: the caller named something that is not there.
    #[error("schema does not exist: {0}")]
    SchemaNotFound(String),

    /// The object-name pattern did not compile.
    #[error("invalid name pattern {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A catalog query failed. Escalated per the error policy.
    #[error("catalog query failed: {context}")]
    Query {
        context: String,
        #[source]
        source: BoxedSource,
    },

    /// A DDL recipe returned zero rows for an object that was discovered.
    #[error("no definition found for {object_type} {schema}.{name}")]
    NoSuchObject {
        object_type: ObjectType,
        schema: String,
        name: String,
    },

    /// A DDL recipe returned a row whose definition column was NULL.
    #[error("definition is null for {object_type} {schema}.{name}")]
    NullDefinition {
        object_type: ObjectType,
        schema: String,
        name: String,
    },

    /// A type name outside the closed enum was supplied.
    #[error("unsupported object type: {0}")]
    UnsupportedType(String),

    /// An unrecognized error-escalation policy was supplied.
    #[error("invalid on-error option: {0}, valid options are: warn, fail")]
    InvalidPolicy(String),

    /// A filesystem write or directory creation failed.
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// One or more definition fetches failed under the `fail` policy. The
    /// export aborts before any file is written.
    #[error("failed to fetch definitions for {} object(s): {}", .0.len(), .0.join(", "))]
    PartialDefinitionFailure(Vec<String>),

    /// The export was cancelled before completion.
    #[error("export cancelled")]
    Cancelled,

    #[error("io error")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn connection(source: impl Into<BoxedSource>) -> Self {
        Error::Connection(source.into())
    }

    pub fn query(context: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        Error::Query {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Write {
            path: path.into(),
            source,
        }
    }

    /// Innermost message in the source chain, for non-debug rendering.
    pub fn root_cause_message(&self) -> String {
        let mut current: &dyn std::error::Error = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }

    /// The full error chain, one `caused by` line per source, for `--debug`.
    pub fn render_chain(&self) -> String {
        let mut output = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            output.push_str("\n  caused by: ");
            output.push_str(&err.to_string());
            source = err.source();
        }
        output
    }
}

/// Convenience alias used throughout the pgmeta crates.
pub type Result<T> = std::result::Result<T, Error>;

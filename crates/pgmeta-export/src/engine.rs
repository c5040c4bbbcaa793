//! Engine facade: Discover → Fetch definitions → Export.
//!
//! The three phases are strict barriers. Discovery finishes before any
//! definition fetch begins, and all fetches finish before any file is
//! written — which is what lets the `fail` policy reject a run before it
//! touches the filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use pgmeta_catalog::{fetch_definitions, Connector, DefinitionSource, Planner};
use pgmeta_core::{Error, ObjectDescriptor, OnError, QueryRequest, Result};

use crate::layout;
use crate::writer::Writer;

/// Aggregate result of one export run.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    /// Objects found by discovery.
    pub discovered: usize,
    /// Files written.
    pub exported: usize,
    /// Objects whose definition fetch or file write failed (non-empty only
    /// under the `warn` policy; `fail` aborts instead).
    pub failed: Vec<String>,
}

/// Orchestrates planner, fetcher, and writer over one connection pool.
pub struct Engine {
    connector: Connector,
    output_root: PathBuf,
    fetch_concurrency: usize,
    write_concurrency: usize,
}

impl Engine {
    pub fn new(connector: Connector, output_root: impl Into<PathBuf>) -> Self {
        Self {
            connector,
            output_root: output_root.into(),
            fetch_concurrency: 0, // zero selects the stage defaults
            write_concurrency: 0,
        }
    }

    pub fn with_fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n;
        self
    }

    pub fn with_write_concurrency(mut self, n: usize) -> Self {
        self.write_concurrency = n;
        self
    }

    /// Run discovery only. The CLI uses this to list what it found before
    /// committing to the export.
    pub async fn discover(&self, request: &QueryRequest) -> Result<Vec<ObjectDescriptor>> {
        Planner::new(&self.connector).discover(request).await
    }

    /// Fetch definitions for `objects` and write the file tree.
    pub async fn export_objects(
        &self,
        objects: Vec<ObjectDescriptor>,
        on_error: OnError,
        cancel: &CancellationToken,
    ) -> Result<ExportOutcome> {
        export_objects(
            Arc::new(self.connector.clone()),
            objects,
            &self.output_root,
            on_error,
            self.fetch_concurrency,
            self.write_concurrency,
            cancel,
        )
        .await
    }

    /// Full pipeline: discover, fetch, export.
    pub async fn export(
        &self,
        request: &QueryRequest,
        on_error: OnError,
        cancel: &CancellationToken,
    ) -> Result<ExportOutcome> {
        let objects = self.discover(request).await?;
        if objects.is_empty() {
            tracing::info!("no objects found matching the criteria");
            return Ok(ExportOutcome::default());
        }
        self.export_objects(objects, on_error, cancel).await
    }
}

/// Fetch definitions for `objects` and materialize them under `root`.
///
/// Generic over the definition source so the policy logic is testable
/// without a live database.
pub async fn export_objects<S>(
    source: Arc<S>,
    objects: Vec<ObjectDescriptor>,
    root: &Path,
    on_error: OnError,
    fetch_concurrency: usize,
    write_concurrency: usize,
    cancel: &CancellationToken,
) -> Result<ExportOutcome>
where
    S: DefinitionSource + 'static,
{
    let started = Instant::now();
    let discovered = objects.len();

    let (results, failed) =
        fetch_definitions(source, objects, fetch_concurrency, cancel).await;

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    if !failed.is_empty() {
        match on_error {
            OnError::Fail => return Err(Error::PartialDefinitionFailure(failed)),
            OnError::Warn => {
                tracing::warn!(
                    count = failed.len(),
                    objects = failed.join(", "),
                    "failed to fetch definitions, continuing with the rest"
                );
            }
        }
    }

    let retained: Vec<_> = results.into_iter().filter(|o| o.has_definition()).collect();
    let tasks = layout::plan_layout(root, &retained);

    let writer = Writer::new(write_concurrency);
    let summary = writer.write_all(tasks, on_error, cancel).await?;

    let mut failed = failed;
    failed.extend(summary.failed);

    tracing::info!(
        exported = summary.written,
        duration_ms = started.elapsed().as_millis() as u64,
        warnings = !failed.is_empty(),
        "export finished"
    );

    Ok(ExportOutcome {
        discovered,
        exported: summary.written,
        failed,
    })
}

//! Concurrent definition fetching.
//!
//! One task per descriptor missing a definition, gated by a counting
//! semaphore. Tasks never mutate shared descriptors: each returns its slot
//! index and result, and the collector writes the slot after the task
//! completes. Failures are recorded in a shared ledger and logged; they do
//! not fail the batch — the caller decides what a non-empty ledger means.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use pgmeta_core::{ObjectDescriptor, Result};

use crate::connector::Connector;
use crate::ddl;

/// Definition-fetch budget applied when the caller passes zero.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;

/// The narrow capability the exporter and engine need from the catalog
/// driver. Mockable in tests.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Fetch the `CREATE …` statement for one object.
    async fn fetch_definition(&self, object: &ObjectDescriptor) -> Result<String>;
}

#[async_trait]
impl DefinitionSource for Connector {
    async fn fetch_definition(&self, object: &ObjectDescriptor) -> Result<String> {
        ddl::fetch_definition(self.pool(), object).await
    }
}

/// Fill in definitions for every descriptor that lacks one, with at most
/// `concurrency` fetches in flight (`0` applies the default budget).
///
/// The returned vector preserves input order. Slots whose fetch failed keep
/// the input descriptor unchanged, and the failure list carries their
/// `schema.name` keys. Cancellation stops new tasks from starting; in-flight
/// fetches drain.
pub async fn fetch_definitions<S>(
    source: Arc<S>,
    objects: Vec<ObjectDescriptor>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> (Vec<ObjectDescriptor>, Vec<String>)
where
    S: DefinitionSource + 'static,
{
    let concurrency = if concurrency == 0 {
        DEFAULT_FETCH_CONCURRENCY
    } else {
        concurrency
    };

    tracing::info!(
        count = objects.len(),
        concurrency,
        "fetching object definitions"
    );

    let mut results = objects;
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let failed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for (index, object) in results.iter().enumerate() {
        // Constraints arrive from discovery with their definitions set;
        // leave them untouched.
        if object.has_definition() {
            continue;
        }

        let object = object.clone();
        let source = Arc::clone(&source);
        let semaphore = Arc::clone(&semaphore);
        let failed = Arc::clone(&failed);
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, None),
            };
            if cancel.is_cancelled() {
                return (index, None);
            }

            match source.fetch_definition(&object).await {
                Ok(definition) => (index, Some(definition)),
                Err(err) => {
                    tracing::warn!(
                        object_type = %object.object_type,
                        object = %object.qualified_name(),
                        error = %err,
                        "failed to fetch definition"
                    );
                    failed
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(object.qualified_name());
                    (index, None)
                }
            }
        }));
    }

    for handle in handles {
        if let Ok((index, Some(definition))) = handle.await {
            results[index].definition = Some(definition);
        }
    }

    let failed = Arc::try_unwrap(failed)
        .map(|mutex| mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
        .unwrap_or_default();

    (results, failed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pgmeta_core::{Error, ObjectType};

    use super::*;

    /// Source that answers from a fixed set, failing for listed names and
    /// counting every call.
    struct ScriptedSource {
        fail_names: HashSet<String>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(fail_names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fail_names: fail_names.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DefinitionSource for ScriptedSource {
        async fn fetch_definition(&self, object: &ObjectDescriptor) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_names.contains(&object.name) {
                return Err(Error::NoSuchObject {
                    object_type: object.object_type,
                    schema: object.schema.clone(),
                    name: object.name.clone(),
                });
            }
            Ok(format!("CREATE {} {};", object.object_type, object.name))
        }
    }

    fn table(name: &str) -> ObjectDescriptor {
        ObjectDescriptor::new(ObjectType::Table, "public", name)
    }

    #[tokio::test]
    async fn preserves_input_order_and_fills_definitions() {
        let source = ScriptedSource::new(&[]);
        let objects = vec![table("a"), table("b"), table("c")];
        let cancel = CancellationToken::new();

        let (results, failed) = fetch_definitions(source, objects, 2, &cancel).await;

        assert!(failed.is_empty());
        let names: Vec<_> = results.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(results.iter().all(|o| o.has_definition()));
    }

    #[tokio::test]
    async fn failures_land_in_ledger_and_leave_slots_empty() {
        let source = ScriptedSource::new(&["b"]);
        let objects = vec![table("a"), table("b"), table("c")];
        let cancel = CancellationToken::new();

        let (results, failed) = fetch_definitions(source, objects, 4, &cancel).await;

        assert_eq!(failed, vec!["public.b".to_string()]);
        assert!(results[0].has_definition());
        assert!(!results[1].has_definition());
        assert_eq!(results[1], table("b"));
        assert!(results[2].has_definition());
    }

    #[tokio::test]
    async fn pre_filled_definitions_are_not_refetched() {
        let source = ScriptedSource::new(&[]);
        let constraint = ObjectDescriptor::new(ObjectType::Constraint, "public", "users_pkey")
            .with_owning_table("users")
            .with_definition("PRIMARY KEY (id)");
        let objects = vec![constraint.clone(), table("a")];
        let cancel = CancellationToken::new();

        let (results, failed) = fetch_definitions(Arc::clone(&source), objects, 4, &cancel).await;

        assert!(failed.is_empty());
        assert_eq!(results[0].definition.as_deref(), Some("PRIMARY KEY (id)"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_budget_falls_back_to_default() {
        let source = ScriptedSource::new(&[]);
        let objects = vec![table("a")];
        let cancel = CancellationToken::new();

        let (results, failed) = fetch_definitions(source, objects, 0, &cancel).await;

        assert!(failed.is_empty());
        assert!(results[0].has_definition());
    }

    #[tokio::test]
    async fn cancelled_token_stops_new_fetches() {
        let source = ScriptedSource::new(&[]);
        let objects = vec![table("a"), table("b")];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (results, failed) = fetch_definitions(Arc::clone(&source), objects, 1, &cancel).await;

        assert!(failed.is_empty());
        assert!(results.iter().all(|o| !o.has_definition()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}

//! Discovery planning: request resolution, per-type dispatch, name
//! filtering, and deduplication.

use std::collections::HashSet;

use regex::Regex;

use pgmeta_core::{Error, ObjectDescriptor, ObjectType, QueryRequest, Result, MATCH_ALL};

use crate::connector::Connector;
use crate::discovery;

/// Turns a [`QueryRequest`] into the list of objects to export.
pub struct Planner<'a> {
    connector: &'a Connector,
}

impl<'a> Planner<'a> {
    pub fn new(connector: &'a Connector) -> Self {
        Self { connector }
    }

    /// Resolve the requested schema list: the `ALL` sentinel expands to
    /// every non-system schema, an empty list defaults to `public`, and
    /// every explicitly named schema must exist.
    pub async fn resolve_schemas(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.len() == 1 && requested[0] == MATCH_ALL {
            return self.connector.all_schemas().await;
        }

        if requested.is_empty() {
            return Ok(vec!["public".to_string()]);
        }

        for schema in requested {
            if !self.connector.schema_exists(schema).await? {
                return Err(Error::SchemaNotFound(schema.clone()));
            }
        }
        Ok(requested.to_vec())
    }

    /// Run discovery for the request and return deduplicated descriptors.
    /// Constraints come back with their definitions already filled in.
    pub async fn discover(&self, request: &QueryRequest) -> Result<Vec<ObjectDescriptor>> {
        let pattern = compile_pattern(request)?;
        let schemas = self.resolve_schemas(&request.schemas).await?;

        let pool = self.connector.pool();
        let mut objects = Vec::new();

        for schema in &schemas {
            tracing::debug!(schema, "discovering objects");

            if request.wants(ObjectType::Table) || request.wants(ObjectType::View) {
                objects.extend(discovery::tables_and_views(pool, schema).await?);
            }
            for routine in [
                ObjectType::Function,
                ObjectType::Procedure,
                ObjectType::Aggregate,
            ] {
                if request.wants(routine) {
                    objects.extend(discovery::routines(pool, schema, routine).await?);
                }
            }
            if request.wants(ObjectType::Trigger) {
                objects.extend(discovery::triggers(pool, schema).await?);
            }
            if request.wants(ObjectType::Index) {
                objects.extend(discovery::indexes(pool, schema).await?);
            }
            if request.wants(ObjectType::Constraint) {
                objects.extend(discovery::constraints(pool, schema).await?);
            }
            if request.wants(ObjectType::Sequence) {
                objects.extend(discovery::sequences(pool, schema).await?);
            }
            if request.wants(ObjectType::MaterializedView) {
                objects.extend(discovery::materialized_views(pool, schema).await?);
            }
            if request.wants(ObjectType::Policy) {
                objects.extend(discovery::policies(pool, schema).await?);
            }
            if request.wants(ObjectType::Extension) {
                objects.extend(discovery::extensions(pool, schema).await?);
            }
            if request.wants(ObjectType::Rule) {
                objects.extend(discovery::rules(pool, schema).await?);
            }
        }

        // Database-level objects are discovered once per run, not per schema.
        if request.wants(ObjectType::Publication) {
            objects.extend(discovery::publications(pool).await?);
        }
        if request.wants(ObjectType::Subscription) {
            objects.extend(discovery::subscriptions(pool).await?);
        }

        let objects = retain_matching(objects, request, &pattern);
        tracing::info!(count = objects.len(), "discovery finished");
        Ok(objects)
    }
}

/// Compile the request's name pattern, translating the `ALL` sentinel.
pub(crate) fn compile_pattern(request: &QueryRequest) -> Result<Regex> {
    let source = request.pattern_source();
    Regex::new(source).map_err(|source| Error::InvalidPattern {
        pattern: request.name_pattern.clone(),
        source,
    })
}

/// Keep objects whose type was requested and whose name matches the
/// compiled pattern, deduplicated by `(type, schema, name)` in first-seen
/// order. The type check matters for the shared table/view query, which
/// returns both kinds even when only one was asked for.
fn retain_matching(
    objects: Vec<ObjectDescriptor>,
    request: &QueryRequest,
    pattern: &Regex,
) -> Vec<ObjectDescriptor> {
    let mut seen: HashSet<(ObjectType, String, String)> = HashSet::new();
    objects
        .into_iter()
        .filter(|object| request.wants(object.object_type) && pattern.is_match(&object.name))
        .filter(|object| {
            seen.insert((
                object.object_type,
                object.schema.clone(),
                object.name.clone(),
            ))
        })
        .collect()
}

//! Per-type discovery queries against the PostgreSQL system catalogs.
//!
//! Each function returns bare descriptors for one object type in one schema
//! (or, for database-level types, in the whole database). Name filtering and
//! deduplication happen in the planner; only constraints carry a definition
//! out of discovery, because `pg_get_constraintdef` is available in the same
//! catalog row.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use pgmeta_core::{Error, ObjectDescriptor, ObjectType, Result, DATABASE_SCHEMA};

fn query_error<'a>(what: &'a str, schema: &'a str) -> impl FnOnce(sqlx::Error) -> Error + 'a {
    move |err| Error::query(format!("listing {what} in schema {schema}"), err)
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>>(
    row: &'r PgRow,
    column: &str,
    what: &str,
) -> Result<T> {
    row.try_get(column)
        .map_err(|err| Error::query(format!("decoding {what} row"), err))
}

/// Tables and views share one query over `information_schema.tables`; the
/// planner keeps only the kinds the request asked for.
pub(crate) async fn tables_and_views(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT table_type, table_schema, table_name
        FROM information_schema.tables
        WHERE table_schema = ($1)::text
        AND table_type IN ('BASE TABLE', 'VIEW')
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("tables and views", schema))?;

    rows.iter()
        .map(|row| {
            let kind: String = get(row, "table_type", "table/view")?;
            let object_type = if kind == "BASE TABLE" {
                ObjectType::Table
            } else {
                ObjectType::View
            };
            Ok(ObjectDescriptor::new(
                object_type,
                get::<String>(row, "table_schema", "table/view")?,
                get::<String>(row, "table_name", "table/view")?,
            ))
        })
        .collect()
}

/// `pg_proc` rows by kind: `'f'` functions, `'p'` procedures, `'a'`
/// aggregates.
pub(crate) async fn routines(
    pool: &PgPool,
    schema: &str,
    object_type: ObjectType,
) -> Result<Vec<ObjectDescriptor>> {
    let prokind = match object_type {
        ObjectType::Function => "f",
        ObjectType::Procedure => "p",
        ObjectType::Aggregate => "a",
        other => return Err(Error::UnsupportedType(other.to_string())),
    };

    let rows = sqlx::query(
        r#"
        SELECT n.nspname AS schema, p.proname AS name
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE n.nspname = ($1)::text
        AND p.prokind = ($2)::"char"
        "#,
    )
    .bind(schema)
    .bind(prokind)
    .fetch_all(pool)
    .await
    .map_err(query_error(object_type.plural_dir(), schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                object_type,
                get::<String>(row, "schema", "routine")?,
                get::<String>(row, "name", "routine")?,
            ))
        })
        .collect()
}

pub(crate) async fn triggers(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT n.nspname AS schema, t.tgname AS name, c.relname AS table_name
        FROM pg_trigger t
        JOIN pg_class c ON t.tgrelid = c.oid
        JOIN pg_namespace n ON c.relnamespace = n.oid
        WHERE n.nspname = ($1)::text
        AND NOT t.tgisinternal
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("triggers", schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Trigger,
                get::<String>(row, "schema", "trigger")?,
                get::<String>(row, "name", "trigger")?,
            )
            .with_owning_table(get::<String>(row, "table_name", "trigger")?))
        })
        .collect()
}

pub(crate) async fn indexes(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT n.nspname AS schema, c.relname AS name, t.relname AS table_name
        FROM pg_index i
        JOIN pg_class c ON c.oid = i.indexrelid
        JOIN pg_class t ON t.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = ($1)::text
        AND t.relkind = 'r'
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("indexes", schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Index,
                get::<String>(row, "schema", "index")?,
                get::<String>(row, "name", "index")?,
            )
            .with_owning_table(get::<String>(row, "table_name", "index")?))
        })
        .collect()
}

/// Constraints are the one type whose definition is collected eagerly:
/// `pg_get_constraintdef` is already available in the discovery row.
pub(crate) async fn constraints(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT
            n.nspname AS schema,
            c.conname AS name,
            rel.relname AS table_name,
            pg_get_constraintdef(c.oid) AS definition
        FROM pg_constraint c
        JOIN pg_class rel ON rel.oid = c.conrelid
        JOIN pg_namespace n ON n.oid = rel.relnamespace
        WHERE n.nspname = ($1)::text
        AND c.contype IN ('p', 'f', 'u', 'c')
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("constraints", schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Constraint,
                get::<String>(row, "schema", "constraint")?,
                get::<String>(row, "name", "constraint")?,
            )
            .with_owning_table(get::<String>(row, "table_name", "constraint")?)
            .with_definition(get::<String>(row, "definition", "constraint")?))
        })
        .collect()
}

/// Sequences, with the owning table resolved through `pg_depend` when the
/// sequence is owned (`deptype = 'a'`, as created by serial columns and
/// `OWNED BY`).
pub(crate) async fn sequences(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT s.sequence_schema AS schema, s.sequence_name AS name, t.relname AS table_name
        FROM information_schema.sequences s
        LEFT JOIN (
            SELECT
                n.nspname AS sequence_schema,
                c.relname AS sequence_name,
                table_c.relname AS relname
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_depend d ON d.objid = c.oid
            JOIN pg_class table_c ON d.refobjid = table_c.oid
            WHERE c.relkind = 'S'
            AND d.deptype = 'a'
            AND d.refclassid = 'pg_class'::regclass
        ) t USING (sequence_schema, sequence_name)
        WHERE s.sequence_schema = ($1)::text
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("sequences", schema))?;

    rows.iter()
        .map(|row| {
            let mut object = ObjectDescriptor::new(
                ObjectType::Sequence,
                get::<String>(row, "schema", "sequence")?,
                get::<String>(row, "name", "sequence")?,
            );
            if let Some(table) = get::<Option<String>>(row, "table_name", "sequence")? {
                object = object.with_owning_table(table);
            }
            Ok(object)
        })
        .collect()
}

pub(crate) async fn materialized_views(
    pool: &PgPool,
    schema: &str,
) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT n.nspname AS schema, c.relname AS name
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind = 'm'
        AND n.nspname = ($1)::text
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("materialized views", schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::MaterializedView,
                get::<String>(row, "schema", "materialized view")?,
                get::<String>(row, "name", "materialized view")?,
            ))
        })
        .collect()
}

pub(crate) async fn policies(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT n.nspname AS schema, pol.polname AS name, c.relname AS table_name
        FROM pg_policy pol
        JOIN pg_class c ON pol.polrelid = c.oid
        JOIN pg_namespace n ON c.relnamespace = n.oid
        WHERE n.nspname = ($1)::text
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("policies", schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Policy,
                get::<String>(row, "schema", "policy")?,
                get::<String>(row, "name", "policy")?,
            )
            .with_owning_table(get::<String>(row, "table_name", "policy")?))
        })
        .collect()
}

pub(crate) async fn extensions(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT n.nspname AS schema, e.extname AS name
        FROM pg_extension e
        JOIN pg_namespace n ON n.oid = e.extnamespace
        WHERE n.nspname = ($1)::text
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("extensions", schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Extension,
                get::<String>(row, "schema", "extension")?,
                get::<String>(row, "name", "extension")?,
            ))
        })
        .collect()
}

/// Rewrite rules, excluding the implicit `_RETURN` rule every view carries.
pub(crate) async fn rules(pool: &PgPool, schema: &str) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query(
        r#"
        SELECT n.nspname AS schema, r.rulename AS name, c.relname AS table_name
        FROM pg_rewrite r
        JOIN pg_class c ON r.ev_class = c.oid
        JOIN pg_namespace n ON c.relnamespace = n.oid
        WHERE n.nspname = ($1)::text
        AND r.rulename != '_RETURN'
        "#,
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(query_error("rules", schema))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Rule,
                get::<String>(row, "schema", "rule")?,
                get::<String>(row, "name", "rule")?,
            )
            .with_owning_table(get::<String>(row, "table_name", "rule")?))
        })
        .collect()
}

/// Publications are database-wide; they land in the synthetic `postgres`
/// schema bucket so the exporter's partitioning stays uniform.
pub(crate) async fn publications(pool: &PgPool) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query("SELECT pubname AS name FROM pg_publication")
        .fetch_all(pool)
        .await
        .map_err(|err| Error::query("listing publications", err))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Publication,
                DATABASE_SCHEMA,
                get::<String>(row, "name", "publication")?,
            ))
        })
        .collect()
}

pub(crate) async fn subscriptions(pool: &PgPool) -> Result<Vec<ObjectDescriptor>> {
    let rows = sqlx::query("SELECT subname AS name FROM pg_subscription")
        .fetch_all(pool)
        .await
        .map_err(|err| Error::query("listing subscriptions", err))?;

    rows.iter()
        .map(|row| {
            Ok(ObjectDescriptor::new(
                ObjectType::Subscription,
                DATABASE_SCHEMA,
                get::<String>(row, "name", "subscription")?,
            ))
        })
        .collect()
}

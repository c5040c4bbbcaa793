//! End-to-end export against a live PostgreSQL database.
//!
//! Requires `TEST_DATABASE_URL` (or `DATABASE_URL`) pointing at a database
//! the test may freely create and drop a `pgmeta_it` schema in. Skipped
//! when neither variable is set.

use std::env;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pgmeta_catalog::Connector;
use pgmeta_core::{ObjectType, OnError, QueryRequest};
use pgmeta_export::Engine;

const SCHEMA: &str = "pgmeta_it";

const FIXTURE: &[&str] = &[
    "DROP SCHEMA IF EXISTS pgmeta_it CASCADE",
    "CREATE SCHEMA pgmeta_it",
    "CREATE TABLE pgmeta_it.users (
        id integer PRIMARY KEY,
        email text NOT NULL
    )",
    "CREATE TABLE pgmeta_it.orders (
        id integer PRIMARY KEY,
        user_id integer REFERENCES pgmeta_it.users (id) ON DELETE CASCADE
    )",
    "CREATE TABLE pgmeta_it.\"Orders2\" (id integer NOT NULL)",
    "CREATE INDEX users_email_idx ON pgmeta_it.users (email)",
    "CREATE VIEW pgmeta_it.active_users AS SELECT id, email FROM pgmeta_it.users",
];

fn database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok()
}

async fn prepare(url: &str) -> Result<()> {
    let pool = sqlx::PgPool::connect(url)
        .await
        .context("connecting fixture pool")?;
    for statement in FIXTURE {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .with_context(|| format!("executing fixture: {statement}"))?;
    }
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn exports_a_live_schema_tree() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL to run");
        return Ok(());
    };

    prepare(&url).await?;
    let connector = Connector::connect(&url).await.context("connecting")?;

    let out = tempfile::tempdir()?;
    let engine = Engine::new(connector.clone(), out.path());
    let cancel = CancellationToken::new();

    let request = QueryRequest {
        types: Vec::new(),
        schemas: vec![SCHEMA.to_string()],
        name_pattern: "ALL".to_string(),
    };

    let outcome = engine.export(&request, OnError::Warn, &cancel).await?;
    assert!(outcome.discovered > 0);
    assert!(outcome.exported > 0);

    let users_sql =
        std::fs::read_to_string(out.path().join("pgmeta_it/tables/users/table.sql"))?;
    assert!(users_sql.starts_with("CREATE TABLE pgmeta_it.users ("));
    assert!(users_sql.contains("id integer NOT NULL"));
    assert!(users_sql.contains("email text NOT NULL"));
    assert!(users_sql.contains("PRIMARY KEY (id)"));

    // Mixed-case identifiers keep their case in paths and are quoted in DDL.
    let orders2_sql =
        std::fs::read_to_string(out.path().join("pgmeta_it/tables/Orders2/table.sql"))?;
    assert!(orders2_sql.starts_with("CREATE TABLE pgmeta_it.\"Orders2\" ("));

    // The FK on orders.user_id is rendered inline on the column line.
    let orders_sql =
        std::fs::read_to_string(out.path().join("pgmeta_it/tables/orders/table.sql"))?;
    assert!(orders_sql.contains("fk_tbl_users_col_user_id"));
    assert!(orders_sql.contains("on delete cascade"));

    // The index nests under its owning table.
    let index_sql = std::fs::read_to_string(
        out.path()
            .join("pgmeta_it/tables/users/indexes/users_email_idx.sql"),
    )?;
    assert!(index_sql.starts_with("CREATE"));

    // The view is standalone at schema level.
    assert!(out.path().join("pgmeta_it/views/active_users.sql").exists());

    connector.close().await;
    Ok(())
}

#[tokio::test]
async fn repeated_exports_are_byte_identical() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL to run");
        return Ok(());
    };

    prepare(&url).await?;
    let connector = Connector::connect(&url).await.context("connecting")?;

    let request = QueryRequest {
        types: vec![ObjectType::Table, ObjectType::Index, ObjectType::Constraint],
        schemas: vec![SCHEMA.to_string()],
        name_pattern: "ALL".to_string(),
    };
    let cancel = CancellationToken::new();

    let first = tempfile::tempdir()?;
    let second = tempfile::tempdir()?;
    Engine::new(connector.clone(), first.path())
        .export(&request, OnError::Fail, &cancel)
        .await?;
    Engine::new(connector.clone(), second.path())
        .export(&request, OnError::Fail, &cancel)
        .await?;

    let users_first =
        std::fs::read_to_string(first.path().join("pgmeta_it/tables/users/table.sql"))?;
    let users_second =
        std::fs::read_to_string(second.path().join("pgmeta_it/tables/users/table.sql"))?;
    assert_eq!(users_first, users_second);

    connector.close().await;
    Ok(())
}

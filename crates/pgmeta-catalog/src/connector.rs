use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use pgmeta_core::{Error, Result};

const MAX_CONNECTIONS: u32 = 25;
const MIN_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the pooled connection to the target database. Cheap to clone; all
/// clones share the same pool.
#[derive(Debug, Clone)]
pub struct Connector {
    pool: PgPool,
}

impl Connector {
    /// Open a pool against `url` and verify it with a ping. Accepts both
    /// `postgres://` URLs and libpq key=value connection strings.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .min_connections(MIN_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await
            .map_err(Error::connection)?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(Error::connection)?;

        tracing::info!("connected to database");
        Ok(Self { pool })
    }

    /// Wrap a pre-configured pool. Used by tests and embedders.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        tracing::debug!("closing database connection pool");
        self.pool.close().await;
    }

    /// Whether `schema` exists in the target database.
    pub async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.schemata
                WHERE schema_name = ($1)::text
            )
            "#,
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| Error::query(format!("checking whether schema {schema} exists"), err))?;

        row.try_get(0)
            .map_err(|err| Error::query(format!("checking whether schema {schema} exists"), err))
    }

    /// All non-system schemas, sorted by name.
    pub async fn all_schemas(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT schema_name
            FROM information_schema.schemata
            WHERE schema_name NOT LIKE 'pg_%'
            AND schema_name != 'information_schema'
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| Error::query("listing schemas", err))?;

        rows.into_iter()
            .map(|row| {
                row.try_get("schema_name")
                    .map_err(|err| Error::query("listing schemas", err))
            })
            .collect()
    }
}

//! Test harness for database repository testing
//!
//! - SQLite: in-memory databases with real migrations
//! - PostgreSQL: a shared testcontainers instance with one schema per test

#[cfg(feature = "database-sqlite")]
use sqlx::SqlitePool;

/// Create an in-memory SQLite pool for testing
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Run SQLite migrations on the pool
#[cfg(feature = "database-sqlite")]
pub async fn run_sqlite_migrations(pool: &SqlitePool) {
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(pool)
        .await
        .expect("Failed to run SQLite migrations");
}

/// A migrated in-memory SQLite `DbPool`.
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_db() -> crate::db::DbPool {
    let pool = create_sqlite_pool().await;
    run_sqlite_migrations(&pool).await;
    crate::db::DbPool::from_sqlite(pool)
}

/// A retention-capable release with one preset script.
pub fn retention_release(plugin_id: &str, version: &str) -> crate::models::PluginRelease {
    crate::models::PluginRelease {
        plugin_id: plugin_id.to_string(),
        version: version.to_string(),
        name: format!("{plugin_id} exporter"),
        description: Some("Exports telemetry".to_string()),
        logo: None,
        retention_enabled: true,
        configurations: [("API_KEY".to_string(), "Collector API key".to_string())].into(),
        documentation_url: Some("https://docs.example.com".to_string()),
        default_export_url: Some(format!("https://{plugin_id}.example.com/{version}")),
        allow_custom_export_url: true,
        preset_scripts: vec![crate::models::PresetScript {
            name: format!("{plugin_id} spans {version}"),
            description: "Exports spans".to_string(),
            default_frequency_s: 60,
            script: format!("# {plugin_id} {version}\nimport px"),
        }],
    }
}

/// PostgreSQL test harness using testcontainers
#[cfg(all(test, feature = "database-postgres"))]
pub mod postgres {
    use std::sync::OnceLock;

    use sqlx::PgPool;
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    struct SharedContainer {
        #[allow(dead_code)] // keeps the container alive
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    static SHARED_CONTAINER: OnceLock<OnceCell<SharedContainer>> = OnceLock::new();

    async fn get_shared_container() -> &'static SharedContainer {
        let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
        cell.get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("17-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            SharedContainer {
                container,
                connection_string: format!(
                    "postgres://postgres:postgres@{}:{}/postgres",
                    host, port
                ),
            }
        })
        .await
    }

    /// Create a pool bound to a fresh schema in the shared container.
    pub async fn create_isolated_postgres_pool() -> PgPool {
        let shared = get_shared_container().await;

        let admin_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&shared.connection_string)
            .await
            .expect("Failed to connect to PostgreSQL");

        let schema_name = format!("test_{}", uuid::Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema_name))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test schema");

        let isolated_url = format!(
            "{}?options=-c search_path={}",
            shared.connection_string, schema_name
        );

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&isolated_url)
            .await
            .expect("Failed to connect to isolated schema")
    }

    pub async fn run_postgres_migrations(pool: &PgPool) {
        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(pool)
            .await
            .expect("Failed to run PostgreSQL migrations");
    }
}

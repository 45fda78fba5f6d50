use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    crypto::{self, FieldCipher},
    db::{
        error::{DbError, DbResult},
        repos::{RetentionPluginRepo, RetentionPluginTx, latest_per_plugin},
    },
    models::{
        EnabledPlugin, OrgPluginConfig, PluginKind, PluginRelease, PluginSummary, PresetScript,
        RetentionScript,
    },
};

const RELEASE_COLUMNS: &str = r#"
    r.id, r.version, r.name, r.description, r.logo, r.data_retention_enabled,
    d.configurations, d.preset_scripts, d.documentation_url, d.default_export_url,
    d.allow_custom_export_url
"#;

const SCRIPT_COLUMNS: &str = r#"
    s.org_id, s.script_id, s.plugin_id, s.script_name, s.description, s.is_preset, s.export_url
"#;

pub struct PostgresRetentionPluginRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRetentionPluginRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }
}

fn parse_release(row: &PgRow) -> DbResult<PluginRelease> {
    let configurations: Option<serde_json::Value> = row.get("configurations");
    let preset_scripts: Option<serde_json::Value> = row.get("preset_scripts");
    let preset_scripts: Vec<PresetScript> = match preset_scripts {
        Some(json) => serde_json::from_value(json)?,
        None => Vec::new(),
    };

    Ok(PluginRelease {
        plugin_id: row.get("id"),
        version: row.get("version"),
        name: row.get("name"),
        description: row.get("description"),
        logo: row.get("logo"),
        retention_enabled: row.get("data_retention_enabled"),
        configurations: match configurations {
            Some(json) => serde_json::from_value(json)?,
            None => Default::default(),
        },
        documentation_url: row.get("documentation_url"),
        default_export_url: row.get("default_export_url"),
        allow_custom_export_url: row
            .get::<Option<bool>, _>("allow_custom_export_url")
            .unwrap_or(false),
        preset_scripts,
    })
}

fn parse_org_config(row: &PgRow, cipher: &dyn FieldCipher) -> DbResult<OrgPluginConfig> {
    let configurations: Option<Vec<u8>> = row.get("configurations");
    let custom_export_url: Option<Vec<u8>> = row.get("custom_export_url");

    Ok(OrgPluginConfig {
        org_id: row.get("org_id"),
        plugin_id: row.get("plugin_id"),
        version: row.get("version"),
        configurations: crypto::open_configurations(configurations.as_deref(), cipher)?,
        custom_export_url: crypto::open_str(custom_export_url.as_deref(), cipher)?,
    })
}

fn parse_script(row: &PgRow, cipher: &dyn FieldCipher) -> DbResult<RetentionScript> {
    let export_url: Option<Vec<u8>> = row.get("export_url");

    Ok(RetentionScript {
        org_id: row.get("org_id"),
        script_id: row.get("script_id"),
        plugin_id: row.get("plugin_id"),
        script_name: row.get("script_name"),
        description: row.get("description"),
        is_preset: row.get("is_preset"),
        export_url: crypto::open_str(export_url.as_deref(), cipher)?,
    })
}

async fn fetch_release(
    conn: &mut PgConnection,
    plugin_id: &str,
    version: &str,
) -> DbResult<Option<PluginRelease>> {
    let query = format!(
        r#"
        SELECT {RELEASE_COLUMNS}
        FROM plugin_releases r
        LEFT JOIN data_retention_plugin_releases d
            ON d.plugin_id = r.id AND d.version = r.version
        WHERE r.id = $1 AND r.version = $2
        "#
    );
    let row = sqlx::query(&query)
        .bind(plugin_id)
        .bind(version)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(parse_release).transpose()
}

#[async_trait]
impl RetentionPluginRepo for PostgresRetentionPluginRepo {
    async fn begin(&self) -> DbResult<Box<dyn RetentionPluginTx>> {
        let tx = self.write_pool.begin().await?;
        Ok(Box::new(PostgresRetentionPluginTx { tx }))
    }

    async fn create_release(&self, release: &PluginRelease) -> DbResult<()> {
        let mut tx = self.write_pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO plugin_releases (
                id, version, name, description, logo, data_retention_enabled, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(&release.plugin_id)
        .bind(&release.version)
        .bind(&release.name)
        .bind(&release.description)
        .bind(&release.logo)
        .bind(release.retention_enabled)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!(
                    "Plugin '{}' version '{}' already exists",
                    release.plugin_id, release.version
                ))
            }
            _ => DbError::from(e),
        })?;

        if release.retention_enabled {
            sqlx::query(
                r#"
                INSERT INTO data_retention_plugin_releases (
                    plugin_id, version, configurations, preset_scripts,
                    documentation_url, default_export_url, allow_custom_export_url
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&release.plugin_id)
            .bind(&release.version)
            .bind(serde_json::to_value(&release.configurations)?)
            .bind(serde_json::to_value(&release.preset_scripts)?)
            .bind(&release.documentation_url)
            .bind(&release.default_export_url)
            .bind(release.allow_custom_export_url)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_latest_releases(&self, kind: PluginKind) -> DbResult<Vec<PluginSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, name, description, logo, data_retention_enabled
            FROM plugin_releases
            "#,
        )
        .fetch_all(&self.read_pool)
        .await?;

        let releases = rows.iter().map(|row| PluginSummary {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            logo: row.get("logo"),
            latest_version: row.get("version"),
            retention_enabled: row.get("data_retention_enabled"),
        });

        Ok(latest_per_plugin(releases, kind))
    }

    async fn get_release(
        &self,
        plugin_id: &str,
        version: &str,
    ) -> DbResult<Option<PluginRelease>> {
        let mut conn = self.read_pool.acquire().await?;
        fetch_release(&mut conn, plugin_id, version).await
    }

    async fn list_enabled_for_org(&self, org_id: Uuid) -> DbResult<Vec<EnabledPlugin>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.name, r.description, r.logo, r.data_retention_enabled, o.version
            FROM org_data_retention_plugins o
            JOIN plugin_releases r ON r.id = o.plugin_id AND r.version = o.version
            WHERE o.org_id = $1
            ORDER BY r.id
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.read_pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| EnabledPlugin {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                logo: row.get("logo"),
                retention_enabled: row.get("data_retention_enabled"),
                enabled_version: row.get("version"),
            })
            .collect())
    }

    async fn get_org_config(
        &self,
        org_id: Uuid,
        plugin_id: &str,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<OrgPluginConfig>> {
        let row = sqlx::query(
            r#"
            SELECT org_id, plugin_id, version, configurations, custom_export_url
            FROM org_data_retention_plugins
            WHERE org_id = $1 AND plugin_id = $2
            "#,
        )
        .bind(org_id)
        .bind(plugin_id)
        .fetch_optional(&self.read_pool)
        .await?;

        row.map(|r| parse_org_config(&r, cipher)).transpose()
    }

    async fn list_scripts_for_org(
        &self,
        org_id: Uuid,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Vec<RetentionScript>> {
        let query = format!(
            r#"
            SELECT {SCRIPT_COLUMNS}
            FROM plugin_retention_scripts s
            JOIN org_data_retention_plugins o
                ON o.org_id = s.org_id AND o.plugin_id = s.plugin_id
            WHERE s.org_id = $1
            ORDER BY s.plugin_id, s.script_name, s.script_id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(org_id)
            .fetch_all(&self.read_pool)
            .await?;

        rows.iter().map(|row| parse_script(row, cipher)).collect()
    }

    async fn get_script(
        &self,
        org_id: Uuid,
        script_id: Uuid,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<RetentionScript>> {
        let query = format!(
            r#"
            SELECT {SCRIPT_COLUMNS}
            FROM plugin_retention_scripts s
            WHERE s.org_id = $1 AND s.script_id = $2
            "#
        );
        let row = sqlx::query(&query)
            .bind(org_id)
            .bind(script_id)
            .fetch_optional(&self.read_pool)
            .await?;

        row.map(|r| parse_script(&r, cipher)).transpose()
    }
}

pub struct PostgresRetentionPluginTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RetentionPluginTx for PostgresRetentionPluginTx {
    async fn get_release(
        &mut self,
        plugin_id: &str,
        version: &str,
    ) -> DbResult<Option<PluginRelease>> {
        fetch_release(&mut self.tx, plugin_id, version).await
    }

    async fn get_org_config(
        &mut self,
        org_id: Uuid,
        plugin_id: &str,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<OrgPluginConfig>> {
        // Row lock serializes concurrent transitions for the same org and plugin
        let row = sqlx::query(
            r#"
            SELECT org_id, plugin_id, version, configurations, custom_export_url
            FROM org_data_retention_plugins
            WHERE org_id = $1 AND plugin_id = $2
            FOR UPDATE
            "#,
        )
        .bind(org_id)
        .bind(plugin_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|r| parse_org_config(&r, cipher)).transpose()
    }

    async fn put_org_config(
        &mut self,
        config: &OrgPluginConfig,
        cipher: &dyn FieldCipher,
    ) -> DbResult<()> {
        let configurations = crypto::seal_configurations(&config.configurations, cipher)?;
        let custom_export_url = crypto::seal_str(config.custom_export_url.as_deref(), cipher)?;

        sqlx::query(
            r#"
            INSERT INTO org_data_retention_plugins (
                org_id, plugin_id, version, configurations, custom_export_url,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (org_id, plugin_id) DO UPDATE SET
                version = EXCLUDED.version,
                configurations = EXCLUDED.configurations,
                custom_export_url = EXCLUDED.custom_export_url,
                updated_at = NOW()
            "#,
        )
        .bind(config.org_id)
        .bind(&config.plugin_id)
        .bind(&config.version)
        .bind(configurations)
        .bind(custom_export_url)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_org_config(&mut self, org_id: Uuid, plugin_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM org_data_retention_plugins WHERE org_id = $1 AND plugin_id = $2",
        )
        .bind(org_id)
        .bind(plugin_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_org_scripts(
        &mut self,
        org_id: Uuid,
        plugin_id: &str,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Vec<RetentionScript>> {
        let query = format!(
            r#"
            SELECT {SCRIPT_COLUMNS}
            FROM plugin_retention_scripts s
            WHERE s.org_id = $1 AND s.plugin_id = $2
            ORDER BY s.script_name, s.script_id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(org_id)
            .bind(plugin_id)
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(|row| parse_script(row, cipher)).collect()
    }

    async fn get_script(
        &mut self,
        script_id: Uuid,
        cipher: &dyn FieldCipher,
    ) -> DbResult<Option<RetentionScript>> {
        let query = format!(
            r#"
            SELECT {SCRIPT_COLUMNS}
            FROM plugin_retention_scripts s
            WHERE s.script_id = $1
            FOR UPDATE
            "#
        );
        let row = sqlx::query(&query)
            .bind(script_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(|r| parse_script(&r, cipher)).transpose()
    }

    async fn insert_script(
        &mut self,
        script: &RetentionScript,
        cipher: &dyn FieldCipher,
    ) -> DbResult<()> {
        let export_url = crypto::seal_str(script.export_url.as_deref(), cipher)?;

        sqlx::query(
            r#"
            INSERT INTO plugin_retention_scripts (
                org_id, script_id, plugin_id, script_name, description, is_preset,
                export_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            "#,
        )
        .bind(script.org_id)
        .bind(script.script_id)
        .bind(&script.plugin_id)
        .bind(&script.script_name)
        .bind(&script.description)
        .bind(script.is_preset)
        .bind(export_url)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!("Script '{}' already exists", script.script_id))
            }
            _ => DbError::from(e),
        })?;

        Ok(())
    }

    async fn update_script(
        &mut self,
        script: &RetentionScript,
        cipher: &dyn FieldCipher,
    ) -> DbResult<()> {
        let export_url = crypto::seal_str(script.export_url.as_deref(), cipher)?;

        let result = sqlx::query(
            r#"
            UPDATE plugin_retention_scripts
            SET script_name = $1, description = $2, export_url = $3, updated_at = NOW()
            WHERE script_id = $4
            "#,
        )
        .bind(&script.script_name)
        .bind(&script.description)
        .bind(export_url)
        .bind(script.script_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn delete_scripts(
        &mut self,
        org_id: Uuid,
        plugin_id: &str,
        preset_only: bool,
    ) -> DbResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            DELETE FROM plugin_retention_scripts
            WHERE org_id = $1 AND plugin_id = $2 AND (is_preset OR NOT $3)
            RETURNING script_id
            "#,
        )
        .bind(org_id)
        .bind(plugin_id)
        .bind(preset_only)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids)
    }

    async fn delete_custom_script(&mut self, org_id: Uuid, script_id: Uuid) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM plugin_retention_scripts
            WHERE org_id = $1 AND script_id = $2 AND NOT is_preset
            "#,
        )
        .bind(org_id)
        .bind(script_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

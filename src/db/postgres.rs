use crate::config::{RetryConfig, ServerConfig};
use crate::db::models::{DatabaseInfo, DatabaseSpec, ExtensionInfo, ExtensionSpec, Identifier};
use crate::db::schema;
use crate::error::{IsRetryable, ProvisionError, Step};
use backon::Retryable;
use sqlx::{Connection, Executor, PgConnection};
use std::time::Duration;
use tracing::{debug, info, warn};

async fn connect_with_retry(
    server: &ServerConfig,
    database: &str,
    retry: &RetryConfig,
) -> Result<PgConnection, ProvisionError> {
    let opts = server.connect_options(database)?;
    let target = server.redacted_url(database)?;

    (|| async {
        PgConnection::connect_with(&opts)
            .await
            .map_err(ProvisionError::from)
    })
    .retry(retry.policy())
    .when(|e: &ProvisionError| e.is_retryable())
    .notify(|err, dur: Duration| {
        warn!(url = %target, error = %err, "connect failed; retrying in {:?}", dur);
    })
    .await
}

/// Connection to the maintenance database, used before the target exists.
pub struct AdminSession {
    conn: PgConnection,
    server: ServerConfig,
}

impl AdminSession {
    pub async fn connect(server: &ServerConfig, retry: &RetryConfig) -> Result<Self, ProvisionError> {
        let conn = connect_with_retry(server, &server.maintenance_db, retry)
            .await
            .map_err(|e| match e {
                ProvisionError::DatabaseError(err) => {
                    ProvisionError::from_engine(Step::Connect, &server.maintenance_db, err)
                }
                other => other,
            })?;
        debug!(database = %server.maintenance_db, "admin session established");
        Ok(Self {
            conn,
            server: server.clone(),
        })
    }

    pub async fn database_exists(&mut self, name: &Identifier) -> Result<bool, ProvisionError> {
        let rec: (bool,) = sqlx::query_as(schema::DATABASE_EXISTS)
            .bind(name.as_str())
            .fetch_one(&mut self.conn)
            .await?;
        Ok(rec.0)
    }

    pub async fn database_info(
        &mut self,
        name: &Identifier,
    ) -> Result<Option<DatabaseInfo>, ProvisionError> {
        let info = sqlx::query_as::<_, DatabaseInfo>(schema::DATABASE_INFO)
            .bind(name.as_str())
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(info)
    }

    /// CREATE DATABASE cannot run inside a transaction block, so it goes
    /// over the simple query protocol on a bare connection.
    pub async fn create_database(&mut self, spec: &DatabaseSpec) -> Result<(), ProvisionError> {
        let sql = schema::create_database_sql(spec);
        debug!(sql = %sql, "executing create database");
        (&mut self.conn)
            .execute(sqlx::raw_sql(&sql))
            .await
            .map_err(|e| ProvisionError::from_engine(Step::CreateDatabase, spec.name.as_str(), e))?;
        info!(database = %spec.name, owner = %spec.owner, "database created");
        Ok(())
    }

    pub async fn drop_database(&mut self, name: &Identifier) -> Result<(), ProvisionError> {
        (&mut self.conn)
            .execute(sqlx::raw_sql(&schema::drop_database_sql(name)))
            .await
            .map_err(|e| ProvisionError::from_engine(Step::DropDatabase, name.as_str(), e))?;
        info!(database = %name, "database dropped");
        Ok(())
    }

    /// Close this session and open a new one bound to `database`.
    pub async fn switch_to(
        self,
        database: &Identifier,
        retry: &RetryConfig,
    ) -> Result<DatabaseSession, ProvisionError> {
        let AdminSession { conn, server } = self;
        conn.close().await?;

        let conn = connect_with_retry(&server, database.as_str(), retry)
            .await
            .map_err(|e| match e {
                ProvisionError::DatabaseError(err) => {
                    ProvisionError::from_engine(Step::SwitchSession, database.as_str(), err)
                }
                other => other,
            })?;
        info!(database = %database, "session switched");
        Ok(DatabaseSession {
            conn,
            database: database.clone(),
        })
    }

    pub async fn close(self) -> Result<(), ProvisionError> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Connection bound to the provisioned database.
pub struct DatabaseSession {
    conn: PgConnection,
    database: Identifier,
}

impl DatabaseSession {
    pub fn database(&self) -> &Identifier {
        &self.database
    }

    pub async fn current_database(&mut self) -> Result<String, ProvisionError> {
        let rec: (String,) = sqlx::query_as(schema::CURRENT_DATABASE)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(rec.0)
    }

    pub async fn load_extension(&mut self, ext: &ExtensionSpec) -> Result<(), ProvisionError> {
        (&mut self.conn)
            .execute(sqlx::raw_sql(&schema::create_extension_sql(ext)))
            .await
            .map_err(|e| ProvisionError::from_engine(Step::LoadExtension, ext.name.as_str(), e))?;
        info!(database = %self.database, extension = %ext.name, "extension loaded");
        Ok(())
    }

    pub async fn extension_info(
        &mut self,
        name: &Identifier,
    ) -> Result<Option<ExtensionInfo>, ProvisionError> {
        let info = sqlx::query_as::<_, ExtensionInfo>(schema::EXTENSION_INFO)
            .bind(name.as_str())
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(info)
    }

    pub async fn digest_probe(&mut self) -> Result<String, ProvisionError> {
        let rec: (String,) = sqlx::query_as(schema::DIGEST_PROBE)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| ProvisionError::from_engine(Step::Verify, self.database.as_str(), e))?;
        Ok(rec.0)
    }

    pub async fn close(self) -> Result<(), ProvisionError> {
        self.conn.close().await?;
        Ok(())
    }
}

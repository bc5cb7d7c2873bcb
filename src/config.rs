//! Layered configuration: serde defaults, `config.toml`, then environment.
//!
//! The `APP_POSTGRES_*` variables address the engine the same way the
//! application settings do; everything else is reachable through nested
//! `APP_<SECTION>__<KEY>` variables.

use crate::error::ProvisionError;
use backon::ExponentialBuilder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const CONFIG_FILE: &str = "config.toml";

/// Variables whose values are names or secrets. Env parsing would turn
/// `123456` or `007` into integers, so these are re-merged verbatim.
/// Later entries win, matching the provider order in [`Config::figment`].
const VERBATIM_ENV: &[(&str, &str)] = &[
    ("APP_POSTGRES_HOST", "server.host"),
    ("APP_POSTGRES_USER", "server.user"),
    ("APP_POSTGRES_PASSWORD", "server.password"),
    ("APP_POSTGRES_DB_NAME", "database.name"),
    ("APP_SERVER__HOST", "server.host"),
    ("APP_SERVER__USER", "server.user"),
    ("APP_SERVER__PASSWORD", "server.password"),
    ("APP_SERVER__MAINTENANCE_DB", "server.maintenance_db"),
    ("APP_DATABASE__NAME", "database.name"),
    ("APP_DATABASE__OWNER", "database.owner"),
    ("APP_DATABASE__TABLESPACE", "database.tablespace"),
    ("APP_DATABASE__TEMPLATE", "database.template"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub loglevel: String,
    /// Print the provisioning script instead of executing it.
    pub dry_run: bool,
    /// Check post-conditions after the last directive.
    pub verify: bool,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            loglevel: "info".to_string(),
            dry_run: false,
            verify: true,
        }
    }
}

/// Where the engine lives and how to log into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database the admin session attaches to before the target exists.
    pub maintenance_db: String,
    /// Extra connection parameters as a URL query, e.g. `sslmode=require`.
    pub connect_opts: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            maintenance_db: "postgres".to_string(),
            connect_opts: None,
        }
    }
}

impl ServerConfig {
    pub fn url_for(&self, database: &str) -> Result<Url, ProvisionError> {
        let mut url = Url::parse("postgres://localhost")?;
        url.set_host(Some(&self.host))?;
        url.set_port(Some(self.port))
            .map_err(|_| ProvisionError::InvalidConfig("server.port cannot be set".into()))?;
        url.set_username(&self.user)
            .map_err(|_| ProvisionError::InvalidConfig("server.user cannot be set".into()))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| ProvisionError::InvalidConfig("server.password cannot be set".into()))?;
        }
        url.set_path(&format!("/{database}"));
        if let Some(opts) = self.connect_opts.as_deref().filter(|s| !s.trim().is_empty()) {
            url.set_query(Some(opts.trim_start_matches('?')));
        }
        Ok(url)
    }

    /// Same as [`ServerConfig::url_for`] with the password masked.
    pub fn redacted_url(&self, database: &str) -> Result<Url, ProvisionError> {
        let mut url = self.url_for(database)?;
        if url.password().is_some() {
            url.set_password(Some("***"))
                .map_err(|_| ProvisionError::InvalidConfig("server.password cannot be masked".into()))?;
        }
        Ok(url)
    }

    pub fn connect_options(&self, database: &str) -> Result<PgConnectOptions, ProvisionError> {
        let url = self.url_for(database)?;
        Ok(PgConnectOptions::from_str(url.as_str())?)
    }
}

/// Attributes of the database to create. Defaults reproduce `app_core`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub name: String,
    pub owner: String,
    pub encoding: String,
    pub tablespace: String,
    /// `-1` means unlimited.
    pub connection_limit: i32,
    pub lc_collate: String,
    pub lc_ctype: String,
    pub template: String,
    pub extensions: Vec<String>,
    /// Drop an existing database of the same name before creating it.
    pub recreate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "app_core".to_string(),
            owner: "app_user".to_string(),
            encoding: "UTF8".to_string(),
            tablespace: "pg_default".to_string(),
            connection_limit: -1,
            lc_collate: "en_US.UTF-8".to_string(),
            lc_ctype: "en_US.UTF-8".to_string(),
            template: "template0".to_string(),
            extensions: vec!["pgcrypto".to_string()],
            recreate: false,
        }
    }
}

/// Backoff used while the engine is not yet accepting connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_times: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 3000,
            max_times: 3,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms)))
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

impl Config {
    pub fn figment() -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("APP_POSTGRES_").map(|key| {
                let key = key.as_str().to_ascii_lowercase();
                match key.as_str() {
                    "db_name" => "database.name".to_string().into(),
                    _ => format!("server.{key}").into(),
                }
            }))
            .merge(Env::prefixed("APP_").split("__"));

        VERBATIM_ENV
            .iter()
            .filter_map(|(var, key)| std::env::var(var).ok().map(|value| (*key, value)))
            .fold(figment, |figment, (key, value)| {
                figment.merge(Serialized::default(key, value))
            })
    }

    pub fn load() -> Result<Self, ProvisionError> {
        Ok(Self::figment().extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_app_core() {
        let cfg = Config::default();
        assert_eq!(cfg.database.name, "app_core");
        assert_eq!(cfg.database.owner, "app_user");
        assert_eq!(cfg.database.encoding, "UTF8");
        assert_eq!(cfg.database.connection_limit, -1);
        assert_eq!(cfg.database.lc_collate, "en_US.UTF-8");
        assert_eq!(cfg.database.lc_ctype, "en_US.UTF-8");
        assert_eq!(cfg.database.template, "template0");
        assert_eq!(cfg.database.extensions, vec!["pgcrypto".to_string()]);
        assert!(!cfg.database.recreate);
        assert!(cfg.basic.verify);
    }

    #[test]
    fn postgres_env_vars_override_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                [server]
                host = "file-host"
                port = 6543

                [database]
                owner = "file_owner"
                "#,
            )?;
            jail.set_env("APP_POSTGRES_HOST", "db.internal");
            jail.set_env("APP_POSTGRES_PASSWORD", "s3cret");
            jail.set_env("APP_POSTGRES_DB_NAME", "other_core");

            let cfg: Config = Config::figment().extract()?;
            assert_eq!(cfg.server.host, "db.internal");
            assert_eq!(cfg.server.port, 6543);
            assert_eq!(cfg.server.password, "s3cret");
            assert_eq!(cfg.database.name, "other_core");
            assert_eq!(cfg.database.owner, "file_owner");
            assert_eq!(cfg.database.template, "template0");
            Ok(())
        });
    }

    #[test]
    fn nested_env_vars_reach_every_section() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_BASIC__DRY_RUN", "true");
            jail.set_env("APP_DATABASE__CONNECTION_LIMIT", "20");
            jail.set_env("APP_RETRY__MAX_TIMES", "7");

            let cfg: Config = Config::figment().extract()?;
            assert!(cfg.basic.dry_run);
            assert_eq!(cfg.database.connection_limit, 20);
            assert_eq!(cfg.retry.max_times, 7);
            Ok(())
        });
    }

    #[test]
    fn numeric_credentials_stay_strings() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_POSTGRES_PASSWORD", "123456");
            jail.set_env("APP_POSTGRES_USER", "007");
            jail.set_env("APP_DATABASE__OWNER", "42");

            let cfg: Config = Config::figment().extract()?;
            assert_eq!(cfg.server.password, "123456");
            assert_eq!(cfg.server.user, "007");
            assert_eq!(cfg.database.owner, "42");
            Ok(())
        });
    }

    #[test]
    fn nested_password_beats_postgres_alias() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_POSTGRES_PASSWORD", "111");
            jail.set_env("APP_SERVER__PASSWORD", "222");

            let cfg: Config = Config::figment().extract()?;
            assert_eq!(cfg.server.password, "222");
            Ok(())
        });
    }

    #[test]
    fn url_carries_options_and_redacts_password() {
        let server = ServerConfig {
            host: "db.internal".into(),
            port: 6432,
            user: "admin".into(),
            password: "p@ss".into(),
            maintenance_db: "postgres".into(),
            connect_opts: Some("sslmode=require".into()),
        };

        let url = server.url_for("app_core").expect("url");
        assert_eq!(url.host_str(), Some("db.internal"));
        assert_eq!(url.port(), Some(6432));
        assert_eq!(url.username(), "admin");
        assert_eq!(url.path(), "/app_core");
        assert_eq!(url.query(), Some("sslmode=require"));

        let redacted = server.redacted_url("app_core").expect("url");
        assert_eq!(redacted.password(), Some("***"));
        assert!(!redacted.as_str().contains("p@ss"));
    }

    #[test]
    fn connect_options_target_requested_database() {
        let opts = ServerConfig::default()
            .connect_options("app_core")
            .expect("options");
        assert_eq!(opts.get_database(), Some("app_core"));
        assert_eq!(opts.get_port(), 5432);
    }
}

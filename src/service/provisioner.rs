use crate::config::{Config, RetryConfig, ServerConfig};
use crate::db::models::{DatabaseSpec, ExtensionSpec};
use crate::db::postgres::{AdminSession, DatabaseSession};
use crate::error::ProvisionError;
use crate::types::plan::{Directive, Plan};
use crate::types::report::{ProvisionReport, is_hex_digest, mismatches};
use chrono::Utc;
use tracing::info;

/// Which connection the next directive runs on.
enum Session {
    Admin(AdminSession),
    Database(DatabaseSession),
}

impl Session {
    fn admin(&mut self) -> Result<&mut AdminSession, ProvisionError> {
        match self {
            Session::Admin(admin) => Ok(admin),
            Session::Database(db) => Err(ProvisionError::InvalidPlan(format!(
                "admin directive after switching to \"{}\"",
                db.database()
            ))),
        }
    }

    fn database(&mut self) -> Result<&mut DatabaseSession, ProvisionError> {
        match self {
            Session::Database(db) => Ok(db),
            Session::Admin(_) => Err(ProvisionError::InvalidPlan(
                "extension load before session switch".into(),
            )),
        }
    }
}

pub struct Provisioner {
    server: ServerConfig,
    retry: RetryConfig,
    plan: Plan,
}

impl Provisioner {
    pub fn new(cfg: &Config) -> Result<Self, ProvisionError> {
        let database = DatabaseSpec::try_from(&cfg.database)?;
        let extensions = cfg
            .database
            .extensions
            .iter()
            .map(|name| ExtensionSpec::new(name.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            server: cfg.server.clone(),
            retry: cfg.retry.clone(),
            plan: Plan::new(database, extensions, cfg.database.recreate),
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Execute every directive in order. The first failure aborts the run.
    pub async fn run(&self) -> Result<DatabaseSession, ProvisionError> {
        let mut session = Session::Admin(AdminSession::connect(&self.server, &self.retry).await?);

        for (step, directive) in self.plan.directives().iter().enumerate() {
            info!(step = step + 1, sql = %directive.to_sql(), "applying directive");
            match directive {
                Directive::DropDatabase { name } => session.admin()?.drop_database(name).await?,
                Directive::CreateDatabase(spec) => session.admin()?.create_database(spec).await?,
                Directive::SwitchSession { database } => {
                    let Session::Admin(admin) = session else {
                        return Err(ProvisionError::InvalidPlan(
                            "session switched twice".into(),
                        ));
                    };
                    session = Session::Database(admin.switch_to(database, &self.retry).await?);
                }
                Directive::LoadExtension(ext) => session.database()?.load_extension(ext).await?,
            }
        }

        match session {
            Session::Database(db) => Ok(db),
            Session::Admin(admin) => {
                admin.close().await?;
                Err(ProvisionError::InvalidPlan(
                    "plan ended without a session switch".into(),
                ))
            }
        }
    }

    /// Read the engine's view of the result back and compare it to the plan.
    pub async fn verify(
        &self,
        session: &mut DatabaseSession,
    ) -> Result<ProvisionReport, ProvisionError> {
        let spec = self
            .plan
            .database()
            .ok_or_else(|| ProvisionError::InvalidPlan("no database directive".into()))?;

        let mut admin = AdminSession::connect(&self.server, &self.retry).await?;
        let info = admin.database_info(&spec.name).await;
        admin.close().await?;
        let info = info?.ok_or_else(|| {
            ProvisionError::Verification(vec![format!("database {} does not exist", spec.name)])
        })?;

        let mut problems = mismatches(spec, &info);

        let current_database = session.current_database().await?;
        if current_database != spec.name.as_str() {
            problems.push(format!(
                "session bound to {current_database}, expected {}",
                spec.name
            ));
        }

        let mut extensions = Vec::new();
        for ext in self.plan.extensions() {
            match session.extension_info(&ext.name).await? {
                Some(found) => extensions.push(found),
                None => problems.push(format!("extension {} is not installed", ext.name)),
            }
        }

        let digest_probe = if self.plan.extensions().any(|e| e.name.as_str() == "pgcrypto") {
            let probe = session.digest_probe().await?;
            if !is_hex_digest(&probe) {
                problems.push(format!("digest probe returned {probe:?}"));
            }
            probe
        } else {
            String::new()
        };

        if !problems.is_empty() {
            return Err(ProvisionError::Verification(problems));
        }

        info!(
            database = %info.name,
            owner = %info.owner,
            encoding = %info.encoding,
            extensions = extensions.len(),
            "provisioning verified"
        );

        Ok(ProvisionReport {
            database: info,
            current_database,
            extensions,
            digest_probe,
            provisioned_at: Utc::now(),
        })
    }
}

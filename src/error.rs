use sqlx::Error as SqlxError;
use std::fmt;
use thiserror::Error as ThisError;

/// SQLSTATE codes the provisioner reacts to.
pub mod sqlstate {
    pub const DUPLICATE_DATABASE: &str = "42P04";
    pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
    pub const UNDEFINED_OBJECT: &str = "42704";
    pub const INVALID_PARAMETER_VALUE: &str = "22023";
    pub const WRONG_OBJECT_TYPE: &str = "42809";
    pub const UNDEFINED_FILE: &str = "58P01";
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
    pub const CANNOT_CONNECT_NOW: &str = "57P03";
    pub const TOO_MANY_CONNECTIONS: &str = "53300";
}

/// The directive being executed when an engine error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    DropDatabase,
    CreateDatabase,
    SwitchSession,
    LoadExtension,
    Verify,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Connect => "connect",
            Step::DropDatabase => "drop database",
            Step::CreateDatabase => "create database",
            Step::SwitchSession => "switch session",
            Step::LoadExtension => "load extension",
            Step::Verify => "verify",
        };
        f.write_str(s)
    }
}

#[derive(Debug, ThisError)]
pub enum ProvisionError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("database \"{0}\" already exists")]
    DatabaseExists(String),

    #[error("permission denied during {step}: {message}")]
    PermissionDenied { step: Step, message: String },

    #[error("unknown owner role: {0}")]
    UnknownRole(String),

    #[error("undefined object during {step}: {message}")]
    UndefinedObject { step: Step, message: String },

    #[error("unsupported locale or encoding: {0}")]
    UnsupportedLocale(String),

    #[error("extension \"{name}\" is not available: {message}")]
    ExtensionUnavailable { name: String, message: String },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Verification failed: {}", .0.join("; "))]
    Verification(Vec<String>),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Map a SQLSTATE raised by `step` onto a dedicated variant.
    ///
    /// `subject` is the database or extension name the step was acting on.
    /// Returns `None` for codes without a dedicated variant.
    pub fn from_sqlstate(step: Step, subject: &str, code: &str, message: &str) -> Option<Self> {
        use sqlstate::*;

        let err = match (step, code) {
            (_, DUPLICATE_DATABASE) => Self::DatabaseExists(subject.to_string()),
            (_, INSUFFICIENT_PRIVILEGE) => Self::PermissionDenied {
                step,
                message: message.to_string(),
            },
            (Step::CreateDatabase, UNDEFINED_OBJECT) if message.starts_with("role ") => {
                Self::UnknownRole(message.to_string())
            }
            (Step::CreateDatabase, UNDEFINED_OBJECT) => Self::UndefinedObject {
                step,
                message: message.to_string(),
            },
            (Step::CreateDatabase, INVALID_PARAMETER_VALUE | WRONG_OBJECT_TYPE) => {
                Self::UnsupportedLocale(message.to_string())
            }
            (Step::LoadExtension, UNDEFINED_FILE | FEATURE_NOT_SUPPORTED | UNDEFINED_OBJECT) => {
                Self::ExtensionUnavailable {
                    name: subject.to_string(),
                    message: message.to_string(),
                }
            }
            _ => return None,
        };
        Some(err)
    }

    /// Classify a driver error raised by `step`, falling back to `DatabaseError`.
    pub fn from_engine(step: Step, subject: &str, err: SqlxError) -> Self {
        let classified = err.as_database_error().and_then(|db_err| {
            let code = db_err.code()?;
            Self::from_sqlstate(step, subject, &code, db_err.message())
        });
        classified.unwrap_or(Self::DatabaseError(err))
    }
}

/// Errors worth another connection attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SqlxError {
    fn is_retryable(&self) -> bool {
        match self {
            SqlxError::Io(_) | SqlxError::Tls(_) | SqlxError::PoolTimedOut => true,
            SqlxError::Database(db_err) => matches!(
                db_err.code().as_deref(),
                Some(sqlstate::CANNOT_CONNECT_NOW | sqlstate::TOO_MANY_CONNECTIONS)
            ),
            _ => false,
        }
    }
}

impl IsRetryable for ProvisionError {
    fn is_retryable(&self) -> bool {
        match self {
            ProvisionError::DatabaseError(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_database_is_a_name_collision() {
        let err = ProvisionError::from_sqlstate(
            Step::CreateDatabase,
            "app_core",
            "42P04",
            "database \"app_core\" already exists",
        );
        assert!(matches!(err, Some(ProvisionError::DatabaseExists(name)) if name == "app_core"));
    }

    #[test]
    fn undefined_object_depends_on_step() {
        let create = ProvisionError::from_sqlstate(
            Step::CreateDatabase,
            "app_core",
            "42704",
            "role \"app_user\" does not exist",
        );
        assert!(matches!(create, Some(ProvisionError::UnknownRole(_))));

        let load = ProvisionError::from_sqlstate(
            Step::LoadExtension,
            "pgcrypto",
            "42704",
            "extension \"pgcrypto\" is not available",
        );
        assert!(matches!(
            load,
            Some(ProvisionError::ExtensionUnavailable { name, .. }) if name == "pgcrypto"
        ));
    }

    #[test]
    fn missing_tablespace_does_not_blame_the_role() {
        let err = ProvisionError::from_sqlstate(
            Step::CreateDatabase,
            "app_core",
            "42704",
            "tablespace \"nope\" does not exist",
        );
        assert!(matches!(
            err,
            Some(ProvisionError::UndefinedObject { step: Step::CreateDatabase, ref message })
                if message.contains("tablespace")
        ));
        assert_eq!(
            err.expect("classified").to_string(),
            "undefined object during create database: tablespace \"nope\" does not exist"
        );
    }

    #[test]
    fn locale_failures_only_apply_to_create() {
        for code in ["22023", "42809"] {
            let err = ProvisionError::from_sqlstate(Step::CreateDatabase, "app_core", code, "bad");
            assert!(matches!(err, Some(ProvisionError::UnsupportedLocale(_))));
        }
        assert!(
            ProvisionError::from_sqlstate(Step::LoadExtension, "pgcrypto", "22023", "bad")
                .is_none()
        );
    }

    #[test]
    fn permission_denied_keeps_step() {
        let err = ProvisionError::from_sqlstate(
            Step::CreateDatabase,
            "app_core",
            "42501",
            "permission denied to create database",
        )
        .expect("classified");
        assert_eq!(
            err.to_string(),
            "permission denied during create database: permission denied to create database"
        );
    }

    #[test]
    fn unrelated_codes_are_not_classified() {
        assert!(ProvisionError::from_sqlstate(Step::Verify, "app_core", "XX000", "boom").is_none());
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        let io = SqlxError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(ProvisionError::from(io).is_retryable());
        assert!(!ProvisionError::from(SqlxError::RowNotFound).is_retryable());
        assert!(!ProvisionError::DatabaseExists("app_core".into()).is_retryable());
    }

    #[test]
    fn verification_lists_every_mismatch() {
        let err = ProvisionError::Verification(vec!["owner".into(), "encoding".into()]);
        assert_eq!(err.to_string(), "Verification failed: owner; encoding");
    }
}

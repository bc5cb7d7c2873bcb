use crate::config::DatabaseConfig;
use crate::error::ProvisionError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Longest identifier the engine keeps without truncation (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A validated SQL identifier, always rendered quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: impl Into<String>) -> Result<Self, ProvisionError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ProvisionError::InvalidConfig(
                "identifier must not be empty".into(),
            ));
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(ProvisionError::InvalidConfig(format!(
                "identifier \"{raw}\" is longer than {MAX_IDENTIFIER_LEN} bytes"
            )));
        }
        if raw.contains('\0') {
            return Err(ProvisionError::InvalidConfig(
                "identifier must not contain NUL".into(),
            ));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = ProvisionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn quote_ident(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

pub fn quote_literal(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionLimit {
    Unlimited,
    Max(u32),
}

impl ConnectionLimit {
    pub fn as_sql(self) -> i64 {
        match self {
            ConnectionLimit::Unlimited => -1,
            ConnectionLimit::Max(n) => i64::from(n),
        }
    }
}

impl TryFrom<i32> for ConnectionLimit {
    type Error = ProvisionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ConnectionLimit::Unlimited),
            n if n >= 0 => Ok(ConnectionLimit::Max(n as u32)),
            n => Err(ProvisionError::InvalidConfig(format!(
                "connection limit {n} is invalid; use -1 for unlimited"
            ))),
        }
    }
}

/// The database the provisioner creates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseSpec {
    pub name: Identifier,
    pub owner: Identifier,
    pub encoding: String,
    pub tablespace: Identifier,
    pub connection_limit: ConnectionLimit,
    pub lc_collate: String,
    pub lc_ctype: String,
    pub template: Identifier,
}

impl TryFrom<&DatabaseConfig> for DatabaseSpec {
    type Error = ProvisionError;

    fn try_from(cfg: &DatabaseConfig) -> Result<Self, Self::Error> {
        for (field, value) in [
            ("encoding", &cfg.encoding),
            ("lc_collate", &cfg.lc_collate),
            ("lc_ctype", &cfg.lc_ctype),
        ] {
            if value.trim().is_empty() {
                return Err(ProvisionError::InvalidConfig(format!(
                    "database.{field} must not be empty"
                )));
            }
        }
        Ok(Self {
            name: Identifier::new(cfg.name.clone())?,
            owner: Identifier::new(cfg.owner.clone())?,
            encoding: cfg.encoding.clone(),
            tablespace: Identifier::new(cfg.tablespace.clone())?,
            connection_limit: ConnectionLimit::try_from(cfg.connection_limit)?,
            lc_collate: cfg.lc_collate.clone(),
            lc_ctype: cfg.lc_ctype.clone(),
            template: Identifier::new(cfg.template.clone())?,
        })
    }
}

/// An extension loaded into the new database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionSpec {
    pub name: Identifier,
}

impl ExtensionSpec {
    pub fn new(name: impl Into<String>) -> Result<Self, ProvisionError> {
        Ok(Self {
            name: Identifier::new(name)?,
        })
    }
}

/// Row read back from `pg_database`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DatabaseInfo {
    pub name: String,
    pub owner: String,
    pub encoding: String,
    pub lc_collate: String,
    pub lc_ctype: String,
    pub connection_limit: i32,
    pub tablespace: String,
}

/// Row read back from `pg_extension`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        let ident = Identifier::new("we\"ird").expect("valid");
        assert_eq!(ident.quoted(), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn identifier_rules() {
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
        assert!(Identifier::new("a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
        assert!(Identifier::new("nul\0byte").is_err());
    }

    #[test]
    fn connection_limit_from_signed() {
        assert_eq!(ConnectionLimit::try_from(-1i32).unwrap(), ConnectionLimit::Unlimited);
        assert_eq!(ConnectionLimit::try_from(0i32).unwrap(), ConnectionLimit::Max(0));
        assert_eq!(ConnectionLimit::try_from(25i32).unwrap().as_sql(), 25);
        assert!(ConnectionLimit::try_from(-2i32).is_err());
    }

    #[test]
    fn spec_from_default_config() {
        let spec = DatabaseSpec::try_from(&DatabaseConfig::default()).expect("valid");
        assert_eq!(spec.name.as_str(), "app_core");
        assert_eq!(spec.owner.as_str(), "app_user");
        assert_eq!(spec.tablespace.as_str(), "pg_default");
        assert_eq!(spec.connection_limit, ConnectionLimit::Unlimited);
        assert_eq!(spec.template.as_str(), "template0");
    }

    #[test]
    fn spec_rejects_blank_locale() {
        let cfg = DatabaseConfig {
            lc_ctype: "  ".into(),
            ..DatabaseConfig::default()
        };
        assert!(DatabaseSpec::try_from(&cfg).is_err());
    }
}

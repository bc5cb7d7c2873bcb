//! SQL text for the provisioning directives and the catalog lookups used to
//! verify them. PostgreSQL only.

use super::models::{DatabaseSpec, ExtensionSpec, Identifier, quote_literal};

pub fn create_database_sql(spec: &DatabaseSpec) -> String {
    format!(
        "CREATE DATABASE {name}\n    \
         WITH\n    \
         OWNER = {owner}\n    \
         ENCODING = {encoding}\n    \
         LC_COLLATE = {collate}\n    \
         LC_CTYPE = {ctype}\n    \
         TABLESPACE = {tablespace}\n    \
         CONNECTION LIMIT = {limit}\n    \
         TEMPLATE = {template}",
        name = spec.name.quoted(),
        owner = spec.owner.quoted(),
        encoding = quote_literal(&spec.encoding),
        collate = quote_literal(&spec.lc_collate),
        ctype = quote_literal(&spec.lc_ctype),
        tablespace = spec.tablespace.quoted(),
        limit = spec.connection_limit.as_sql(),
        template = spec.template.quoted(),
    )
}

pub fn drop_database_sql(name: &Identifier) -> String {
    format!("DROP DATABASE IF EXISTS {}", name.quoted())
}

/// No `IF NOT EXISTS`: a second load into the same database is an error.
pub fn create_extension_sql(ext: &ExtensionSpec) -> String {
    format!("CREATE EXTENSION {}", ext.name.quoted())
}

pub const DATABASE_INFO: &str = r#"
SELECT d.datname::text AS name,
       pg_get_userbyid(d.datdba)::text AS owner,
       pg_encoding_to_char(d.encoding)::text AS encoding,
       d.datcollate::text AS lc_collate,
       d.datctype::text AS lc_ctype,
       d.datconnlimit AS connection_limit,
       t.spcname::text AS tablespace
FROM pg_database d
JOIN pg_tablespace t ON t.oid = d.dattablespace
WHERE d.datname = $1
"#;

pub const DATABASE_EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)";

pub const EXTENSION_INFO: &str =
    "SELECT extname::text AS name, extversion AS version FROM pg_extension WHERE extname = $1";

pub const CURRENT_DATABASE: &str = "SELECT current_database()::text";

/// Exercises `pgcrypto` end to end; yields 64 hex characters.
pub const DIGEST_PROBE: &str = "SELECT encode(digest(current_database(), 'sha256'), 'hex')";

use crate::db::models::{DatabaseInfo, DatabaseSpec, ExtensionInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the engine reports after the plan ran.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub database: DatabaseInfo,
    pub current_database: String,
    pub extensions: Vec<ExtensionInfo>,
    pub digest_probe: String,
    pub provisioned_at: DateTime<Utc>,
}

/// `UTF-8`, `utf8` and `UTF8` name the same encoding.
fn normalize_encoding(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Differences between the requested database and the catalog row.
pub fn mismatches(spec: &DatabaseSpec, info: &DatabaseInfo) -> Vec<String> {
    let mut out = Vec::new();
    let mut check = |field: &str, want: &str, got: &str| {
        if want != got {
            out.push(format!("{field}: expected {want}, found {got}"));
        }
    };

    check("name", spec.name.as_str(), &info.name);
    check("owner", spec.owner.as_str(), &info.owner);
    check(
        "encoding",
        &normalize_encoding(&spec.encoding),
        &normalize_encoding(&info.encoding),
    );
    check("lc_collate", &spec.lc_collate, &info.lc_collate);
    check("lc_ctype", &spec.lc_ctype, &info.lc_ctype);
    check("tablespace", spec.tablespace.as_str(), &info.tablespace);
    check(
        "connection_limit",
        &spec.connection_limit.as_sql().to_string(),
        &info.connection_limit.to_string(),
    );
    out
}

pub fn is_hex_digest(probe: &str) -> bool {
    probe.len() == 64 && probe.chars().all(|c| c.is_ascii_hexdigit())
}

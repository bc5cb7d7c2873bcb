use crate::db::models::{DatabaseSpec, ExtensionSpec, Identifier};
use crate::db::schema;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Directive {
    DropDatabase { name: Identifier },
    CreateDatabase(DatabaseSpec),
    SwitchSession { database: Identifier },
    LoadExtension(ExtensionSpec),
}

impl Directive {
    /// psql-compatible text for this directive.
    pub fn to_sql(&self) -> String {
        match self {
            Directive::DropDatabase { name } => format!("{};", schema::drop_database_sql(name)),
            Directive::CreateDatabase(spec) => format!("{};", schema::create_database_sql(spec)),
            Directive::SwitchSession { database } => format!("\\connect {}", database.quoted()),
            Directive::LoadExtension(ext) => format!("{};", schema::create_extension_sql(ext)),
        }
    }
}

/// Directives in execution order: optional drop, create, switch, loads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    directives: Vec<Directive>,
}

impl Plan {
    pub fn new(database: DatabaseSpec, extensions: Vec<ExtensionSpec>, recreate: bool) -> Self {
        let name = database.name.clone();
        let mut directives = Vec::with_capacity(extensions.len() + 3);
        if recreate {
            directives.push(Directive::DropDatabase { name: name.clone() });
        }
        directives.push(Directive::CreateDatabase(database));
        directives.push(Directive::SwitchSession { database: name });
        directives.extend(extensions.into_iter().map(Directive::LoadExtension));
        Self { directives }
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn database(&self) -> Option<&DatabaseSpec> {
        self.directives.iter().find_map(|d| match d {
            Directive::CreateDatabase(spec) => Some(spec),
            _ => None,
        })
    }

    pub fn extensions(&self) -> impl Iterator<Item = &ExtensionSpec> {
        self.directives.iter().filter_map(|d| match d {
            Directive::LoadExtension(ext) => Some(ext),
            _ => None,
        })
    }

    pub fn to_script(&self) -> String {
        let mut script = self
            .directives
            .iter()
            .map(Directive::to_sql)
            .collect::<Vec<_>>()
            .join("\n\n");
        script.push('\n');
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn plan(recreate: bool) -> Plan {
        let spec = DatabaseSpec::try_from(&DatabaseConfig::default()).expect("valid");
        let ext = ExtensionSpec::new("pgcrypto").expect("valid");
        Plan::new(spec, vec![ext], recreate)
    }

    #[test]
    fn directives_run_create_switch_load() {
        let plan = plan(false);
        let kinds: Vec<_> = plan
            .directives()
            .iter()
            .map(|d| match d {
                Directive::DropDatabase { .. } => "drop",
                Directive::CreateDatabase(_) => "create",
                Directive::SwitchSession { .. } => "switch",
                Directive::LoadExtension(_) => "load",
            })
            .collect();
        assert_eq!(kinds, ["create", "switch", "load"]);
        assert_eq!(plan.database().map(|d| d.name.as_str()), Some("app_core"));
        assert_eq!(plan.extensions().count(), 1);
    }

    #[test]
    fn recreate_prepends_drop() {
        let plan = plan(true);
        assert!(matches!(
            plan.directives().first(),
            Some(Directive::DropDatabase { name }) if name.as_str() == "app_core"
        ));
        assert_eq!(plan.directives().len(), 4);
    }

    #[test]
    fn script_switches_before_loading() {
        let script = plan(false).to_script();
        let create = script.find("CREATE DATABASE").expect("create");
        let connect = script.find("\\connect \"app_core\"").expect("connect");
        let load = script.find("CREATE EXTENSION \"pgcrypto\";").expect("load");
        assert!(create < connect && connect < load);
        assert!(script.ends_with(";\n"));
    }
}

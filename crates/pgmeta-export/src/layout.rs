//! Output-tree placement rules.
//!
//! ```text
//! <root>/<schema>/tables/<table>/table.sql
//! <root>/<schema>/tables/<table>/{indexes,triggers,constraints,policies,rules,sequences}/<name>.sql
//! <root>/<schema>/{functions,procedures,aggregates,views,materialized_views,extensions,rules}/<name>.sql
//! <root>/postgres/{publications,subscriptions}/<name>.sql
//! ```
//!
//! Placement is pure: no filesystem access happens here.

use std::path::{Path, PathBuf};

use pgmeta_core::{ObjectDescriptor, ObjectType};

/// File name used for a table's own definition inside its directory.
pub const TABLE_FILE: &str = "table.sql";

/// One file the writer has to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub path: PathBuf,
    pub object_type: ObjectType,
    pub object: String,
    pub content: String,
}

/// Relative path of `object` within the output tree.
pub fn target_path(object: &ObjectDescriptor) -> PathBuf {
    let mut path = PathBuf::from(&object.schema);

    match object.object_type {
        ObjectType::Table => {
            path.push("tables");
            path.push(&object.name);
            path.push(TABLE_FILE);
        }
        ty if ty.is_table_scoped() => match object.owning_table.as_deref() {
            Some(table) => {
                path.push("tables");
                path.push(table);
                path.push(ty.plural_dir());
                path.push(format!("{}.sql", object.name));
            }
            None => {
                path.push(ty.plural_dir());
                path.push(format!("{}.sql", object.name));
            }
        },
        ty => {
            path.push(ty.plural_dir());
            path.push(format!("{}.sql", object.name));
        }
    }

    path
}

/// Plan the whole tree: one task per descriptor with a definition. Objects
/// that should have an owning table but lack one fall back to schema level
/// with a warning.
pub fn plan_layout(root: &Path, objects: &[ObjectDescriptor]) -> Vec<FileTask> {
    objects
        .iter()
        .filter_map(|object| {
            let definition = object.definition.as_deref().filter(|d| !d.is_empty())?;

            if object.object_type.expects_owner() && object.owning_table.is_none() {
                tracing::warn!(
                    object_type = %object.object_type,
                    object = %object.qualified_name(),
                    "object has no associated table, exporting at schema level"
                );
            }

            Some(FileTask {
                path: root.join(target_path(object)),
                object_type: object.object_type,
                object: object.qualified_name(),
                content: definition.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pgmeta_core::DATABASE_SCHEMA;

    use super::*;

    fn defined(object: ObjectDescriptor) -> ObjectDescriptor {
        object.with_definition("CREATE …;")
    }

    #[test]
    fn table_gets_its_own_directory() {
        let object = ObjectDescriptor::new(ObjectType::Table, "public", "users");
        assert_eq!(
            target_path(&object),
            PathBuf::from("public/tables/users/table.sql")
        );
    }

    #[test]
    fn mixed_case_names_survive_in_paths() {
        let object = ObjectDescriptor::new(ObjectType::Table, "public", "Orders");
        assert_eq!(
            target_path(&object),
            PathBuf::from("public/tables/Orders/table.sql")
        );
    }

    #[test]
    fn owned_objects_nest_under_their_table() {
        let index = ObjectDescriptor::new(ObjectType::Index, "public", "users_email_idx")
            .with_owning_table("users");
        assert_eq!(
            target_path(&index),
            PathBuf::from("public/tables/users/indexes/users_email_idx.sql")
        );

        let policy = ObjectDescriptor::new(ObjectType::Policy, "app", "tenant_isolation")
            .with_owning_table("accounts");
        assert_eq!(
            target_path(&policy),
            PathBuf::from("app/tables/accounts/policies/tenant_isolation.sql")
        );

        let sequence = ObjectDescriptor::new(ObjectType::Sequence, "public", "users_id_seq")
            .with_owning_table("users");
        assert_eq!(
            target_path(&sequence),
            PathBuf::from("public/tables/users/sequences/users_id_seq.sql")
        );
    }

    #[test]
    fn ownerless_objects_fall_back_to_schema_level() {
        let trigger = ObjectDescriptor::new(ObjectType::Trigger, "public", "audit_trg");
        assert_eq!(
            target_path(&trigger),
            PathBuf::from("public/triggers/audit_trg.sql")
        );

        let sequence = ObjectDescriptor::new(ObjectType::Sequence, "public", "global_seq");
        assert_eq!(
            target_path(&sequence),
            PathBuf::from("public/sequences/global_seq.sql")
        );
    }

    #[test]
    fn standalone_objects_group_by_plural_type() {
        let view = ObjectDescriptor::new(ObjectType::View, "public", "active_users");
        assert_eq!(
            target_path(&view),
            PathBuf::from("public/views/active_users.sql")
        );

        let matview = ObjectDescriptor::new(ObjectType::MaterializedView, "public", "daily_stats");
        assert_eq!(
            target_path(&matview),
            PathBuf::from("public/materialized_views/daily_stats.sql")
        );

        let function = ObjectDescriptor::new(ObjectType::Function, "app", "compute_total");
        assert_eq!(
            target_path(&function),
            PathBuf::from("app/functions/compute_total.sql")
        );
    }

    #[test]
    fn database_level_objects_use_the_synthetic_bucket() {
        let publication =
            ObjectDescriptor::new(ObjectType::Publication, DATABASE_SCHEMA, "all_tables");
        assert_eq!(
            target_path(&publication),
            PathBuf::from("postgres/publications/all_tables.sql")
        );
    }

    #[test]
    fn plan_skips_objects_without_definitions() {
        let root = Path::new("/out");
        let objects = vec![
            defined(ObjectDescriptor::new(ObjectType::Table, "public", "users")),
            ObjectDescriptor::new(ObjectType::Table, "public", "orders"),
            ObjectDescriptor::new(ObjectType::View, "public", "empty").with_definition(""),
        ];

        let tasks = plan_layout(root, &objects);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, PathBuf::from("/out/public/tables/users/table.sql"));
        assert_eq!(tasks[0].content, "CREATE …;");
    }
}

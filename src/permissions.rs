//! Permission lookups over `iam.resource_permission` rows and the combined permissions document.

use crate::store::{PermissionRow, Principals, ResourceId};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Role every user implicitly holds.
pub const PUBLIC_ROLE: &str = "public";

pub const PERMISSIONS_SCHEMA: &str =
    "https://github.com/qwc-services/qwc-services-core/raw/master/schemas/qwc-services-permissions.json";

/// Resource ids granted to a role, split into the role's own grants and public grants.
///
/// For the public role `own` and `public` are the same set. For any other role `own`
/// holds only what the role gets on top of the public grants.
#[derive(Clone, Debug, Default)]
pub struct Grants {
    pub own: HashSet<ResourceId>,
    pub public: HashSet<ResourceId>,
}

impl Grants {
    pub fn owns(&self, id: ResourceId) -> bool {
        self.own.contains(&id)
    }

    pub fn any(&self, id: ResourceId) -> bool {
        self.own.contains(&id) || self.public.contains(&id)
    }
}

pub struct PermissionIndex {
    by_role: HashMap<String, Vec<PermissionRow>>,
}

impl PermissionIndex {
    /// Rows must be ordered by priority (highest first) within each role.
    pub fn new(rows: Vec<PermissionRow>) -> Self {
        let by_role = rows.into_iter().fold(HashMap::new(), |mut m: HashMap<String, Vec<PermissionRow>>, row| {
            m.entry(row.role.clone()).or_default().push(row);
            m
        });
        PermissionIndex { by_role }
    }

    fn rows<'a>(&'a self, role: &str) -> impl Iterator<Item = &'a PermissionRow> {
        self.by_role.get(role).into_iter().flatten()
    }

    /// Ids of resources in `tables` granted to `role`.
    pub fn resource_ids(&self, role: &str, tables: &[&str]) -> HashSet<ResourceId> {
        self.rows(role)
            .filter(|p| tables.contains(&p.table_name.as_str()))
            .map(|p| p.resource_id)
            .collect()
    }

    /// Ids of resources in `tables` granted to any role.
    pub fn all_resource_ids(&self, tables: &[&str]) -> HashSet<ResourceId> {
        self.by_role
            .values()
            .flatten()
            .filter(|p| tables.contains(&p.table_name.as_str()))
            .map(|p| p.resource_id)
            .collect()
    }

    /// Permission rows of `role` for one resource table, highest priority first.
    pub fn resource_permissions<'a>(&'a self, role: &str, table: &str) -> Vec<&'a PermissionRow> {
        self.rows(role).filter(|p| p.table_name == table).collect()
    }

    pub fn grants(&self, role: &str, tables: &[&str]) -> Grants {
        let public = self.resource_ids(PUBLIC_ROLE, tables);
        let mut own = self.resource_ids(role, tables);
        if role != PUBLIC_ROLE {
            own.retain(|id| !public.contains(id));
        }
        Grants { own, public }
    }
}

#[derive(Serialize)]
struct UserEntry<'a> {
    name: &'a str,
    groups: &'a [String],
    roles: &'a [String],
}

#[derive(Serialize)]
struct GroupEntry<'a> {
    name: &'a str,
    roles: &'a [String],
}

#[derive(Serialize)]
struct RoleEntry<'a> {
    role: &'a str,
    permissions: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct PermissionsDocument<'a> {
    #[serde(rename = "$schema")]
    schema: &'static str,
    users: Vec<UserEntry<'a>>,
    groups: Vec<GroupEntry<'a>>,
    roles: Vec<RoleEntry<'a>>,
}

/// Merge one service's permissions into a role's permissions. Lists under the
/// same key are concatenated, anything else is replaced.
pub fn merge_service_permissions(target: &mut Map<String, Value>, service: Map<String, Value>) {
    for (key, value) in service {
        if let (Some(Value::Array(existing)), Value::Array(more)) = (target.get_mut(&key), &value) {
            existing.extend(more.iter().cloned());
            continue;
        }
        target.insert(key, value);
    }
}

/// Combined permissions document. Every role of `principals` is listed, with an
/// empty permissions object when no service grants it anything.
pub fn permissions_document(
    principals: &Principals,
    role_permissions: &BTreeMap<String, Map<String, Value>>,
) -> Result<Value, serde_json::Error> {
    let empty = Map::new();
    let mut roles: Vec<&str> = principals.roles.iter().map(String::as_str).collect();
    roles.extend(role_permissions.keys().map(String::as_str));
    roles.sort_unstable();
    roles.dedup();

    let doc = PermissionsDocument {
        schema: PERMISSIONS_SCHEMA,
        users: principals
            .users
            .iter()
            .map(|u| UserEntry {
                name: &u.name,
                groups: &u.groups,
                roles: &u.roles,
            })
            .collect(),
        groups: principals
            .groups
            .iter()
            .map(|g| GroupEntry {
                name: &g.name,
                roles: &g.roles,
            })
            .collect(),
        roles: roles
            .into_iter()
            .map(|role| RoleEntry {
                role,
                permissions: role_permissions.get(role).unwrap_or(&empty),
            })
            .collect(),
    };
    serde_json::to_value(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GroupRecord, UserRecord};
    use serde_json::json;

    fn row(role: &str, id: ResourceId, table: &str) -> PermissionRow {
        PermissionRow {
            role: role.into(),
            resource_id: id,
            table_name: table.into(),
            resource_name: format!("r{}", id),
            read: true,
            write: false,
            priority: 0,
        }
    }

    #[test]
    fn role_grants_exclude_public_ids() {
        let index = PermissionIndex::new(vec![
            row("public", 1, "ows_layer"),
            row("public", 2, "data_source"),
            row("afu", 1, "ows_layer"),
            row("afu", 3, "ows_layer"),
            row("afu", 4, "template"),
        ]);
        let grants = index.grants("afu", &["ows_layer", "data_source"]);
        assert!(!grants.owns(1));
        assert!(grants.owns(3));
        assert!(grants.any(2));
        assert!(!grants.any(4));

        let public = index.grants(PUBLIC_ROLE, &["ows_layer"]);
        assert!(public.owns(1));
        assert_eq!(index.all_resource_ids(&["template"]), HashSet::from([4]));
    }

    #[test]
    fn service_permission_lists_are_concatenated() {
        let mut target = Map::new();
        merge_service_permissions(&mut target, json!({ "print_templates": ["A4"] }).as_object().cloned().unwrap());
        merge_service_permissions(
            &mut target,
            json!({ "print_templates": ["A3"], "solr_facets": [] }).as_object().cloned().unwrap(),
        );
        assert_eq!(target["print_templates"], json!(["A4", "A3"]));
        assert_eq!(target["solr_facets"], json!([]));
    }

    #[test]
    fn document_lists_all_roles_sorted() {
        let principals = Principals {
            users: vec![UserRecord {
                name: "demo".into(),
                groups: vec!["afu".into()],
                roles: vec![],
            }],
            groups: vec![GroupRecord {
                name: "afu".into(),
                roles: vec!["afu_edit".into()],
            }],
            roles: vec!["public".into(), "afu_edit".into()],
        };
        let mut perms = BTreeMap::new();
        perms.insert("public".to_string(), json!({ "print_templates": ["A4"] }).as_object().cloned().unwrap());
        let doc = permissions_document(&principals, &perms).unwrap();
        assert_eq!(doc["$schema"], json!(PERMISSIONS_SCHEMA));
        assert_eq!(doc["users"][0], json!({ "name": "demo", "groups": ["afu"], "roles": [] }));
        assert_eq!(doc["roles"][0], json!({ "role": "afu_edit", "permissions": {} }));
        assert_eq!(doc["roles"][1]["permissions"]["print_templates"], json!(["A4"]));
    }
}

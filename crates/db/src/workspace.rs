// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::table::VirtualTable;
use arc_swap::ArcSwap;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::warn;
use unicase::UniCase;
use vgdb_common::ClassDef;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum WorkspaceDbType {
    FileGeodatabase,
    MobileGeodatabase,
    ArcSde,
    PostgreSql,
    Oracle,
    SqlServer,
    #[default]
    Other,
}

impl WorkspaceDbType {
    pub fn is_file_based(&self) -> bool {
        matches!(
            self,
            WorkspaceDbType::FileGeodatabase | WorkspaceDbType::MobileGeodatabase
        )
    }
}

/// Who a workspace is, independent of any particular in-process instance.
///
/// Client and peer build their own workspace objects and must still agree on equality, so
/// this compares by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct WorkspaceIdentity {
    pub workspace_handle: i64,
    pub db_type: WorkspaceDbType,
    pub path: Option<String>,
    pub version_name: Option<String>,
    pub default_version_name: Option<String>,
    pub default_version_description: Option<String>,
    pub default_version_created: Option<NaiveDateTime>,
}

impl WorkspaceIdentity {
    pub fn new(workspace_handle: i64, db_type: WorkspaceDbType) -> Self {
        Self {
            workspace_handle,
            db_type,
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_version(mut self, version_name: impl Into<String>) -> Self {
        self.version_name = Some(version_name.into());
        self
    }

    pub fn with_default_version(
        mut self,
        name: impl Into<String>,
        description: Option<String>,
        created: Option<NaiveDateTime>,
    ) -> Self {
        self.default_version_name = Some(name.into());
        self.default_version_description = description;
        self.default_version_created = created;
        self
    }

    /// Same underlying database, possibly a different version of it.
    pub fn is_same_database(&self, other: &WorkspaceIdentity) -> bool {
        if self.db_type != other.db_type {
            return false;
        }
        let same_path = match (&self.path, &other.path) {
            (Some(a), Some(b)) if self.db_type.is_file_based() => {
                UniCase::new(a.as_str()) == UniCase::new(b.as_str())
            }
            (a, b) => a == b,
        };
        same_path
            && self.default_version_name == other.default_version_name
            && self.default_version_created == other.default_version_created
    }
}

/// A set of virtual tables addressed by class handle, plus relationship query tables
/// addressed by relationship name.
///
/// Tables are added rarely and read constantly, so both maps are swapped whole on insert.
pub struct VirtualWorkspace {
    identity: WorkspaceIdentity,
    tables: ArcSwap<IndexMap<i64, Arc<VirtualTable>>>,
    query_tables: ArcSwap<IndexMap<UniCase<String>, Arc<VirtualTable>>>,
}

impl VirtualWorkspace {
    pub fn new(identity: WorkspaceIdentity) -> Self {
        Self {
            identity,
            tables: ArcSwap::from_pointee(IndexMap::new()),
            query_tables: ArcSwap::from_pointee(IndexMap::new()),
        }
    }

    /// The workspace standing in for "no workspace": handle -1, no tables.
    pub fn null_workspace() -> Self {
        Self::new(WorkspaceIdentity::new(-1, WorkspaceDbType::Other))
    }

    pub fn identity(&self) -> &WorkspaceIdentity {
        &self.identity
    }

    pub fn workspace_handle(&self) -> i64 {
        self.identity.workspace_handle
    }

    /// Add a table. Returns false, leaving the workspace unchanged, if its class handle is
    /// already taken.
    pub fn try_add(&self, table: Arc<VirtualTable>) -> bool {
        let class_handle = table.class_handle();
        let mut added = false;
        self.tables.rcu(|current| {
            if current.contains_key(&class_handle) {
                added = false;
                return current.clone();
            }
            let mut next = (**current).clone();
            next.insert(class_handle, table.clone());
            added = true;
            Arc::new(next)
        });
        if !added {
            warn!(class_handle, "class handle already present in workspace");
        }
        added
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<VirtualTable>> {
        let name = UniCase::new(name);
        self.tables
            .load()
            .values()
            .find(|t| UniCase::new(t.name().as_str()) == name)
            .cloned()
    }

    pub fn table_by_class_handle(&self, class_handle: i64) -> Option<Arc<VirtualTable>> {
        self.tables.load().get(&class_handle).cloned()
    }

    /// Resolve an identity pair. Pairs naming another workspace resolve to nothing.
    pub fn table_by_class_def(&self, class_def: &ClassDef) -> Option<Arc<VirtualTable>> {
        if class_def.workspace_handle != self.identity.workspace_handle {
            return None;
        }
        self.table_by_class_handle(class_def.class_handle)
    }

    pub fn class_def(&self, table: &VirtualTable) -> ClassDef {
        ClassDef::new(table.class_handle(), self.identity.workspace_handle)
    }

    pub fn tables(&self) -> Vec<Arc<VirtualTable>> {
        self.tables.load().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.load().is_empty()
    }

    /// Register a relationship query table under its relationship name, replacing any
    /// earlier registration.
    pub fn add_query_table(&self, relationship_name: &str, table: Arc<VirtualTable>) {
        let key = UniCase::new(relationship_name.to_string());
        self.query_tables.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(key.clone(), table.clone());
            Arc::new(next)
        });
    }

    pub fn open_query_table(&self, relationship_name: &str) -> Option<Arc<VirtualTable>> {
        self.query_tables
            .load()
            .get(&UniCase::new(relationship_name.to_string()))
            .cloned()
    }
}

impl PartialEq for VirtualWorkspace {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for VirtualWorkspace {}

impl std::fmt::Debug for VirtualWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualWorkspace")
            .field("identity", &self.identity)
            .field("tables", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, class_handle: i64) -> Arc<VirtualTable> {
        Arc::new(VirtualTable::new(name, class_handle))
    }

    #[test]
    fn test_try_add_rejects_duplicate_handle() {
        let ws = VirtualWorkspace::new(WorkspaceIdentity::new(7, WorkspaceDbType::FileGeodatabase));
        assert!(ws.try_add(table("ROADS", 1)));
        assert!(!ws.try_add(table("RAILWAYS", 1)));
        assert_eq!(ws.len(), 1);
        assert_eq!(ws.table_by_class_handle(1).unwrap().name(), "ROADS");
    }

    #[test]
    fn test_lookup_by_name_and_class_def() {
        let ws = VirtualWorkspace::new(WorkspaceIdentity::new(7, WorkspaceDbType::PostgreSql));
        let roads = table("ROADS", 1);
        ws.try_add(roads.clone());
        ws.try_add(table("BUILDINGS", 2));

        assert_eq!(ws.table_by_name("roads").unwrap().class_handle(), 1);
        assert_eq!(ws.class_def(&roads), ClassDef::new(1, 7));
        assert!(ws.table_by_class_def(&ClassDef::new(2, 7)).is_some());
        assert!(ws.table_by_class_def(&ClassDef::new(2, 8)).is_none());
        let names: Vec<String> = ws.tables().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["ROADS", "BUILDINGS"]);
    }

    #[test]
    fn test_identity_is_structural() {
        let a = VirtualWorkspace::new(
            WorkspaceIdentity::new(3, WorkspaceDbType::FileGeodatabase).with_path("C:/data/tlm.gdb"),
        );
        let b = VirtualWorkspace::new(
            WorkspaceIdentity::new(3, WorkspaceDbType::FileGeodatabase).with_path("C:/data/tlm.gdb"),
        );
        assert_eq!(a, b);
        assert_ne!(a, VirtualWorkspace::null_workspace());
    }

    #[test]
    fn test_same_database_ignores_version_and_path_case() {
        let base = WorkspaceIdentity::new(3, WorkspaceDbType::FileGeodatabase)
            .with_path("C:/Data/TLM.gdb");
        let other = WorkspaceIdentity::new(3, WorkspaceDbType::FileGeodatabase)
            .with_path("c:/data/tlm.gdb")
            .with_version("edit_1");
        assert_ne!(base, other);
        assert!(base.is_same_database(&other));

        let sde_a = WorkspaceIdentity::new(4, WorkspaceDbType::ArcSde).with_path("Server=A");
        let sde_b = WorkspaceIdentity::new(4, WorkspaceDbType::ArcSde).with_path("server=a");
        assert!(!sde_a.is_same_database(&sde_b));
    }

    #[test]
    fn test_query_tables_by_relationship_name() {
        let ws = VirtualWorkspace::null_workspace();
        ws.add_query_table("RoadsToSigns", table("ROADS_SIGNS", 100));
        assert_eq!(
            ws.open_query_table("roadstosigns").unwrap().class_handle(),
            100
        );
        assert!(ws.open_query_table("Other").is_none());
        assert!(ws.is_empty());
    }
}

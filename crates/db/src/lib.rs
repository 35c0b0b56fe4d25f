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

//! Virtual tables: the table, row and workspace API that verification code reads through,
//! backed by whatever [`BackingStore`] a table is bound to.

mod backing;
mod cursor;
mod row;
mod schema;
mod table;
mod value_storage;
mod workspace;

pub use backing::{BackingStore, InMemoryBacking, RecordStream};
pub use cursor::RowCursor;
pub use row::{Row, RowRecord};
pub use schema::{DatasetKind, TableSchema};
pub use table::VirtualTable;
pub use value_storage::{PropertySet, StorageKind, ValueStorage};
pub use workspace::{VirtualWorkspace, WorkspaceDbType, WorkspaceIdentity};

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

use crate::row::RowRecord;
use vgdb_common::{Envelope, QueryFilter, TableError};

mod memory;

pub use memory::InMemoryBacking;

/// A lazy, forward-only stream of records. Dropping it abandons the search.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<RowRecord, TableError>> + 'a>;

/// The `BackingStore` trait is the source of rows behind a virtual table.
///
/// Implementations answer purely from what they hold or can fetch; the table supplies nothing
/// beyond the filter.
pub trait BackingStore: Send + Sync {
    /// Bounding box of all geometries, None if there are none.
    fn extent(&self) -> Result<Option<Envelope>, TableError>;

    fn row_count(&self, filter: &QueryFilter) -> Result<i64, TableError>;

    /// The row with the given object id, if there is one.
    fn get_row(&self, oid: i64) -> Result<Option<RowRecord>, TableError>;

    /// Rows matching the filter, in store order. `recycling` is a hint that the caller will
    /// not keep rows past the next advance.
    fn search(&self, filter: &QueryFilter, recycling: bool)
    -> Result<RecordStream<'_>, TableError>;
}

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

use crate::backing::RecordStream;
use crate::row::Row;
use crate::schema::TableSchema;
use crate::value_storage::StorageKind;
use std::sync::Arc;
use vgdb_common::TableError;

/// Forward-only result of a table search.
///
/// Two ways to consume it:
/// - [`RowCursor::advance`] lends a row that is only valid until the next call. With
///   recycling on, the same row is reloaded in place for every result, and the borrow checker
///   stops anyone from reading it after it has moved on.
/// - As an `Iterator`, which always yields freshly built rows the caller may keep.
///
/// Dropping the cursor abandons the search and releases whatever the backing store holds for
/// it.
pub struct RowCursor<'a> {
    schema: Arc<TableSchema>,
    records: RecordStream<'a>,
    recycling: bool,
    storage_kind: StorageKind,
    slot: Option<Row>,
}

impl<'a> RowCursor<'a> {
    pub(crate) fn new(
        schema: Arc<TableSchema>,
        records: RecordStream<'a>,
        recycling: bool,
        storage_kind: StorageKind,
    ) -> Self {
        Self {
            schema,
            records,
            recycling,
            storage_kind,
            slot: None,
        }
    }

    pub fn is_recycling(&self) -> bool {
        self.recycling
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn advance(&mut self) -> Option<Result<&Row, TableError>> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        let loaded = match self.slot.take() {
            Some(mut row) if self.recycling => row.fill(record).map(|_| row),
            _ => Row::from_record(self.schema.clone(), record, self.storage_kind),
        };
        match loaded {
            Ok(row) => Some(Ok(&*self.slot.insert(row))),
            Err(e) => Some(Err(e)),
        }
    }

    /// Stop the search early. Same as dropping the cursor.
    pub fn cancel(self) {}
}

impl Iterator for RowCursor<'_> {
    type Item = Result<Row, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        Some(Row::from_record(
            self.schema.clone(),
            record,
            self.storage_kind,
        ))
    }
}

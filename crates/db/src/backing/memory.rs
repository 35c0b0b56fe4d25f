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

use crate::backing::{BackingStore, RecordStream};
use crate::row::{Row, RowRecord};
use std::sync::{PoisonError, RwLock};
use tracing::trace;
use vgdb_common::{Envelope, QueryFilter, RowAccess, TableError};

/// Backing store over an ordered list of pre-built rows.
///
/// Nothing is cached between calls: every count and search evaluates the filter against the
/// rows present at that moment. Object ids are not checked for uniqueness here.
#[derive(Debug, Default)]
pub struct InMemoryBacking {
    rows: RwLock<Vec<Row>>,
}

impl InMemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = Row>) -> Self {
        Self {
            rows: RwLock::new(rows.into_iter().collect()),
        }
    }

    pub fn insert(&self, row: Row) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row);
    }

    /// Remove every row with the given id, returning how many were removed.
    pub fn remove(&self, oid: i64) -> usize {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let before = rows.len();
        rows.retain(|r| r.oid() != oid);
        before - rows.len()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matching(&self, filter: &QueryFilter) -> Result<Vec<RowRecord>, TableError> {
        let compiled = filter.compile()?;
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let mut matched = Vec::new();
        for row in rows.iter() {
            if compiled.matches(row)? {
                matched.push(row.to_record());
            }
        }
        trace!(
            where_clause = %filter.where_clause,
            matched = matched.len(),
            total = rows.len(),
            "in-memory search"
        );
        Ok(matched)
    }
}

impl BackingStore for InMemoryBacking {
    fn extent(&self) -> Result<Option<Envelope>, TableError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows
            .iter()
            .filter_map(|r| r.geometry().and_then(|g| g.envelope()))
            .reduce(|acc, e| acc.union(&e)))
    }

    fn row_count(&self, filter: &QueryFilter) -> Result<i64, TableError> {
        let compiled = filter.compile()?;
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        for row in rows.iter() {
            if compiled.matches(row)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn get_row(&self, oid: i64) -> Result<Option<RowRecord>, TableError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.iter().find(|r| r.oid() == oid).map(Row::to_record))
    }

    fn search(
        &self,
        filter: &QueryFilter,
        _recycling: bool,
    ) -> Result<RecordStream<'_>, TableError> {
        // Snapshot under the lock so callers iterate without holding it.
        let matched = self.matching(filter)?;
        Ok(Box::new(matched.into_iter().map(Ok)))
    }
}

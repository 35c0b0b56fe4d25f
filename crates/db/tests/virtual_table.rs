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

//! Behaviour of virtual tables over the in-memory backing store, as seen through the public
//! table API.

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use test_case::test_case;
    use vgdb_common::{
        Envelope, Field, FieldType, Geometry, GeometryType, QueryFilter, SpatialReference,
        TableError, Value,
    };
    use vgdb_db::{InMemoryBacking, StorageKind, VirtualTable};

    fn buildings(kind: StorageKind) -> VirtualTable {
        let table = VirtualTable::new_feature_class(
            "BUILDINGS",
            4,
            Field::shape(
                "SHAPE",
                GeometryType::Polygon,
                SpatialReference::from_wkid(2056),
            ),
        )
        .unwrap()
        .with_storage_kind(kind);
        table.add_field(Field::object_id("OBJECTID")).unwrap();
        table
            .add_field(Field::new("NAME", FieldType::String).length(100))
            .unwrap();
        table.add_field(Field::new("FLOORS", FieldType::SmallInteger)).unwrap();
        table.add_field(Field::new("HEIGHT", FieldType::Double)).unwrap();
        table.add_field(Field::new("SURVEYED", FieldType::Date)).unwrap();
        table
    }

    fn square(x: f64, y: f64) -> Arc<Geometry> {
        Arc::new(Geometry::Envelope(Envelope::new(x, y, x + 1.0, y + 1.0)))
    }

    fn sample_values(oid: i64) -> Vec<(usize, Value)> {
        vec![
            (2, Value::from(format!("house {oid}"))),
            (3, Value::SmallInteger(oid as i16)),
            (4, Value::Double(oid as f64 * 3.5)),
            (
                5,
                Value::Date(
                    NaiveDate::from_ymd_opt(2020, 1, oid as u32)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                ),
            ),
        ]
    }

    fn populate(table: &VirtualTable, oids: &[i64]) -> Arc<InMemoryBacking> {
        let backing = Arc::new(InMemoryBacking::new());
        for oid in oids {
            let mut row = table.create_row(*oid);
            for (index, value) in sample_values(*oid) {
                row.set(index, value).unwrap();
            }
            row.set_shape(Some(square(*oid as f64 * 10.0, 0.0))).unwrap();
            backing.insert(row);
        }
        backing
    }

    #[test_case(StorageKind::Array; "array storage")]
    #[test_case(StorageKind::PropertySet; "property set storage")]
    fn test_values_round_trip(kind: StorageKind) {
        let table = buildings(kind);
        let backing = populate(&table, &[1, 2, 3]);
        table.bind(backing).unwrap();

        for oid in [1, 2, 3] {
            let row = table.get_row(oid).unwrap();
            assert_eq!(row.storage_kind(), kind);
            assert_eq!(row.oid(), oid);
            assert_eq!(row.get(1).unwrap(), &Value::BigInteger(oid));
            for (index, value) in sample_values(oid) {
                assert_eq!(row.get(index).unwrap(), &value);
            }
            assert_eq!(row.shape(), Some(square(oid as f64 * 10.0, 0.0)));
        }

        let fresh: Vec<i64> = table
            .search(&QueryFilter::new(), false)
            .unwrap()
            .map(|r| r.unwrap().oid())
            .collect();
        assert_eq!(fresh, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_field_leaves_schema_unchanged() {
        let table = buildings(StorageKind::Array);
        let before: Vec<String> = table
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();

        assert_eq!(
            table.add_field(Field::new("Name", FieldType::Integer)),
            Err(TableError::DuplicateField("Name".into()))
        );
        assert!(matches!(
            table.add_field(Field::object_id("FID")),
            Err(TableError::DuplicateObjectIdField(_))
        ));

        let after: Vec<String> = table
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_recycled_row_does_not_keep_old_values() {
        let table = buildings(StorageKind::Array);
        let mut row = table.create_row(1);
        row.set(2, Value::from("old")).unwrap();
        row.recycle(2);
        assert_eq!(row.oid(), 2);
        assert_eq!(row.get(2).unwrap(), &Value::Null);
    }

    #[test]
    fn test_filter_counts_follow_inserts() {
        let table = VirtualTable::new("T", 1);
        table.add_field(Field::object_id("OID")).unwrap();
        let backing = Arc::new(InMemoryBacking::new());
        for oid in [1, 2, 3] {
            backing.insert(table.create_row(oid));
        }
        table.bind(backing.clone()).unwrap();

        let positive = QueryFilter::new().with_where_clause("OID > 0");
        let negative = QueryFilter::new().with_where_clause("OID < 0");
        assert_eq!(table.row_count(&positive).unwrap(), 3);
        assert_eq!(table.row_count(&negative).unwrap(), 0);

        backing.insert(table.create_row(1));
        assert_eq!(table.row_count(&positive).unwrap(), 4);
        assert_eq!(
            table
                .row_count(&QueryFilter::new().with_where_clause("OID = 1"))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_bind_twice_fails() {
        let table = buildings(StorageKind::Array);
        let first = populate(&table, &[1]);
        table.bind(first).unwrap();
        let second = populate(&table, &[5, 6]);
        assert_eq!(
            table.bind(second),
            Err(TableError::AlreadyBound("BUILDINGS".into()))
        );
        // Still reading from the first store.
        assert_eq!(table.row_count(&QueryFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_spatial_filter_and_extent() {
        let table = buildings(StorageKind::Array);
        table.bind(populate(&table, &[1, 2, 3])).unwrap();

        let filter = QueryFilter::new()
            .with_search_geometry(Geometry::Envelope(Envelope::new(15.0, -5.0, 25.0, 5.0)));
        let oids: Vec<i64> = table
            .search(&filter, true)
            .unwrap()
            .map(|r| r.unwrap().oid())
            .collect();
        assert_eq!(oids, vec![2]);

        assert_eq!(
            table.extent().unwrap(),
            Some(Envelope::new(10.0, 0.0, 31.0, 1.0))
        );
    }

    #[test]
    fn test_geometry_reference_released_on_replace() {
        let table = buildings(StorageKind::PropertySet);
        let mut row = table.create_row(1);
        let original = square(0.0, 0.0);
        row.set_shape(Some(original.clone())).unwrap();
        let read = row.shape().unwrap();
        assert_eq!(Arc::strong_count(&original), 3);
        drop(read);
        row.set_shape(Some(square(5.0, 5.0))).unwrap();
        assert_eq!(Arc::strong_count(&original), 1);
    }

    #[test]
    fn test_not_found_is_recoverable() {
        let table = buildings(StorageKind::Array);
        table.bind(populate(&table, &[1])).unwrap();
        let err = table.get_row(99).unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_unavailable());
    }
}

use crate::backend::{Direction, Filter, FilterOp, QuerySpec, SortKey};
use crate::db::Database;
use crate::document::Document;
use crate::error::{DocuDbError, Result};
use serde_json::Value;

/// An immutable, lazily-executed query description.
///
/// Chaining calls consume the builder and return a new one; `Clone` lets a
/// partially-built query be branched safely. Nothing touches the store until
/// a terminal operation (`collect`, `first`, `take`, `unique`) runs, and the
/// terminal consumes the builder.
#[derive(Clone)]
pub struct Query<'a> {
    db: &'a Database,
    table: String,
    spec: QuerySpec,
}

impl<'a> Query<'a> {
    pub(crate) fn new(db: &'a Database, table: impl Into<String>) -> Self {
        Query {
            db,
            table: table.into(),
            spec: QuerySpec::default(),
        }
    }

    /// Add one `(field, operator, value)` condition. Conditions are
    /// conjunctive, and the same field may appear several times (ranges).
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.spec.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Add one sort key. Repeated calls build a composite sort in call order.
    pub fn order(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.spec.order.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    /// Cap the number of emitted documents.
    pub fn limit(mut self, n: usize) -> Self {
        self.spec.limit = Some(n);
        self
    }

    /// Execute and return every match, each validated against the table
    /// schema before it is handed back.
    pub fn collect(self) -> Result<Vec<Document>> {
        self.db.execute_query(&self.table, &self.spec)
    }

    /// Execute with a cap of `n`.
    pub fn take(self, n: usize) -> Result<Vec<Document>> {
        self.limit(n).collect()
    }

    /// Execute and return the first match, if any.
    pub fn first(self) -> Result<Option<Document>> {
        Ok(self.limit(1).collect()?.into_iter().next())
    }

    /// Execute expecting at most one match. Runs with a cap of two so a
    /// second match is detected rather than silently discarded; fails with
    /// a query error when it shows up.
    pub fn unique(self) -> Result<Option<Document>> {
        let table = self.table.clone();
        let mut results = self.limit(2).collect()?;
        match results.len() {
            0 => Ok(None),
            1 => Ok(results.pop()),
            _ => Err(DocuDbError::Query(format!(
                "unique() matched more than one document in '{table}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::db::{DatabaseReader, DatabaseWriter};
    use crate::schema::parse_schema_str;
    use serde_json::json;

    fn seeded_database() -> Database {
        let schema = parse_schema_str(
            r#"
tables:
  users:
    fields:
      name: { type: string }
      role: { type: string }
      age: { type: number }
"#,
        )
        .unwrap();
        let db = Database::new(schema, SqliteBackend::open_in_memory().unwrap());

        {
            let writer = db.writer();
            for (name, role, age) in [
                ("Dana", "user", 27),
                ("Alice", "admin", 34),
                ("Bob", "user", 28),
                ("Cara", "user", 41),
            ] {
                writer
                    .insert("users", json!({"name": name, "role": role, "age": age}))
                    .unwrap();
            }
        }
        db
    }

    #[test]
    fn test_filter_order_limit() {
        let db = seeded_database();
        let reader = db.reader();

        // role == "user", ordered by name ascending, at most 2.
        let docs = reader
            .query("users")
            .unwrap()
            .filter("role", FilterOp::Eq, "user")
            .order("name", Direction::Asc)
            .limit(2)
            .collect()
            .unwrap();

        assert_eq!(docs.len(), 2);
        for doc in &docs {
            assert_eq!(doc.get("role"), Some(&json!("user")));
        }
        let names: Vec<_> = docs.iter().map(|d| d.get("name").cloned()).collect();
        assert_eq!(names, vec![Some(json!("Bob")), Some(json!("Cara"))]);
    }

    #[test]
    fn test_conjunctive_range_filters() {
        let db = seeded_database();
        let docs = db
            .reader()
            .query("users")
            .unwrap()
            .filter("age", FilterOp::Gte, 28)
            .filter("age", FilterOp::Lt, 41)
            .collect()
            .unwrap();

        let names: Vec<_> = docs.iter().map(|d| d.get("name").cloned()).collect();
        assert_eq!(names, vec![Some(json!("Alice")), Some(json!("Bob"))]);
    }

    #[test]
    fn test_composite_order() {
        let db = seeded_database();
        let docs = db
            .reader()
            .query("users")
            .unwrap()
            .order("role", Direction::Asc)
            .order("age", Direction::Desc)
            .collect()
            .unwrap();

        let names: Vec<_> = docs.iter().map(|d| d.get("name").cloned()).collect();
        assert_eq!(
            names,
            vec![
                Some(json!("Alice")),
                Some(json!("Cara")),
                Some(json!("Bob")),
                Some(json!("Dana")),
            ]
        );
    }

    #[test]
    fn test_first_and_take() {
        let db = seeded_database();
        let reader = db.reader();

        let first = reader
            .query("users")
            .unwrap()
            .order("age", Direction::Asc)
            .first()
            .unwrap()
            .unwrap();
        assert_eq!(first.get("name"), Some(&json!("Dana")));

        let none = reader
            .query("users")
            .unwrap()
            .filter("role", FilterOp::Eq, "ghost")
            .first()
            .unwrap();
        assert!(none.is_none());

        let two = reader.query("users").unwrap().take(2).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_unique_invariant() {
        let db = seeded_database();
        let reader = db.reader();

        let one = reader
            .query("users")
            .unwrap()
            .filter("role", FilterOp::Eq, "admin")
            .unique()
            .unwrap()
            .unwrap();
        assert_eq!(one.get("name"), Some(&json!("Alice")));

        let zero = reader
            .query("users")
            .unwrap()
            .filter("role", FilterOp::Eq, "ghost")
            .unique()
            .unwrap();
        assert!(zero.is_none());

        let err = reader
            .query("users")
            .unwrap()
            .filter("role", FilterOp::Eq, "user")
            .unique()
            .unwrap_err();
        assert!(matches!(err, DocuDbError::Query(_)));
    }

    #[test]
    fn test_builder_reuse_via_clone() {
        let db = seeded_database();
        let reader = db.reader();

        let base = reader
            .query("users")
            .unwrap()
            .filter("role", FilterOp::Eq, "user");

        let youngest = base
            .clone()
            .order("age", Direction::Asc)
            .first()
            .unwrap()
            .unwrap();
        let oldest = base
            .clone()
            .order("age", Direction::Desc)
            .first()
            .unwrap()
            .unwrap();

        assert_eq!(youngest.get("name"), Some(&json!("Dana")));
        assert_eq!(oldest.get("name"), Some(&json!("Cara")));

        // The base query is untouched by the branches.
        assert_eq!(base.collect().unwrap().len(), 3);
    }

    #[test]
    fn test_query_unknown_table() {
        let db = seeded_database();
        assert!(db.reader().query("ghosts").is_err());
    }

    #[test]
    fn test_system_field_ordering() {
        let db = seeded_database();
        let docs = db
            .reader()
            .query("users")
            .unwrap()
            .order("_creationTime", Direction::Desc)
            .collect()
            .unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.get("name").cloned()).collect();
        assert_eq!(
            names,
            vec![
                Some(json!("Cara")),
                Some(json!("Bob")),
                Some(json!("Alice")),
                Some(json!("Dana")),
            ]
        );
    }
}

use super::{Direction, FilterOp, QuerySpec, RawDocument, StoreBackend};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;

/// How the store mints opaque document keys. Every strategy draws from an
/// alphabet that excludes the identifier separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

/// Embedded SQLite implementation of the store boundary.
///
/// Documents live in one `documents` table with the user fields serialized
/// as JSON; filters and sort keys are translated to `json_extract`
/// expressions with bound parameters. Within an open transaction the same
/// connection observes its own earlier writes (read-your-writes), and an
/// uncommitted transaction is never visible elsewhere.
pub struct SqliteBackend {
    conn: Connection,
    key_strategy: KeyStrategy,
}

impl SqliteBackend {
    /// Open or create the store at the given file path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let backend = SqliteBackend {
            conn,
            key_strategy: KeyStrategy::default(),
        };
        backend.initialize_tables()?;
        Ok(backend)
    }

    /// Open an in-memory store (for testing and examples).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let backend = SqliteBackend {
            conn,
            key_strategy: KeyStrategy::default(),
        };
        backend.initialize_tables()?;
        Ok(backend)
    }

    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                tbl TEXT NOT NULL,
                doc_key TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                data_json TEXT NOT NULL,
                PRIMARY KEY (tbl, doc_key)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_created
                ON documents(tbl, created_at);
            ",
        )?;
        Ok(())
    }
}

impl StoreBackend for SqliteBackend {
    fn read(&self, table: &str, key: &str) -> Result<Option<RawDocument>> {
        let row = self
            .conn
            .query_row(
                "SELECT doc_key, created_at, data_json FROM documents
                 WHERE tbl = ?1 AND doc_key = ?2",
                params![table, key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((key, created_at, data_json)) => {
                let fields: Map<String, Value> = serde_json::from_str(&data_json)?;
                Ok(Some(RawDocument {
                    key,
                    creation_time_ms: created_at,
                    fields,
                }))
            }
            None => Ok(None),
        }
    }

    fn write(&self, table: &str, document: &RawDocument) -> Result<()> {
        let data_json = serde_json::to_string(&document.fields)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO documents (tbl, doc_key, created_at, data_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![table, document.key, document.creation_time_ms, data_json],
        )?;
        Ok(())
    }

    fn patch(&self, table: &str, key: &str, fields: &Map<String, Value>) -> Result<bool> {
        let existing = match self.read(table, key)? {
            Some(doc) => doc,
            None => return Ok(false),
        };

        let mut merged = existing.fields;
        for (name, value) in fields {
            merged.insert(name.clone(), value.clone());
        }

        let data_json = serde_json::to_string(&merged)?;
        self.conn.execute(
            "UPDATE documents SET data_json = ?1 WHERE tbl = ?2 AND doc_key = ?3",
            params![data_json, table, key],
        )?;
        Ok(true)
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM documents WHERE tbl = ?1 AND doc_key = ?2",
            params![table, key],
        )?;
        Ok(affected > 0)
    }

    fn query(&self, table: &str, spec: &QuerySpec) -> Result<Vec<RawDocument>> {
        let mut sql = String::from(
            "SELECT doc_key, created_at, data_json FROM documents WHERE tbl = ?",
        );
        let mut bound: Vec<rusqlite::types::Value> = vec![table.to_string().into()];

        for filter in &spec.filters {
            sql.push_str(" AND ");
            push_field_expr(&mut sql, &mut bound, &filter.field);
            match (filter.op, filter.value.is_null()) {
                (FilterOp::Eq, true) => sql.push_str(" IS NULL"),
                (FilterOp::Ne, true) => sql.push_str(" IS NOT NULL"),
                (op, _) => {
                    sql.push_str(op_sql(op));
                    sql.push('?');
                    bound.push(bind_value(&filter.value)?);
                }
            }
        }

        sql.push_str(" ORDER BY ");
        for key in &spec.order {
            push_field_expr(&mut sql, &mut bound, &key.field);
            sql.push_str(match key.direction {
                Direction::Asc => " ASC, ",
                Direction::Desc => " DESC, ",
            });
        }
        // Trailing tiebreak keeps result order deterministic; with no sort
        // keys this is also the default order.
        sql.push_str("created_at ASC, doc_key ASC");

        if let Some(limit) = spec.limit {
            sql.push_str(" LIMIT ?");
            bound.push((limit as i64).into());
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bound), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (key, created_at, data_json) = row?;
            let fields: Map<String, Value> = serde_json::from_str(&data_json)?;
            documents.push(RawDocument {
                key,
                creation_time_ms: created_at,
                fields,
            });
        }
        Ok(documents)
    }

    fn generate_key(&self) -> String {
        match self.key_strategy {
            KeyStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            KeyStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            KeyStrategy::Nanoid => nanoid::nanoid!(),
        }
    }

    fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Append the SQL expression selecting a field. The system fields map to
/// their columns; user fields go through `json_extract` with the path bound
/// as a parameter.
fn push_field_expr(sql: &mut String, bound: &mut Vec<rusqlite::types::Value>, field: &str) {
    match field {
        "_id" => sql.push_str("doc_key"),
        "_creationTime" => sql.push_str("created_at"),
        _ => {
            sql.push_str("json_extract(data_json, ?)");
            bound.push(json_path(field).into());
        }
    }
}

fn op_sql(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => " = ",
        FilterOp::Ne => " != ",
        FilterOp::Lt => " < ",
        FilterOp::Lte => " <= ",
        FilterOp::Gt => " > ",
        FilterOp::Gte => " >= ",
    }
}

/// Render a (possibly dotted) field path as a SQLite JSON path.
fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field.split('.') {
        path.push_str(".\"");
        path.push_str(segment);
        path.push('"');
    }
    path
}

/// Convert a JSON value to a bindable SQLite value. Booleans bind as 0/1 to
/// match what `json_extract` yields; arrays and objects bind as their JSON
/// text, which is how `json_extract` surfaces nested values.
fn bind_value(value: &Value) -> Result<rusqlite::types::Value> {
    Ok(match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => (*b as i64).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else {
                n.as_f64().unwrap_or_default().into()
            }
        }
        Value::String(s) => s.clone().into(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value)?.into(),
    })
}

use crate::error::{DocuDbError, Result};
use crate::ident::ID_SEPARATOR;
use crate::validate::Validator;
use serde_json::Value;
use std::collections::BTreeMap;

/// A declared secondary index: a name plus an ordered list of field paths.
/// Indexes are metadata for the underlying store; this layer never consults
/// them when executing queries.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<String>,
}

/// One table's field validators and declared indexes.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    fields: BTreeMap<String, Validator>,
    validator: Validator,
    indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    /// Define a table from its named field validators.
    pub fn new<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Validator)>,
    {
        let fields: BTreeMap<String, Validator> = fields
            .into_iter()
            .map(|(name, validator)| (name.into(), validator))
            .collect();
        let validator = Validator::Object(fields.clone());
        TableDefinition {
            fields,
            validator,
            indexes: Vec::new(),
        }
    }

    /// Declare a secondary index over the given field paths.
    pub fn with_index(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&Validator> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Validator> {
        &self.fields
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// Check a full document body (system fields excluded) against this
    /// table's closed field schema.
    pub fn validate_document(&self, value: &Value) -> Result<()> {
        self.validator.validate(value)
    }
}

/// The immutable registry mapping table names to their definitions.
///
/// Constructed once via [`SchemaBuilder`] or the YAML parser and shared
/// read-only afterwards; changing a schema means building a new one.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: BTreeMap<String, TableDefinition>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { tables: Vec::new() }
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    /// Look up a table, failing with a schema error when it is not defined.
    pub fn expect_table(&self, name: &str) -> Result<&TableDefinition> {
        self.tables
            .get(name)
            .ok_or_else(|| DocuDbError::Schema(format!("table '{name}' is not defined")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableDefinition)> {
        self.tables.iter().map(|(name, def)| (name.as_str(), def))
    }
}

/// Accumulates table definitions; all structural checks run in [`build`].
///
/// [`build`]: SchemaBuilder::build
pub struct SchemaBuilder {
    tables: Vec<(String, TableDefinition)>,
}

impl SchemaBuilder {
    pub fn table(mut self, name: impl Into<String>, definition: TableDefinition) -> Self {
        self.tables.push((name.into(), definition));
        self
    }

    /// Finalize the schema. Fails when a table name contains the identifier
    /// separator, a table is defined twice, an index name repeats within a
    /// table, or an index field path does not start at a declared field.
    pub fn build(self) -> Result<Schema> {
        let mut tables = BTreeMap::new();

        for (name, definition) in self.tables {
            if name.is_empty() || name.contains(ID_SEPARATOR) {
                return Err(DocuDbError::Schema(format!(
                    "table name '{name}' must be non-empty and free of '{ID_SEPARATOR}'"
                )));
            }

            let mut index_names = Vec::new();
            for index in definition.indexes() {
                if index_names.contains(&index.name) {
                    return Err(DocuDbError::Schema(format!(
                        "table '{name}' declares index '{}' twice",
                        index.name
                    )));
                }
                index_names.push(index.name.clone());

                for field_path in &index.fields {
                    let root = field_path.split('.').next().unwrap_or(field_path);
                    if definition.field(root).is_none() {
                        return Err(DocuDbError::Schema(format!(
                            "index '{}' on table '{name}' references undeclared field '{root}'",
                            index.name
                        )));
                    }
                }
            }

            if tables.insert(name.clone(), definition).is_some() {
                return Err(DocuDbError::Schema(format!(
                    "table '{name}' is defined twice"
                )));
            }
        }

        Ok(Schema { tables })
    }
}

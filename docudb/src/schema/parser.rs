use crate::error::{DocuDbError, Result};
use crate::validate::Validator;
use super::types::{Schema, TableDefinition};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a schema.yaml file into a Schema registry.
pub fn parse_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a Schema registry.
pub fn parse_schema_str(content: &str) -> Result<Schema> {
    let spec: SchemaSpec = serde_yaml::from_str(content)?;
    spec.into_schema()
}

#[derive(Debug, Deserialize)]
struct SchemaSpec {
    #[serde(default)]
    tables: BTreeMap<String, TableSpec>,
}

#[derive(Debug, Deserialize)]
struct TableSpec {
    #[serde(default)]
    fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
}

#[derive(Debug, Deserialize)]
struct IndexSpec {
    name: String,
    fields: Vec<String>,
}

/// Definition of a single field in the YAML schema format.
#[derive(Debug, Deserialize)]
struct FieldSpec {
    #[serde(rename = "type")]
    kind: FieldKind,
    #[serde(default)]
    optional: bool,
    #[serde(rename = "enum", default)]
    enum_values: Option<Vec<String>>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    items: Option<Box<FieldSpec>>,
    #[serde(default)]
    values: Option<Box<FieldSpec>>,
    #[serde(default)]
    fields: Option<BTreeMap<String, FieldSpec>>,
    #[serde(default)]
    variants: Option<Vec<FieldSpec>>,
    #[serde(default)]
    value: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FieldKind {
    String,
    Number,
    Boolean,
    Id,
    Array,
    Object,
    Union,
    Literal,
    Record,
    Any,
}

impl SchemaSpec {
    fn into_schema(self) -> Result<Schema> {
        let mut builder = Schema::builder();
        for (table_name, table) in self.tables {
            let mut fields = Vec::new();
            for (field_name, spec) in table.fields {
                let validator = spec.into_validator(&table_name, &field_name)?;
                fields.push((field_name, validator));
            }

            let mut definition = TableDefinition::new(fields);
            for index in table.indexes {
                definition = definition.with_index(index.name, index.fields);
            }
            builder = builder.table(table_name, definition);
        }
        builder.build()
    }
}

impl FieldSpec {
    fn into_validator(self, table: &str, field: &str) -> Result<Validator> {
        let fail = |message: &str| {
            DocuDbError::Schema(format!("field '{table}.{field}': {message}"))
        };

        let inner = match self.kind {
            FieldKind::String => match self.enum_values {
                // The `enum:` shorthand desugars to a union of string
                // literals.
                Some(values) => {
                    Validator::union(values.into_iter().map(Validator::literal).collect())
                }
                None => Validator::string(),
            },
            FieldKind::Number => Validator::number(),
            FieldKind::Boolean => Validator::boolean(),
            FieldKind::Id => {
                let target = self.table.ok_or_else(|| fail("id requires 'table'"))?;
                Validator::id(target)
            }
            FieldKind::Array => {
                let items = self.items.ok_or_else(|| fail("array requires 'items'"))?;
                Validator::array(items.into_validator(table, field)?)
            }
            FieldKind::Object => {
                let specs = self.fields.ok_or_else(|| fail("object requires 'fields'"))?;
                let mut fields = BTreeMap::new();
                for (name, spec) in specs {
                    let validator = spec.into_validator(table, &name)?;
                    fields.insert(name, validator);
                }
                Validator::Object(fields)
            }
            FieldKind::Union => {
                let variants = self
                    .variants
                    .ok_or_else(|| fail("union requires 'variants'"))?;
                if variants.is_empty() {
                    return Err(fail("union requires at least one variant"));
                }
                let mut branches = Vec::new();
                for variant in variants {
                    branches.push(variant.into_validator(table, field)?);
                }
                Validator::union(branches)
            }
            FieldKind::Literal => {
                let value = self.value.ok_or_else(|| fail("literal requires 'value'"))?;
                Validator::Literal(yaml_to_json(&value).map_err(|m| fail(&m))?)
            }
            FieldKind::Record => {
                let values = self.values.ok_or_else(|| fail("record requires 'values'"))?;
                Validator::record(values.into_validator(table, field)?)
            }
            FieldKind::Any => Validator::any(),
        };

        Ok(if self.optional {
            Validator::optional(inner)
        } else {
            inner
        })
    }
}

/// Convert a YAML value to the JSON value model used by validators.
fn yaml_to_json(yaml: &serde_yaml::Value) -> std::result::Result<serde_json::Value, String> {
    match yaml {
        serde_yaml::Value::Null => Ok(serde_json::Value::Null),
        serde_yaml::Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(serde_json::Value::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(serde_json::Value::Number(u.into()))
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .ok_or_else(|| format!("number {f} is not representable"))
            } else {
                Err("unrepresentable number".into())
            }
        }
        serde_yaml::Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        serde_yaml::Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(yaml_to_json(item)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                let key = key
                    .as_str()
                    .ok_or_else(|| "mapping keys must be strings".to_string())?;
                out.insert(key.to_string(), yaml_to_json(value)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_yaml::Value::Tagged(_) => Err("YAML tags are not supported".into()),
    }
}

// Document model - system fields plus schema-validated user fields

use crate::error::Result;
use crate::ident::DocumentId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Field name carrying the document identifier in flattened output.
pub const ID_FIELD: &str = "_id";

/// Field name carrying the creation timestamp in flattened output.
pub const CREATION_TIME_FIELD: &str = "_creationTime";

/// Whether a field name is reserved for system use. The underscore prefix is
/// reserved wholesale so future system fields never collide with user data.
pub fn is_system_field(name: &str) -> bool {
    name.starts_with('_')
}

/// One document: an identifier, the creation timestamp set once at insert,
/// and the schema-validated user fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub creation_time: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn creation_time_ms(&self) -> i64 {
        self.creation_time.timestamp_millis()
    }

    /// Flatten into a single JSON object with `_id` and `_creationTime`
    /// alongside the user fields.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert(ID_FIELD.into(), Value::String(self.id.to_string()));
        out.insert(
            CREATION_TIME_FIELD.into(),
            Value::Number(self.creation_time_ms().into()),
        );
        for (name, value) in &self.fields {
            out.insert(name.clone(), value.clone());
        }
        Value::Object(out)
    }

    /// Deserialize the user fields into a typed struct.
    pub fn deserialize_fields<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    fn sample() -> Document {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Alice"));
        fields.insert("role".into(), json!("admin"));
        Document {
            id: DocumentId::new("users", "abc"),
            creation_time: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap_or_default(),
            fields,
        }
    }

    #[test]
    fn test_to_value_flattens_system_fields() {
        let doc = sample();
        let value = doc.to_value();
        assert_eq!(value["_id"], json!("users:abc"));
        assert_eq!(value["_creationTime"], json!(1_700_000_000_000_i64));
        assert_eq!(value["name"], json!("Alice"));
    }

    #[test]
    fn test_deserialize_fields() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            name: String,
            role: String,
        }

        let user: User = sample().deserialize_fields().unwrap();
        assert_eq!(
            user,
            User {
                name: "Alice".into(),
                role: "admin".into()
            }
        );
    }

    #[test]
    fn test_system_field_names() {
        assert!(is_system_field(ID_FIELD));
        assert!(is_system_field(CREATION_TIME_FIELD));
        assert!(!is_system_field("name"));
    }
}

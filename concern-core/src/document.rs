//! Persisted layout of the defaults document in `config.settings`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DefaultsValue, ValidationError, PERSISTED_DOCUMENT_ID};

/// The single persisted defaults document, keyed by the sentinel id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultsDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub defaults: DefaultsValue,
}

impl DefaultsDocument {
    pub fn new(defaults: DefaultsValue) -> Self {
        Self {
            id: PERSISTED_DOCUMENT_ID.to_string(),
            defaults,
        }
    }

    /// Parse and check a raw document.
    pub fn parse(doc: &Value) -> Result<Self, ValidationError> {
        let parsed: DefaultsDocument =
            serde_json::from_value(doc.clone()).map_err(|e| ValidationError::MalformedDocument {
                reason: e.to_string(),
            })?;
        if parsed.id != PERSISTED_DOCUMENT_ID {
            return Err(ValidationError::MalformedDocument {
                reason: format!(
                    "_id must be '{}', found '{}'",
                    PERSISTED_DOCUMENT_ID, parsed.id
                ),
            });
        }
        Ok(parsed)
    }

    pub fn to_value(&self) -> Value {
        // DefaultsValue has no map keys or non-finite floats, so this cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn into_defaults(self) -> DefaultsValue {
        self.defaults
    }
}

/// Returns true if a written document id is the defaults sentinel id.
pub fn is_defaults_document_id(id: &Value) -> bool {
    id.as_str() == Some(PERSISTED_DOCUMENT_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Epoch, ReadConcern, ReadConcernLevel, WriteAcknowledgment, WriteConcern};
    use serde_json::json;

    #[test]
    fn test_parse_full_document() {
        let doc = json!({
            "_id": "ReadWriteConcernDefaults",
            "epoch": 3,
            "setTime": "2024-05-01T12:00:00Z",
            "defaultReadConcern": {"level": "majority"},
            "defaultWriteConcern": {"w": "majority", "wtimeout": 5000},
        });

        let parsed = DefaultsDocument::parse(&doc).unwrap();
        assert_eq!(parsed.defaults.epoch, Epoch(3));
        assert_eq!(
            parsed.defaults.read_concern.as_ref().map(|rc| rc.level),
            Some(ReadConcernLevel::Majority)
        );
        let wc = parsed.defaults.write_concern.unwrap();
        assert_eq!(wc.w, Some(WriteAcknowledgment::Majority));
        assert_eq!(wc.wtimeout_ms, Some(5000));
    }

    #[test]
    fn test_parse_rejects_wrong_id() {
        let doc = json!({"_id": "balancer", "epoch": 1, "setTime": "2024-05-01T12:00:00Z"});
        let err = DefaultsDocument::parse(&doc).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedDocument { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        let doc = json!({
            "_id": "ReadWriteConcernDefaults",
            "epoch": "not-a-number",
            "setTime": "2024-05-01T12:00:00Z",
        });
        assert!(DefaultsDocument::parse(&doc).is_err());

        let doc = json!({
            "_id": "ReadWriteConcernDefaults",
            "epoch": 1,
            "setTime": "2024-05-01T12:00:00Z",
            "defaultReadConcern": {"level": "eventual"},
        });
        assert!(DefaultsDocument::parse(&doc).is_err());
    }

    #[test]
    fn test_document_value_round_trip() {
        let defaults = DefaultsValue::new(
            Epoch(9),
            Some(ReadConcern::local()),
            Some(WriteConcern::nodes(2)),
        );
        let doc = DefaultsDocument::new(defaults.clone());
        let value = doc.to_value();

        assert_eq!(value["_id"], json!(PERSISTED_DOCUMENT_ID));
        assert_eq!(value["epoch"], json!(9));
        assert_eq!(value["defaultWriteConcern"], json!({"w": 2}));
        assert_eq!(DefaultsDocument::parse(&value).unwrap().into_defaults(), defaults);
    }

    #[test]
    fn test_is_defaults_document_id() {
        assert!(is_defaults_document_id(&json!("ReadWriteConcernDefaults")));
        assert!(!is_defaults_document_id(&json!("autosplit")));
        assert!(!is_defaults_document_id(&json!(42)));
    }
}

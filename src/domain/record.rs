use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::sync::Arc;

use super::field::{FieldIndex, FieldType, FieldValue, Projection};
use super::lob::LobId;

/// One exported knowledge article as received from the source: an ordered
/// mapping from field name to raw value (string or null)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawRecord {
    fields: Vec<(String, Option<String>)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an earlier value with the same name in place
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// `None` when the field is absent, `Some(None)` when it is present but null
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_deref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Build a record from one parsed export line. Scalars are kept as their
    /// textual form, nested arrays and objects as JSON text.
    pub fn from_json_object(object: serde_json::Map<String, serde_json::Value>) -> Self {
        use serde_json::Value;

        object
            .into_iter()
            .map(|(name, value)| {
                let raw = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    Value::Bool(b) => Some(b.to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
                };
                (name, raw)
            })
            .collect()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for RawRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, Option<V>)>>(iter: T) -> Self {
        let mut record = RawRecord::new();
        for (name, value) in iter {
            record.insert(name, value.map(Into::into));
        }
        record
    }
}

/// Per-record notes collected while the record moves through the stages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A raw value could not be coerced; the field was nulled
    CoercionFailure {
        field: String,
        declared: FieldType,
        raw: String,
    },
    /// A non-dropping validation rule was violated
    ValidationWarning { rule: String, field: String },
}

/// A raw record narrowed to exactly the projection's fields, in projection order
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    sequence: u64,
    projection: Arc<Projection>,
    values: Vec<Option<FieldValue>>,
    diagnostics: Vec<Diagnostic>,
}

impl ProjectedRecord {
    pub(crate) fn new(
        sequence: u64,
        projection: Arc<Projection>,
        values: Vec<Option<FieldValue>>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        debug_assert_eq!(projection.len(), values.len());
        Self {
            sequence,
            projection,
            values,
            diagnostics,
        }
    }

    /// Arrival position of the raw record within the run
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn value(&self, index: FieldIndex) -> Option<&FieldValue> {
        self.values[index.0].as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.projection
            .index_of(name)
            .and_then(|index| self.value(index))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.projection.fields().iter().map(|spec| spec.name.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&FieldValue>)> {
        self.projection
            .fields()
            .iter()
            .zip(self.values.iter())
            .map(|(spec, value)| (spec.name.as_str(), value.as_ref()))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Value of the projection's key field, used to name records in reports
    pub fn key(&self) -> Option<String> {
        self.projection
            .key_field()
            .and_then(|index| self.value(index))
            .map(ToString::to_string)
    }

    pub(crate) fn with_diagnostics(mut self, extra: Vec<Diagnostic>) -> Self {
        self.diagnostics.extend(extra);
        self
    }

    pub(crate) fn with_value(mut self, index: FieldIndex, value: Option<FieldValue>) -> Self {
        self.values[index.0] = value;
        self
    }
}

impl Serialize for ProjectedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.fields() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// A validated record together with the lines of business it was assigned to
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    record: ProjectedRecord,
    lobs: Vec<LobId>,
}

impl ClassifiedRecord {
    pub fn new(record: ProjectedRecord, lobs: Vec<LobId>) -> Self {
        Self { record, lobs }
    }

    pub fn record(&self) -> &ProjectedRecord {
        &self.record
    }

    pub fn lobs(&self) -> &[LobId] {
        &self.lobs
    }

    pub fn sequence(&self) -> u64 {
        self.record.sequence()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.record.get(name)
    }
}

impl Serialize for ClassifiedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ClassifiedRecord", 4)?;
        state.serialize_field("sequence", &self.record.sequence())?;
        state.serialize_field("lobs", &self.lobs)?;
        state.serialize_field("fields", &self.record)?;
        state.serialize_field("diagnostics", self.record.diagnostics())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field::FieldSpec;
    use serde_json::json;

    #[test]
    fn test_raw_record_distinguishes_absent_and_null() {
        let record: RawRecord = [("Title", Some("Reset a password")), ("UrlName", None)]
            .into_iter()
            .collect();

        assert_eq!(record.get("Title"), Some(Some("Reset a password")));
        assert_eq!(record.get("UrlName"), Some(None));
        assert_eq!(record.get("Content__c"), None);
    }

    #[test]
    fn test_raw_record_from_json_object_stringifies_scalars() {
        let value = json!({
            "Id": "kA01",
            "VersionNumber": 3,
            "IsLatestVersion": true,
            "Summary": null,
            "Tags": ["a", "b"]
        });
        let serde_json::Value::Object(object) = value else {
            panic!("expected object");
        };
        let record = RawRecord::from_json_object(object);

        assert_eq!(record.get("VersionNumber"), Some(Some("3")));
        assert_eq!(record.get("IsLatestVersion"), Some(Some("true")));
        assert_eq!(record.get("Summary"), Some(None));
        assert_eq!(record.get("Tags"), Some(Some(r#"["a","b"]"#)));
    }

    #[test]
    fn test_classified_record_serializes_fields_in_projection_order() {
        let projection = Arc::new(
            Projection::new(vec![
                FieldSpec::new("Id", FieldType::Identifier),
                FieldSpec::new("Title", FieldType::String),
            ])
            .unwrap(),
        );
        let record = ProjectedRecord::new(
            7,
            projection,
            vec![Some(FieldValue::Identifier("kA01".to_string())), None],
            vec![],
        );
        let classified = ClassifiedRecord::new(record, vec![LobId::new("Retail").unwrap()]);

        let line = serde_json::to_string(&classified).unwrap();
        assert_eq!(
            line,
            r#"{"sequence":7,"lobs":["Retail"],"fields":{"Id":"kA01","Title":null},"diagnostics":[]}"#
        );
    }
}

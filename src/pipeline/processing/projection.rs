use std::sync::Arc;

use crate::domain::{Diagnostic, ProjectedRecord, Projection, RawRecord};

/// Narrow a raw record to exactly the projection's fields.
///
/// Absent, null and blank values become null. Values that fail coercion to
/// the declared type also become null, with a `CoercionFailure` diagnostic;
/// projection itself never fails.
pub fn project(sequence: u64, raw: &RawRecord, projection: &Arc<Projection>) -> ProjectedRecord {
    let mut values = Vec::with_capacity(projection.len());
    let mut diagnostics = Vec::new();

    for spec in projection.fields() {
        let value = match raw.get(&spec.name).flatten() {
            None => None,
            Some(raw_value) if raw_value.trim().is_empty() => None,
            Some(raw_value) => match spec.data_type.coerce(raw_value) {
                Ok(value) => Some(value),
                Err(failure) => {
                    diagnostics.push(Diagnostic::CoercionFailure {
                        field: spec.name.clone(),
                        declared: failure.declared,
                        raw: failure.raw,
                    });
                    None
                }
            },
        };
        values.push(value);
    }

    ProjectedRecord::new(sequence, Arc::clone(projection), values, diagnostics)
}

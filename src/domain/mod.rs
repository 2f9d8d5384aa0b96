// Domain data shapes shared across the pipeline stages, sinks and CLI

pub mod field;
pub mod lob;
pub mod record;

pub use field::{CoercionError, FieldIndex, FieldSpec, FieldType, FieldValue, Projection};
pub use lob::LobId;
pub use record::{ClassifiedRecord, Diagnostic, ProjectedRecord, RawRecord};

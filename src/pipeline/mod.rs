// Record pipeline: per-record processing stages, batch assembly and the run loop

pub mod assembler;
pub mod cancel;
pub mod processing;
pub mod runner;

pub use assembler::{BatchAssembler, DropEntry, DropStage, OutputBatch, ProcessingSummary, RecordOutcome, RunOutput};
pub use cancel::{cancellation, CancelHandle, Cancellation};
pub use runner::{Pipeline, RunSettings};

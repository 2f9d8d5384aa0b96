pub mod classify_use_case;
pub mod ports;

pub use classify_use_case::{ClassifyUseCase, RunReport, SinkOutcome};
pub use ports::{BatchSink, SinkReport};

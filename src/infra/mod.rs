pub mod html_publish_sink;
pub mod ndjson_batch_sink;
pub mod ndjson_source;

pub use html_publish_sink::HtmlPublishSink;
pub use ndjson_batch_sink::NdjsonBatchSink;
pub use ndjson_source::{NdjsonRecordSource, SourceStats, SourceStatsSnapshot};

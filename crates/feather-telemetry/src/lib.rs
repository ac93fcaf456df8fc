pub mod metrics_sink;
pub mod ndjson;
pub mod tracker;

pub use metrics_sink::MetricsObserver;
pub use ndjson::{NdjsonSink, NdjsonTraceWriter};
pub use tracker::{RunMetrics, RunStatus, RunTracker};

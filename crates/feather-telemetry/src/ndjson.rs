use crate::tracker::RunTracker;
use chrono::Utc;
use feather_core::{Event, EventObserver};
use std::io::Write;
use std::sync::{Arc, Mutex};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

fn write_line(writer: &SharedWriter, value: &serde_json::Value) {
    let Ok(line) = serde_json::to_string(value) else {
        return;
    };
    let mut w = match writer.lock() {
        Ok(w) => w,
        Err(e) => e.into_inner(),
    };
    if writeln!(w, "{line}").is_err() {
        tracing::warn!("ndjson sink: failed to write event line");
        return;
    }
    let _ = w.flush();
}

/// One JSON object per event, each stamped with an ISO-8601 `timestamp`
/// (spec §6's NDJSON trace). No summary lines — see [`NdjsonTraceWriter`]
/// for the composition that adds those.
pub struct NdjsonSink {
    writer: SharedWriter,
}

impl NdjsonSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }
}

impl EventObserver for NdjsonSink {
    fn on_event(&self, event: &Event) {
        let mut fields = event.fields();
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("type".into(), serde_json::json!(event.type_name()));
            obj.insert("timestamp".into(), serde_json::json!(Utc::now().to_rfc3339()));
            obj.insert("sessionId".into(), serde_json::json!(event.session_id()));
        }
        write_line(&self.writer, &fields);
    }
}

/// Pairs the per-event NDJSON line with a [`RunTracker`]: every run gets a
/// trailing `agent.run.summary` line containing `{status, startedAt,
/// completedAt, elapsedMs, metrics}` once it completes or errors (spec
/// §6). This is what the CLI wires up by default.
pub struct NdjsonTraceWriter {
    writer: SharedWriter,
    tracker: RunTracker,
}

impl NdjsonTraceWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let summary_writer = writer.clone();
        let tracker = RunTracker::with_on_complete(move |m| {
            write_line(
                &summary_writer,
                &serde_json::json!({
                    "type": "agent.run.summary",
                    "status": m.status,
                    "startedAt": m.started_at.to_rfc3339(),
                    "completedAt": m.completed_at.map(|d| d.to_rfc3339()),
                    "elapsedMs": m.elapsed_ms,
                    "metrics": m,
                }),
            );
        });
        Self { writer, tracker }
    }
}

impl EventObserver for NdjsonTraceWriter {
    fn on_event(&self, event: &Event) {
        let mut fields = event.fields();
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("type".into(), serde_json::json!(event.type_name()));
            obj.insert("timestamp".into(), serde_json::json!(Utc::now().to_rfc3339()));
            obj.insert("sessionId".into(), serde_json::json!(event.session_id()));
        }
        write_line(&self.writer, &fields);
        // Runs the tracker's on_complete callback synchronously, so the
        // summary line for a given run always follows its final event line.
        self.tracker.on_event(event);
    }
}

#[cfg(test)]
mod tests;

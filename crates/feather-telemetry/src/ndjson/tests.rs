use super::*;
use std::sync::{Arc, Mutex as StdMutex};

#[derive(Clone, Default)]
struct Buffer(Arc<StdMutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn lines(buf: &Buffer) -> Vec<serde_json::Value> {
    let data = buf.0.lock().unwrap();
    String::from_utf8_lossy(&data)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn writes_one_line_per_event_with_timestamp_and_session() {
    let buf = Buffer::default();
    let sink = NdjsonSink::new(buf.clone());
    sink.on_event(&Event::AgentRunStart {
        session_id: "s1".into(),
        input: "hello".into(),
    });

    let out = lines(&buf);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["type"], "agent.run.start");
    assert_eq!(out[0]["sessionId"], "s1");
    assert!(out[0]["timestamp"].is_string());
}

#[test]
fn trace_writer_appends_a_summary_line_on_run_complete() {
    let buf = Buffer::default();
    let writer = NdjsonTraceWriter::new(buf.clone());

    writer.on_event(&Event::AgentRunStart {
        session_id: "s1".into(),
        input: "hello".into(),
    });
    writer.on_event(&Event::AgentRunComplete {
        session_id: "s1".into(),
        output: "done".into(),
        steps: 0,
        iteration_count: 0,
        elapsed_ms: 10,
    });

    let out = lines(&buf);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0]["type"], "agent.run.start");
    assert_eq!(out[1]["type"], "agent.run.complete");
    assert_eq!(out[2]["type"], "agent.run.summary");
    assert_eq!(out[2]["status"], "completed");
    assert_eq!(out[2]["elapsedMs"], 10);
    assert_eq!(out[2]["metrics"]["sessionId"], "s1");
}

#[test]
fn trace_writer_does_not_summarize_a_run_still_in_progress() {
    let buf = Buffer::default();
    let writer = NdjsonTraceWriter::new(buf.clone());

    writer.on_event(&Event::AgentRunStart {
        session_id: "s1".into(),
        input: "hello".into(),
    });
    writer.on_event(&Event::AgentStepStart {
        session_id: "s1".into(),
        iteration: 0,
        context_turns: 1,
        context_tokens: Some(5),
    });

    let out = lines(&buf);
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|l| l["type"] != "agent.run.summary"));
}

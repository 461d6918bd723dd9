//! Run observation: step callbacks and streamed text sinks.
//!
//! A [`RunObserver`] sees the same sequence of events whichever provider
//! served the run. Observers are append-only sinks: they record or forward
//! events and never influence the loop. A [`ChunkSink`] receives streamed
//! assistant text and is awaited per chunk, so backpressure is the
//! caller's; returning `Err` stops the run. Before every attempt the sink
//! is reset, so text streamed by a failed provider is never mistaken for
//! part of the answer that replaces it.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::conversation::{ToolCall, ToolResult};

/// Step-level callbacks. Every method defaults to a no-op.
pub trait RunObserver: Send + Sync {
    fn on_step_start(&self, _step: usize, _provider: &str) {}
    fn on_text(&self, _step: usize, _text: &str) {}
    fn on_tool_call(&self, _step: usize, _call: &ToolCall) {}
    fn on_tool_result(&self, _step: usize, _result: &ToolResult) {}
    fn on_step_finish(&self, _step: usize, _finish_reason: Option<&str>) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Observer that forwards events to `tracing`.
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_step_start(&self, step: usize, provider: &str) {
        debug!(step, provider, "step started");
    }

    fn on_tool_call(&self, step: usize, call: &ToolCall) {
        info!(step, tool = call.name(), call_id = call.id(), "tool call");
    }

    fn on_tool_result(&self, step: usize, result: &ToolResult) {
        debug!(
            step,
            tool = %result.name,
            call_id = %result.call_id,
            is_error = result.is_error,
            bytes = result.content.len(),
            "tool result"
        );
    }

    fn on_step_finish(&self, step: usize, finish_reason: Option<&str>) {
        debug!(step, finish_reason = finish_reason.unwrap_or("none"), "step finished");
    }
}

/// A recorded observer event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    StepStart { step: usize, provider: String },
    Text { step: usize, text: String },
    ToolCall { step: usize, call: ToolCall },
    ToolResult { step: usize, result: ToolResult },
    StepFinish { step: usize, finish_reason: Option<String> },
}

/// Observer that appends every event to an in-memory log.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl RunObserver for RecordingObserver {
    fn on_step_start(&self, step: usize, provider: &str) {
        self.push(RunEvent::StepStart {
            step,
            provider: provider.to_string(),
        });
    }

    fn on_text(&self, step: usize, text: &str) {
        self.push(RunEvent::Text {
            step,
            text: text.to_string(),
        });
    }

    fn on_tool_call(&self, step: usize, call: &ToolCall) {
        self.push(RunEvent::ToolCall {
            step,
            call: call.clone(),
        });
    }

    fn on_tool_result(&self, step: usize, result: &ToolResult) {
        self.push(RunEvent::ToolResult {
            step,
            result: result.clone(),
        });
    }

    fn on_step_finish(&self, step: usize, finish_reason: Option<&str>) {
        self.push(RunEvent::StepFinish {
            step,
            finish_reason: finish_reason.map(str::to_string),
        });
    }
}

/// Receives streamed assistant text in generation order.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn on_chunk(&self, chunk: &str) -> Result<()>;

    /// A new attempt starts; anything streamed so far is superseded.
    async fn on_reset(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes chunks straight to stdout. Stdout cannot be rewound, so a reset
/// after partial output prints a restart marker instead.
#[derive(Default)]
pub struct StdoutSink {
    written: AtomicBool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkSink for StdoutSink {
    async fn on_chunk(&self, chunk: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(chunk.as_bytes())?;
        out.flush()?;
        self.written.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn on_reset(&self) -> Result<()> {
        if self.written.swap(false, Ordering::Relaxed) {
            let mut out = std::io::stdout().lock();
            out.write_all(b"\n[response restarted]\n")?;
            out.flush()?;
        }
        Ok(())
    }
}

/// Collects the chunks of the current attempt in memory.
#[derive(Default)]
pub struct BufferSink {
    chunks: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<String> {
        self.chunks
            .lock()
            .map(|chunks| chunks.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChunkSink for BufferSink {
    async fn on_chunk(&self, chunk: &str) -> Result<()> {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.push(chunk.to_string());
        }
        Ok(())
    }

    async fn on_reset(&self) -> Result<()> {
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_keeps_order() {
        let obs = RecordingObserver::new();
        obs.on_step_start(1, "openai");
        let call = ToolCall::native("c1", "read_file", "{}");
        obs.on_tool_call(1, &call);
        obs.on_tool_result(1, &ToolResult::ok(&call, "x"));
        obs.on_step_finish(1, Some("tool_calls"));
        let events = obs.events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], RunEvent::StepStart { step: 1, .. }));
        assert!(matches!(events[3], RunEvent::StepFinish { .. }));
    }

    #[tokio::test]
    async fn test_buffer_sink() {
        let sink = BufferSink::new();
        sink.on_chunk("a").await.unwrap();
        sink.on_chunk("b").await.unwrap();
        assert_eq!(sink.chunks(), vec!["a", "b"]);
        sink.on_reset().await.unwrap();
        sink.on_chunk("c").await.unwrap();
        assert_eq!(sink.chunks(), vec!["c"]);
    }
}

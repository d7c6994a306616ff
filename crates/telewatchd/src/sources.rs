//! Event sources - the producer side of the monitor loop
//!
//! Producers push into per-source queues and never touch engine state. The
//! monitor loop drains every queue without blocking.

use telewatch_common::{MonitorEvent, Severity};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

pub trait EventSource: Send {
    fn name(&self) -> &str;

    /// Everything queued so far; never blocks
    fn get_events(&mut self) -> Vec<MonitorEvent>;

    /// False once no more events can arrive
    fn is_running(&self) -> bool {
        true
    }
}

/// Queue-backed source fed by a `LineProducer`
pub struct QueueSource {
    name: String,
    rx: mpsc::UnboundedReceiver<MonitorEvent>,
    closed: bool,
}

impl QueueSource {
    pub fn channel(name: &str) -> (LineProducer, QueueSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = LineProducer {
            source: name.to_string(),
            tx,
        };
        let source = QueueSource {
            name: name.to_string(),
            rx,
            closed: false,
        };
        (producer, source)
    }
}

impl EventSource for QueueSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_events(&mut self) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        debug!(source = %self.name, "Producer closed");
                    }
                    self.closed = true;
                    break;
                }
            }
        }
        events
    }

    fn is_running(&self) -> bool {
        !self.closed
    }
}

/// Producer handle; cheap to clone across threads or tasks
#[derive(Clone)]
pub struct LineProducer {
    source: String,
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl LineProducer {
    /// Queue a raw line with its advisory severity. False if the loop is gone.
    pub fn push_line(&self, line: &str) -> bool {
        let line = line.trim_end();
        if line.is_empty() {
            return true;
        }
        self.push(MonitorEvent::new(
            self.source.clone(),
            classify_line(line),
            line,
        ))
    }

    pub fn push(&self, event: MonitorEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Advisory severity a source assigns from keywords alone
pub fn classify_line(line: &str) -> Severity {
    let upper = line.to_uppercase();
    let has = |words: &[&str]| words.iter().any(|w| upper.contains(w));
    if has(&["FATAL", "CRITICAL", "SEGFAULT", "PANIC"]) {
        Severity::Critical
    } else if has(&["ERROR", "EXCEPTION", "FAILED", "TRACEBACK"]) {
        Severity::Warning
    } else {
        Severity::Info
    }
}

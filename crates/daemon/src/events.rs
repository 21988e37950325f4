use log::info;
use tokio::sync::broadcast;

/// Buffered events per subscriber; a lagging observer misses old events
/// rather than stalling the core
const EVENT_CAPACITY: usize = 256;

/// One update on the observability surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Append-only log line
    Log(String),
    /// Full queue snapshot after a mutation
    Queue(Vec<String>),
    /// Progress percentage reported by the running transcode
    Progress(u32),
}

/// Fan-out handle for the log/queue/progress surface consumed by a
/// presentation layer.
///
/// Cloneable; all clones feed the same subscribers. Publishing with no
/// subscriber attached simply drops the event. Log lines are mirrored to
/// the console log so the daemon is observable without any UI.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<Event>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish one log line
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        let _ = self.tx.send(Event::Log(line));
    }

    /// Publish the queue contents after a mutation
    pub fn queue_changed(&self, snapshot: Vec<String>) {
        let _ = self.tx.send(Event::Queue(snapshot));
    }

    /// Publish a progress percentage for the in-flight job
    pub fn progress(&self, percent: u32) {
        let _ = self.tx.send(Event::Progress(percent));
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

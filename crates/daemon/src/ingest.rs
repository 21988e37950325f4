use std::collections::VecDeque;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;
use tokio::net::unix::pipe;
use tokio::sync::watch;
use tokio::sync::Notify;

use crate::config::QueueConfig;
use crate::dest;
use crate::events::EventSink;
use crate::queue::{Enqueue, SharedQueue};

/// Failures while preparing the ingestion channel. Fatal to the reader
/// only: the daemon keeps running, the reader just never starts.
#[derive(Debug, Error)]
pub enum ChannelSetupError {
    #[error("failed to create work directory {}: {}", path.display(), source)]
    WorkDir { path: PathBuf, source: io::Error },
    #[error("failed to remove stale queue pipe {}: {}", path.display(), source)]
    RemoveStale { path: PathBuf, source: io::Error },
    #[error("failed to create queue pipe {}: {}", path.display(), source)]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to open queue pipe {}: {}", path.display(), source)]
    Open { path: PathBuf, source: io::Error },
}

/// Prepare the ingestion channel: tier directories, a fresh pipe at the
/// configured path, and a non-blocking read handle on it.
///
/// Must run inside the tokio runtime; the returned handle is registered
/// with its reactor.
pub fn setup(config: &QueueConfig) -> Result<pipe::Receiver, ChannelSetupError> {
    dest::ensure_tier_dirs(&config.work_dir).map_err(|e| ChannelSetupError::WorkDir {
        path: config.work_dir.clone(),
        source: e,
    })?;
    create_pipe(&config.queue_path)?;
    pipe::OpenOptions::new()
        .open_receiver(&config.queue_path)
        .map_err(|e| ChannelSetupError::Open {
            path: config.queue_path.clone(),
            source: e,
        })
}

/// Replace whatever sits at `path` with a fresh owner-only FIFO
fn create_pipe(path: &Path) -> Result<(), ChannelSetupError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ChannelSetupError::RemoveStale {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| ChannelSetupError::Create {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
    })?;
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o700) };
    if rc != 0 {
        return Err(ChannelSetupError::Create {
            path: path.to_path_buf(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Splits the pipe's byte stream into newline-terminated records.
/// Partial lines stay buffered until their newline arrives.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return the whitespace-trimmed records it completed
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            records.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        records
    }
}

/// What one poll iteration produced, deciding the wait before the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// No record available (or an empty line)
    Idle,
    /// A duplicate submission was rejected
    Cooldown,
    /// A new path was queued; a writer is likely still active
    Accepted,
}

/// Polls the queue pipe and feeds admitted paths into the job queue.
pub struct IngestReader {
    config: QueueConfig,
    queue: SharedQueue,
    events: EventSink,
    wake: Arc<Notify>,
}

impl IngestReader {
    pub fn new(
        config: QueueConfig,
        queue: SharedQueue,
        events: EventSink,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            queue,
            events,
            wake,
        }
    }

    /// Poll the pipe until shutdown. One buffered record is handled per
    /// iteration so the admission cadence stays per-record even when a
    /// single chunk carries several lines.
    pub async fn run(self, receiver: pipe::Receiver, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = LineBuffer::default();
        let mut records: VecDeque<String> = VecDeque::new();
        let mut chunk = [0u8; 4096];

        loop {
            let step = if let Some(record) = records.pop_front() {
                self.admit(&record)
            } else {
                match receiver.try_read(&mut chunk) {
                    // 0 bytes means no writer is connected right now
                    Ok(0) => Step::Idle,
                    Ok(n) => {
                        records.extend(buffer.push(&chunk[..n]));
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Step::Idle,
                    Err(e) => {
                        warn!("Queue pipe read failed: {}", e);
                        Step::Idle
                    }
                }
            };

            let wait = match step {
                Step::Idle | Step::Cooldown => self.config.idle_poll(),
                Step::Accepted => self.config.enqueue_poll(),
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Queue reader stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Admit one trimmed record into the queue
    fn admit(&self, record: &str) -> Step {
        if record.is_empty() {
            return Step::Idle;
        }
        let (outcome, snapshot) = {
            let mut queue = self.queue.lock().unwrap();
            (queue.enqueue(record), queue.snapshot())
        };
        match outcome {
            Enqueue::Queued => {
                self.events.log(format!("Queued {}", record));
                self.events.queue_changed(snapshot);
                self.wake.notify_one();
                Step::Accepted
            }
            Enqueue::Duplicate => {
                self.events.log(format!("File already in queue: {}", record));
                Step::Cooldown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobQueue;
    use std::os::unix::fs::FileTypeExt;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn test_config(dir: &Path) -> QueueConfig {
        QueueConfig {
            work_dir: dir.join("work"),
            queue_path: dir.join("queue"),
            profiles_path: dir.join("profiles.toml"),
            transcoder_bin: PathBuf::from("ffmpeg"),
            profile: None,
            idle_poll_ms: 10,
            enqueue_poll_ms: 5,
        }
    }

    fn test_reader(config: QueueConfig) -> (IngestReader, SharedQueue, EventSink) {
        let queue: SharedQueue = Arc::new(Mutex::new(JobQueue::new()));
        let events = EventSink::new();
        let reader = IngestReader::new(
            config,
            queue.clone(),
            events.clone(),
            Arc::new(Notify::new()),
        );
        (reader, queue, events)
    }

    #[test]
    fn line_buffer_joins_partial_chunks() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push(b"a.mp4\nb."), vec!["a.mp4".to_string()]);
        assert_eq!(buffer.push(b"mp4\n"), vec!["b.mp4".to_string()]);
        assert!(buffer.push(b"tail-without-newline").is_empty());
    }

    #[test]
    fn line_buffer_trims_and_keeps_empty_records() {
        let mut buffer = LineBuffer::default();
        assert_eq!(
            buffer.push(b"  /movies/a.mp4 \n\r\n c.mp4\n"),
            vec!["/movies/a.mp4".to_string(), String::new(), "c.mp4".to_string()]
        );
    }

    #[test]
    fn admit_queues_new_paths_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, queue, events) = test_reader(test_config(dir.path()));
        let mut rx = events.subscribe();

        assert_eq!(reader.admit("/movies/a.mp4"), Step::Accepted);
        assert_eq!(reader.admit("/movies/a.mp4"), Step::Cooldown);
        assert_eq!(reader.admit("/movies/b.mp4"), Step::Accepted);
        assert_eq!(reader.admit(""), Step::Idle);

        let snapshot = queue.lock().unwrap().snapshot();
        assert_eq!(snapshot, vec!["/movies/a.mp4", "/movies/b.mp4"]);

        let mut logs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let crate::events::Event::Log(line) = event {
                logs.push(line);
            }
        }
        assert!(logs.contains(&"Queued /movies/a.mp4".to_string()));
        assert!(logs.contains(&"File already in queue: /movies/a.mp4".to_string()));
    }

    #[tokio::test]
    async fn setup_replaces_prior_path_with_a_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.queue_path, b"stale regular file").unwrap();

        let _receiver = setup(&config).unwrap();

        let ft = std::fs::metadata(&config.queue_path).unwrap().file_type();
        assert!(ft.is_fifo());
        assert!(config.work_dir.join("hq").is_dir());
        assert!(config.work_dir.join("lq").is_dir());
    }

    #[tokio::test]
    async fn reader_ingests_lines_from_the_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let receiver = setup(&config).unwrap();
        let queue_path = config.queue_path.clone();

        let (reader, queue, events) = test_reader(config);
        let mut event_rx = events.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(reader.run(receiver, shutdown_rx));

        let mut sender = pipe::OpenOptions::new().open_sender(&queue_path).unwrap();
        sender
            .write_all(b"/movies/a.mp4\n/movies/a.mp4\n/movies/b.mp4\n")
            .await
            .unwrap();

        for _ in 0..200 {
            if queue.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            queue.lock().unwrap().snapshot(),
            vec!["/movies/a.mp4", "/movies/b.mp4"]
        );

        let mut saw_duplicate = false;
        while let Ok(event) = event_rx.try_recv() {
            if let crate::events::Event::Log(line) = event {
                if line == "File already in queue: /movies/a.mp4" {
                    saw_duplicate = true;
                }
            }
        }
        assert!(saw_duplicate);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

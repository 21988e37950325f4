use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::QueueConfig;
use crate::dest;
use crate::events::EventSink;
use crate::profile::{ProfileError, ProfileStore};
use crate::progress;
use crate::queue::SharedQueue;

/// Grace period between SIGTERM and SIGKILL when stopping a live transcode
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Bound on draining output after the transcoder exits; a grandchild
/// holding the inherited pipes must not stall the queue
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Reasons a job is skipped before its process ever runs. Each is logged
/// and the job is popped; none of them stop the worker.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error("failed to prepare {}: {}", path.display(), source)]
    Prepare { path: PathBuf, source: io::Error },
    #[error("failed to launch {command}: {source}")]
    Launch { command: String, source: io::Error },
}

/// How a head-of-queue job left the worker
#[derive(Debug, PartialEq, Eq)]
enum JobEnd {
    /// Terminal state reached, job popped
    Done,
    /// Shutdown arrived mid-run; the job stays at the head
    Interrupted,
}

/// A launched transcode and the paths its commit will use
struct ActiveJob {
    child: Child,
    destination: PathBuf,
    temp: PathBuf,
}

enum Started {
    /// Destination already present; complete without a launch
    AlreadyEncoded,
    Launched(ActiveJob),
}

enum Exit {
    Status(io::Result<ExitStatus>),
    Shutdown,
}

/// Single-slot serial executor: drives one external transcode at a time
/// against the head of the queue, committing or discarding its output,
/// then advances. There is never more than one live process.
pub struct Worker {
    config: QueueConfig,
    profiles: ProfileStore,
    queue: SharedQueue,
    events: EventSink,
    wake: Arc<Notify>,
    selected: watch::Receiver<String>,
}

impl Worker {
    pub fn new(
        config: QueueConfig,
        profiles: ProfileStore,
        queue: SharedQueue,
        events: EventSink,
        wake: Arc<Notify>,
        selected: watch::Receiver<String>,
    ) -> Self {
        Self {
            config,
            profiles,
            queue,
            events,
            wake,
            selected,
        }
    }

    /// Process queued jobs until shutdown. Sleeps on the wake signal
    /// while the queue is empty; between jobs there is no delay.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                info!("Worker stopped");
                return;
            }
            let head = { self.queue.lock().unwrap().peek_head().map(str::to_string) };
            let Some(source) = head else {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Worker stopped");
                            return;
                        }
                    }
                }
                continue;
            };
            match self.run_job(&source, &mut shutdown).await {
                JobEnd::Done => {}
                JobEnd::Interrupted => {
                    info!("Worker stopped, {} left queued", source);
                    return;
                }
            }
        }
    }

    async fn run_job(&self, source: &str, shutdown: &mut watch::Receiver<bool>) -> JobEnd {
        match self.start_job(source) {
            Ok(Started::AlreadyEncoded) => self.finish_job(),
            Ok(Started::Launched(job)) => self.drive(job, shutdown).await,
            Err(e) => {
                self.events.log(format!("Cannot encode {}: {}", source, e));
                self.finish_job()
            }
        }
    }

    /// Resolve profile and paths for the head job and launch the
    /// transcoder, unless the destination already exists.
    ///
    /// The selected profile is read fresh here, so a selection change
    /// applies to the next job, never to one in flight.
    fn start_job(&self, source: &str) -> Result<Started, JobError> {
        let selected = self.selected.borrow().clone();
        let profile = self.profiles.resolve(&selected)?;

        let destination = dest::destination_for(&self.config.work_dir, profile.hq, source);
        if destination.exists() {
            self.events.log(format!(
                "{} is already encoded in current quality",
                destination.display()
            ));
            return Ok(Started::AlreadyEncoded);
        }

        let tier = dest::tier_dir(&self.config.work_dir, profile.hq);
        std::fs::create_dir_all(&tier).map_err(|e| JobError::Prepare {
            path: tier.clone(),
            source: e,
        })?;

        let temp = dest::part_path(&destination);
        match std::fs::remove_file(&temp) {
            Ok(()) => debug!("Removed stale temp file {}", temp.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(JobError::Prepare {
                    path: temp,
                    source: e,
                })
            }
        }

        let mut args = vec!["-i".to_string(), source.to_string()];
        args.extend(profile.argument_template());
        args.push(temp.to_string_lossy().into_owned());

        let command = format!("{} {}", self.config.transcoder_bin.display(), args.join(" "));
        self.events.log(command.clone());

        let mut cmd = Command::new(&self.config.transcoder_bin);
        cmd.args(&args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let child = cmd
            .spawn()
            .map_err(|e| JobError::Launch { command, source: e })?;

        Ok(Started::Launched(ActiveJob {
            child,
            destination,
            temp,
        }))
    }

    /// Stream the process output until it exits, then commit on success
    /// and pop the job. Output lines and termination are handled as they
    /// arrive; a shutdown signal stops the process instead.
    async fn drive(&self, mut job: ActiveJob, shutdown: &mut watch::Receiver<bool>) -> JobEnd {
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = job.child.stdout.take() {
            tokio::spawn(forward_output(stdout, tx.clone()));
        }
        if let Some(stderr) = job.child.stderr.take() {
            tokio::spawn(forward_output(stderr, tx.clone()));
        }
        drop(tx);

        let mut output_open = true;
        let exit = loop {
            tokio::select! {
                line = rx.recv(), if output_open => match line {
                    Some(line) => self.publish_output(&line),
                    None => output_open = false,
                },
                status = job.child.wait() => break Exit::Status(status),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break Exit::Shutdown;
                    }
                }
            }
        };

        let status = match exit {
            Exit::Shutdown => {
                self.events.log("Shutdown requested, stopping current encoding");
                stop_child(&mut job.child).await;
                return JobEnd::Interrupted;
            }
            Exit::Status(Err(e)) => {
                self.events.log(format!("Lost track of transcoder: {}", e));
                return self.finish_job();
            }
            Exit::Status(Ok(status)) => status,
        };

        // output that arrived before the exit was observed; bounded, as
        // a leftover grandchild can keep the pipes open past the exit
        let deadline = Instant::now() + DRAIN_GRACE;
        while let Ok(Some(line)) = timeout_at(deadline, rx.recv()).await {
            self.publish_output(&line);
        }

        match status.code() {
            Some(code) => self
                .events
                .log(format!("Encoding finished, exit code {}", code)),
            None => self.events.log(format!(
                "Encoding finished, killed by signal {}",
                status.signal().unwrap_or(0)
            )),
        }

        if status.success() {
            self.commit(&job.temp, &job.destination);
        }
        self.finish_job()
    }

    fn publish_output(&self, line: &str) {
        self.events.log(line.to_string());
        if let Some(percent) = progress::extract_percent(line) {
            self.events.progress(percent);
        }
    }

    /// Remove-then-rename; the rename is the commit point. A failed
    /// commit is logged and the job still advances.
    fn commit(&self, temp: &Path, destination: &Path) {
        match std::fs::remove_file(destination) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                self.events.log(format!(
                    "Could not replace {}: {}",
                    destination.display(),
                    e
                ));
                return;
            }
        }
        match std::fs::rename(temp, destination) {
            Ok(()) => self
                .events
                .log(format!("{} -> {}", temp.display(), destination.display())),
            Err(e) => self
                .events
                .log(format!("Could not commit {}: {}", temp.display(), e)),
        }
    }

    /// Pop the finished head, whatever its outcome, and publish the new
    /// queue state. Failed jobs are not retried; resubmitting one later
    /// is admitted as a fresh job.
    fn finish_job(&self) -> JobEnd {
        let snapshot = {
            let mut queue = self.queue.lock().unwrap();
            queue.pop_head();
            queue.snapshot()
        };
        self.events.queue_changed(snapshot);
        JobEnd::Done
    }
}

/// Splits raw transcoder output into fragments. The tool redraws its
/// status line with bare carriage returns between newlines, so both
/// count as terminators; empty fragments (as in CRLF) are dropped.
#[derive(Debug, Default)]
struct OutputBuffer {
    pending: Vec<u8>,
}

impl OutputBuffer {
    /// Append a chunk and return the fragments it completed
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut fragments = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n' || b == b'\r') {
            let fragment: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&fragment[..fragment.len() - 1]);
            if !text.is_empty() {
                fragments.push(text.into_owned());
            }
        }
        fragments
    }

    /// Hand out any unterminated tail, emptying the buffer
    fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Forward one output stream into the merged channel as its chunks
/// arrive, fragment by fragment
async fn forward_output<R>(mut stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = OutputBuffer::default();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for fragment in buffer.push(&chunk[..n]) {
                    if tx.send(fragment).is_err() {
                        return;
                    }
                }
            }
        }
    }
    if let Some(tail) = buffer.flush() {
        let _ = tx.send(tail);
    }
}

/// SIGTERM, a short grace period, then SIGKILL
async fn stop_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if timeout(STOP_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        warn!("Could not kill transcoder: {}", e);
    }
}

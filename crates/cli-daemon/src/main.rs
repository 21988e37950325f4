use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use mtranscoder::{
    config::QueueConfig,
    events::EventSink,
    ingest::{self, IngestReader},
    profile::ProfileStore,
    queue::{JobQueue, SharedQueue},
    worker::Worker,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};

/// Transcoding queue daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Profile to encode with (overrides the configured selection)
    #[arg(short, long)]
    profile: Option<String>,

    /// List stored profile names and exit
    #[arg(long)]
    list_profiles: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger - use RUST_LOG env var or default to info level
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config =
        QueueConfig::load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(profile) = args.profile {
        config.profile = Some(profile);
    }

    let profiles = ProfileStore::open(&config.profiles_path);

    if args.list_profiles {
        for name in profiles.names().context("Failed to list profiles")? {
            println!("{}", name);
        }
        return Ok(());
    }

    info!("🎬 MTranscoder daemon starting");
    info!("Configuration loaded:");
    info!("  Work directory: {}", config.work_dir.display());
    info!("  Queue pipe: {}", config.queue_path.display());
    info!("  Profile store: {}", config.profiles_path.display());
    info!("  Transcoder: {}", config.transcoder_bin.display());

    // Transcoding is background work; give the CPU away first
    lower_priority();

    // Startup profile selection; changes only apply to later jobs
    let selected = match config.profile.clone() {
        Some(name) => name,
        None => profiles
            .names()
            .context("Failed to list profiles")?
            .into_iter()
            .next()
            .context("Profile store is empty and no profile was selected")?,
    };
    info!("Selected profile: {}", selected);

    let queue: SharedQueue = Arc::new(Mutex::new(JobQueue::new()));
    let events = EventSink::new();
    let wake = Arc::new(Notify::new());
    // an embedding UI would hold the selection sender; headless runs park it
    let (_selected_tx, selected_rx) = watch::channel(selected);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reader_handle = start_reader(&config, &queue, &events, &wake, &shutdown_rx);

    let worker = Worker::new(
        config,
        profiles,
        queue,
        events.clone(),
        wake.clone(),
        selected_rx,
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    wait_for_signal().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    if let Some(handle) = reader_handle {
        let _ = handle.await;
    }
    let _ = worker_handle.await;

    info!("👋 MTranscoder daemon stopped");
    Ok(())
}

/// Wire the ingestion reader to the queue pipe. Setup failure goes to
/// the shared log surface like every other error, and only keeps the
/// reader from starting; the daemon itself stays up.
fn start_reader(
    config: &QueueConfig,
    queue: &SharedQueue,
    events: &EventSink,
    wake: &Arc<Notify>,
    shutdown: &watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    events.log(format!("Opening queue at {}", config.queue_path.display()));
    match ingest::setup(config) {
        Ok(receiver) => {
            events.log("Init ok, listening for transcoding requests");
            let reader =
                IngestReader::new(config.clone(), queue.clone(), events.clone(), wake.clone());
            Some(tokio::spawn(reader.run(receiver, shutdown.clone())))
        }
        Err(e) => {
            events.log(format!("Cannot set up the ingestion channel: {}", e));
            None
        }
    }
}

/// Drop this process to nice 19 so foreground work keeps the CPU
fn lower_priority() {
    let rc = unsafe { libc::nice(19) };
    if rc == -1 {
        warn!("Could not lower scheduling priority");
    } else {
        info!("Scheduling priority set to nice {}", rc);
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM")?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtranscoder::Event;

    fn test_config(dir: &std::path::Path) -> QueueConfig {
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

    fn logged_lines(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Log(line) = event {
                lines.push(line);
            }
        }
        lines
    }

    #[tokio::test]
    async fn setup_failure_reaches_the_log_surface() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the work directory should go makes the
        // tier directory creation fail
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let mut config = test_config(dir.path());
        config.work_dir = blocker.join("work");

        let queue: SharedQueue = Arc::new(Mutex::new(JobQueue::new()));
        let events = EventSink::new();
        let mut event_rx = events.subscribe();
        let wake = Arc::new(Notify::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = start_reader(&config, &queue, &events, &wake, &shutdown_rx);
        assert!(handle.is_none());

        let logs = logged_lines(&mut event_rx);
        assert!(logs
            .iter()
            .any(|l| l.starts_with("Cannot set up the ingestion channel:")));
    }

    #[tokio::test]
    async fn reader_starts_on_a_clean_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let queue: SharedQueue = Arc::new(Mutex::new(JobQueue::new()));
        let events = EventSink::new();
        let mut event_rx = events.subscribe();
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = start_reader(&config, &queue, &events, &wake, &shutdown_rx)
            .expect("reader should start");

        let logs = logged_lines(&mut event_rx);
        assert!(logs.contains(&"Init ok, listening for transcoding requests".to_string()));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

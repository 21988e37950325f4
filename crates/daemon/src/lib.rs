pub mod config;
pub mod profile;
pub mod queue;
pub mod events;
pub mod progress;
pub mod dest;
pub mod ingest;
pub mod worker;

pub use config::QueueConfig;
pub use events::{Event, EventSink};
pub use ingest::{ChannelSetupError, IngestReader};
pub use profile::{Profile, ProfileError, ProfileStore};
pub use queue::{Enqueue, JobQueue, SharedQueue};
pub use worker::{JobError, Worker};

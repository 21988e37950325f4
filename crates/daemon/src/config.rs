use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the transcoding queue daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Private work directory holding the quality tier subdirectories
    pub work_dir: PathBuf,
    /// Named pipe external producers submit source paths through
    pub queue_path: PathBuf,
    /// TOML file the profile store persists to
    pub profiles_path: PathBuf,
    /// Transcoder binary to drive (looked up through PATH if bare)
    pub transcoder_bin: PathBuf,
    /// Profile selected at startup; None selects the first listed profile
    pub profile: Option<String>,
    /// Wait between empty reads of the queue pipe, in milliseconds.
    /// Also the cooldown after a rejected duplicate submission
    pub idle_poll_ms: u64,
    /// Wait after a successful enqueue before re-checking the pipe,
    /// in milliseconds (a writer is likely still active)
    pub enqueue_poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl QueueConfig {
    /// Create a default configuration rooted under the user's home directory
    pub fn default_config() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let work_dir = home.join(".mtranscoder");
        Self {
            queue_path: home.join(".mtranscoder_queue"),
            profiles_path: work_dir.join("profiles.toml"),
            work_dir,
            transcoder_bin: PathBuf::from("ffmpeg"),
            profile: None,
            idle_poll_ms: 1000,
            enqueue_poll_ms: 100,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    let file_config: QueueConfig = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                    config = file_config;
                } else {
                    let file_config: QueueConfig = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                    config = file_config;
                }
            }
        }

        Ok(config)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn enqueue_poll(&self) -> Duration {
        Duration::from_millis(self.enqueue_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_home() {
        let cfg = QueueConfig::default_config();
        assert!(cfg.work_dir.ends_with(".mtranscoder"));
        assert!(cfg.queue_path.ends_with(".mtranscoder_queue"));
        assert!(cfg.profiles_path.ends_with(".mtranscoder/profiles.toml"));
        assert_eq!(cfg.transcoder_bin, PathBuf::from("ffmpeg"));
        assert_eq!(cfg.idle_poll(), Duration::from_millis(1000));
        assert_eq!(cfg.enqueue_poll(), Duration::from_millis(100));
        assert_eq!(cfg.profile, None);
    }

    #[test]
    fn loads_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.toml");
        std::fs::write(
            &path,
            r#"
work_dir = "/srv/transcode"
queue_path = "/srv/transcode_queue"
profiles_path = "/srv/transcode/profiles.toml"
transcoder_bin = "/usr/local/bin/ffmpeg"
profile = "profileH264LowQuality"
idle_poll_ms = 250
enqueue_poll_ms = 50
"#,
        )
        .unwrap();

        let cfg = QueueConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/srv/transcode"));
        assert_eq!(cfg.profile.as_deref(), Some("profileH264LowQuality"));
        assert_eq!(cfg.idle_poll(), Duration::from_millis(250));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = QueueConfig::load_config(Some(Path::new("/nonexistent/queue.toml"))).unwrap();
        assert!(cfg.work_dir.ends_with(".mtranscoder"));
    }
}

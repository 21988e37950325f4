use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store tables whose name starts with this prefix are profiles; anything
/// else in the file is unrelated settings and is left alone
const PROFILE_PREFIX: &str = "profile";

/// Errors surfaced by the profile store
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The requested name has no entry in the store
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error("failed to access profile store {}: {}", path.display(), source)]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse profile store {}: {}", path.display(), source)]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to encode profile store: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// A named parameter set plus the quality tier its output lands in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Verbatim parameter string, split on whitespace at launch time
    pub params: String,
    /// Route output to the high-quality tier
    pub hq: bool,
}

impl Profile {
    /// Command-line tokens for this profile.
    ///
    /// Naive whitespace split: a token containing a space cannot be
    /// expressed, and no quoting grammar is supported.
    pub fn argument_template(&self) -> Vec<String> {
        self.params.split_whitespace().map(str::to_string).collect()
    }
}

/// TOML-file-backed store of named profiles.
///
/// Every read goes back to disk, so hand-edits to the file apply to the
/// next job without a restart. The store never mutates profiles at
/// runtime; the only write is the one-time default seeding.
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    /// Open the store, installing the default profile set if the file
    /// holds no profiles yet. Seeding trouble is logged, not fatal: a
    /// store that stays empty just means jobs skip with "profile not
    /// found" until the file is fixed.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self { path: path.into() };
        match store.ensure_seeded() {
            Ok(true) => info!("Seeded default profiles at {}", store.path.display()),
            Ok(false) => {}
            Err(e) => warn!("Could not seed default profiles: {}", e),
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Profile names, sorted
    pub fn names(&self) -> Result<Vec<String>, ProfileError> {
        Ok(self.load()?.into_keys().collect())
    }

    /// Look up one profile by name
    pub fn resolve(&self, name: &str) -> Result<Profile, ProfileError> {
        self.load()?
            .remove(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    /// Read the store file and keep the profile-prefixed tables
    fn load(&self) -> Result<BTreeMap<String, Profile>, ProfileError> {
        let mut profiles = BTreeMap::new();
        for (name, value) in self.read_table()? {
            if !name.starts_with(PROFILE_PREFIX) {
                continue;
            }
            let profile: Profile = value.try_into().map_err(|e| ProfileError::Parse {
                path: self.path.clone(),
                source: e,
            })?;
            profiles.insert(name, profile);
        }
        Ok(profiles)
    }

    /// Whole store file as a TOML table; a missing file is an empty table
    fn read_table(&self) -> Result<toml::Table, ProfileError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(toml::Table::new()),
            Err(e) => {
                return Err(ProfileError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        toml::from_str(&text).map_err(|e| ProfileError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Install the defaults when no profile table exists, preserving any
    /// unrelated tables already in the file
    fn ensure_seeded(&self) -> Result<bool, ProfileError> {
        if !self.load()?.is_empty() {
            return Ok(false);
        }
        let mut table = self.read_table()?;
        for (name, profile) in default_profiles() {
            let mut entry = toml::Table::new();
            entry.insert("params".to_string(), toml::Value::String(profile.params));
            entry.insert("hq".to_string(), toml::Value::Boolean(profile.hq));
            table.insert(name.to_string(), toml::Value::Table(entry));
        }
        let text = toml::to_string_pretty(&table)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProfileError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        }
        std::fs::write(&self.path, text).map_err(|e| ProfileError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(true)
    }
}

/// The default profile set installed on first access
pub fn default_profiles() -> Vec<(&'static str, Profile)> {
    vec![
        (
            "profileH264LowQuality",
            Profile {
                params: "-f mpegts -acodec ac3 -ac 2 -ar 44100 -vcodec libx264 -vpre fast -b 512k"
                    .to_string(),
                hq: false,
            },
        ),
        (
            "profileH264HighQuality",
            Profile {
                params:
                    "-f mpegts -acodec ac3 -ac 2 -ar 44100 -vcodec libx264 -vpre medium -b 4000k"
                        .to_string(),
                hq: true,
            },
        ),
        (
            "profileMpeg2LowQuality",
            Profile {
                params: "-f mpegts -acodec ac3 -ac 2 -ar 44100 -vcodec mpeg2video -b 512k"
                    .to_string(),
                hq: false,
            },
        ),
        (
            "profileMpeg2HighQuality",
            Profile {
                params: "-f mpegts -acodec ac3 -ac 2 -ar 44100 -vcodec mpeg2video -b 4000k"
                    .to_string(),
                hq: false,
            },
        ),
        (
            "profileMpeg2HighQualitySrc5x2Dst640x360",
            Profile {
                params: "-f mpegts -acodec ac3 -ac 2 -ar 44100 -vcodec mpeg2video -b 4000k -vf pad=640:360:0:52:black"
                    .to_string(),
                hq: false,
            },
        ),
        (
            "profileMpeg2HighQualitySrc12x5Dst576x324",
            Profile {
                params: "-f mpegts -acodec ac3 -ac 2 -ar 44100 -vcodec mpeg2video -b 4000k -vf pad=576:324:0:42:black"
                    .to_string(),
                hq: false,
            },
        ),
    ]
}

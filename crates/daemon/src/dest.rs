use std::path::{Path, PathBuf};

/// Work-dir subdirectory receiving low-quality output
pub const LQ_DIR: &str = "lq";
/// Work-dir subdirectory receiving high-quality output
pub const HQ_DIR: &str = "hq";
/// Extension appended to the source base name for finished output
pub const OUTPUT_EXT: &str = ".mpg";
/// Suffix appended to the destination while a transcode is in flight
pub const PART_SUFFIX: &str = ".part";

/// Directory finished files land in for the given quality tier
pub fn tier_dir(work_dir: &Path, high_quality: bool) -> PathBuf {
    work_dir.join(if high_quality { HQ_DIR } else { LQ_DIR })
}

/// Final destination for a submitted source path under the given tier.
///
/// Only the base name of the source is kept: `/movies/a.mp4` under the
/// high-quality tier becomes `<work>/hq/a.mp4.mpg`.
pub fn destination_for(work_dir: &Path, high_quality: bool, source: &str) -> PathBuf {
    let base = Path::new(source)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.to_string());
    tier_dir(work_dir, high_quality).join(format!("{}{}", base, OUTPUT_EXT))
}

/// In-progress path for a destination
pub fn part_path(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_os_string();
    path.push(PART_SUFFIX);
    PathBuf::from(path)
}

/// Create both tier directories under the work dir
pub fn ensure_tier_dirs(work_dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(work_dir.join(HQ_DIR))?;
    std::fs::create_dir_all(work_dir.join(LQ_DIR))?;
    Ok(())
}

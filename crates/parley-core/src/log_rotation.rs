use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const DEFAULT_MAX_BYTES: u64 = 4 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 3;
const MAX_BYTES_ENV: &str = "PARLEY_LOG_ROTATION_MAX_BYTES";
const MAX_FILES_ENV: &str = "PARLEY_LOG_ROTATION_MAX_FILES";

/// Size limits for an append-only NDJSON log and its numbered backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl LogRotationPolicy {
    /// Reads `PARLEY_LOG_ROTATION_MAX_BYTES` / `PARLEY_LOG_ROTATION_MAX_FILES`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a policy from an arbitrary key lookup; invalid or zero values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_bytes = lookup(MAX_BYTES_ENV)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.max_bytes);
        let max_files = lookup(MAX_FILES_ENV)
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.max_files);
        Self {
            max_bytes,
            max_files,
        }
    }

    fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

/// Appends `line` plus a newline to `path`, rotating first when the file
/// would grow past `policy.max_bytes`.
pub fn append_line_with_rotation(path: &Path, line: &str, policy: LogRotationPolicy) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if policy.is_enabled() {
        let current_size = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => 0,
            Err(error) => {
                return Err(error).with_context(|| format!("failed to stat {}", path.display()))
            }
        };
        let incoming = u64::try_from(line.len().saturating_add(1)).unwrap_or(u64::MAX);
        if current_size > 0 && current_size.saturating_add(incoming) > policy.max_bytes {
            rotate(path, policy.max_files)?;
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{index}", path.display()))
}

/// Shifts `path.1 .. path.(max_files-1)` up by one and moves the live file to
/// `path.1`; the oldest backup falls off the end.
fn rotate(path: &Path, max_files: usize) -> Result<()> {
    let backups = max_files.saturating_sub(1);
    if backups == 0 {
        return std::fs::remove_file(path)
            .with_context(|| format!("failed to truncate {}", path.display()));
    }

    let oldest = backup_path(path, backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest)
            .with_context(|| format!("failed to drop {}", oldest.display()))?;
    }
    for index in (1..backups).rev() {
        let source = backup_path(path, index);
        if source.exists() {
            let destination = backup_path(path, index + 1);
            std::fs::rename(&source, &destination)
                .with_context(|| format!("failed to rotate {}", source.display()))?;
        }
    }
    std::fs::rename(path, backup_path(path, 1))
        .with_context(|| format!("failed to rotate {}", path.display()))
}

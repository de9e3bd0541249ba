//! Housekeeping for `runs/`: oversized server logs, old sessions, leftover
//! backups and stale run directories.

use super::dir_size;
use crate::app::Application;
use crate::constants::{NETWORK_STATE_FILE, SERVER_LOG_FILE, SERVER_RUN_DIR};
use crate::localnet::{run_dir, sessions_dir, NetworkType};
use serde::Serialize;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::info;
use walkdir::WalkDir;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub dry_run: bool,
    pub log_max_size: u64,
    /// Age after which old session directories are removed.
    pub log_max_age: Duration,
    pub backup_max_age: Duration,
    pub stale_max_age: Duration,
    pub verbose: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            log_max_size: 100 * 1024 * 1024,
            log_max_age: Duration::from_secs(7 * DAY),
            backup_max_age: Duration::from_secs(7 * DAY),
            stale_max_age: Duration::from_secs(24 * HOUR),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupResult {
    pub logs_rotated: usize,
    pub sessions_removed: usize,
    pub backups_removed: usize,
    pub stale_removed: usize,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

impl CleanupResult {
    pub fn is_empty(&self) -> bool {
        self.logs_rotated + self.sessions_removed + self.backups_removed + self.stale_removed == 0
    }
}

pub fn cleanup(app: &Application, config: &CleanupConfig) -> CleanupResult {
    cleanup_at(app, config, SystemTime::now())
}

/// Cleanup with ages measured against `now`.
pub fn cleanup_at(app: &Application, config: &CleanupConfig, now: SystemTime) -> CleanupResult {
    let mut result = CleanupResult::default();
    rotate_logs(app, config, &mut result);
    remove_old_sessions(app, config, now, &mut result);
    remove_old_backups(app, config, now, &mut result);
    remove_stale_runs(app, config, now, &mut result);
    result
}

fn age(now: SystemTime, modified: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or_default()
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn report(config: &CleanupConfig, what: &str, path: &Path, detail: &str) {
    if config.verbose || config.dry_run {
        let prefix = if config.dry_run { "would remove" } else { "removing" };
        info!("{} {} {} ({})", prefix, what, path.display(), detail);
    }
}

/// Remove a directory unless dry-running; returns the bytes it held.
fn remove_dir(config: &CleanupConfig, path: &Path, result: &mut CleanupResult) -> Option<u64> {
    let size = dir_size(path);
    if !config.dry_run {
        if let Err(e) = fs::remove_dir_all(path) {
            result
                .errors
                .push(format!("failed to remove {}: {}", path.display(), e));
            return None;
        }
    }
    result.bytes_freed += size;
    Some(size)
}

fn rotate_logs(app: &Application, config: &CleanupConfig, result: &mut CleanupResult) {
    let server_dir = app.runs_dir().join(SERVER_RUN_DIR);
    let logs: Vec<(PathBuf, u64)> = WalkDir::new(&server_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == SERVER_LOG_FILE)
        .filter_map(|e| Some((e.path().to_path_buf(), e.metadata().ok()?.len())))
        .filter(|(_, size)| *size > config.log_max_size)
        .collect();

    for (path, size) in logs {
        report(config, "log tail of", &path, &crate::ux::format_bytes(size));
        let keep = size / 2;
        if !config.dry_run {
            if let Err(e) = truncate_to_tail(&path, keep) {
                result
                    .errors
                    .push(format!("failed to rotate {}: {}", path.display(), e));
                continue;
            }
        }
        result.logs_rotated += 1;
        result.bytes_freed += size - keep;
    }
}

/// Keep only the last `keep` bytes of a file.
fn truncate_to_tail(path: &Path, keep: u64) -> std::io::Result<()> {
    let mut file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(keep)))?;
    let mut tail = Vec::with_capacity(keep as usize);
    file.read_to_end(&mut tail)?;
    drop(file);
    fs::write(path, tail)
}

fn remove_old_sessions(
    app: &Application,
    config: &CleanupConfig,
    now: SystemTime,
    result: &mut CleanupResult,
) {
    for network_type in NetworkType::all() {
        let Ok(entries) = fs::read_dir(sessions_dir(app, network_type)) else {
            continue;
        };
        let mut sessions: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        // Session names are timestamps, so the last one is the newest.
        sessions.sort();
        sessions.pop();

        for session in sessions {
            let Some(mtime) = modified(&session) else {
                continue;
            };
            let session_age = age(now, mtime);
            if session_age <= config.log_max_age {
                continue;
            }
            report(config, "session", &session, &format!("{}h old", session_age.as_secs() / HOUR));
            if remove_dir(config, &session, result).is_some() {
                result.sessions_removed += 1;
            }
        }
    }
}

fn remove_old_backups(
    app: &Application,
    config: &CleanupConfig,
    now: SystemTime,
    result: &mut CleanupResult,
) {
    let runs = app.runs_dir();
    let entries = match fs::read_dir(&runs) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            result
                .errors
                .push(format!("failed to read {}: {}", runs.display(), e));
            return;
        }
    };
    for entry in entries.filter_map(|e| e.ok()) {
        if !entry.file_name().to_string_lossy().contains(".backup.") {
            continue;
        }
        let path = entry.path();
        let Some(mtime) = modified(&path) else {
            continue;
        };
        let backup_age = age(now, mtime);
        if !path.is_dir() || backup_age <= config.backup_max_age {
            continue;
        }
        report(config, "backup", &path, &format!("{}d old", backup_age.as_secs() / DAY));
        if remove_dir(config, &path, result).is_some() {
            result.backups_removed += 1;
        }
    }
}

fn remove_stale_runs(
    app: &Application,
    config: &CleanupConfig,
    now: SystemTime,
    result: &mut CleanupResult,
) {
    for network_type in NetworkType::all() {
        let run = run_dir(app, network_type);
        if !run.is_dir() || run.join(NETWORK_STATE_FILE).exists() {
            continue;
        }
        let newest = WalkDir::new(&run)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok()?.modified().ok())
            .max();
        let Some(newest) = newest else {
            continue;
        };
        if age(now, newest) <= config.stale_max_age {
            continue;
        }
        report(config, "stale run", &run, "no network state");
        if remove_dir(config, &run, result).is_some() {
            result.stale_removed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn layout(app: &Application) {
        let sessions = sessions_dir(app, NetworkType::Custom);
        for name in ["20250101-000000", "20250102-000000"] {
            fs::create_dir_all(sessions.join(name)).unwrap();
            fs::write(sessions.join(name).join(SERVER_LOG_FILE), b"old log\n").unwrap();
        }
        let big_log = sessions_dir(app, NetworkType::Devnet).join("20250103-000000");
        fs::create_dir_all(&big_log).unwrap();
        fs::write(big_log.join(SERVER_LOG_FILE), b"0123456789").unwrap();

        fs::create_dir_all(app.runs_dir().join("custom.backup.20250101-000000")).unwrap();
        fs::write(app.runs_dir().join("custom.backup.20250101-000000/x"), b"abc").unwrap();

        fs::create_dir_all(run_dir(app, NetworkType::Testnet).join("run_0")).unwrap();
        fs::create_dir_all(run_dir(app, NetworkType::Mainnet).join("run_0")).unwrap();
        fs::write(run_dir(app, NetworkType::Mainnet).join(NETWORK_STATE_FILE), b"{}").unwrap();
    }

    fn config() -> CleanupConfig {
        CleanupConfig {
            log_max_size: 8,
            ..CleanupConfig::default()
        }
    }

    #[test]
    fn test_fresh_tree_only_rotates_logs() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        layout(&app);

        let result = cleanup(&app, &config());
        assert_eq!(result.logs_rotated, 1);
        assert_eq!(result.sessions_removed + result.backups_removed + result.stale_removed, 0);
        let log = sessions_dir(&app, NetworkType::Devnet).join("20250103-000000").join(SERVER_LOG_FILE);
        assert_eq!(fs::read(log).unwrap(), b"56789");
    }

    #[test]
    fn test_old_tree_is_cleaned() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        layout(&app);
        let later = SystemTime::now() + Duration::from_secs(30 * DAY);

        let result = cleanup_at(&app, &config(), later);
        assert_eq!(result.sessions_removed, 1);
        assert_eq!(result.backups_removed, 1);
        assert_eq!(result.stale_removed, 1);
        assert!(result.errors.is_empty());

        let sessions = sessions_dir(&app, NetworkType::Custom);
        assert!(!sessions.join("20250101-000000").exists());
        assert!(sessions.join("20250102-000000").exists());
        assert!(!run_dir(&app, NetworkType::Testnet).exists());
        assert!(run_dir(&app, NetworkType::Mainnet).exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(dir.path());
        layout(&app);
        let later = SystemTime::now() + Duration::from_secs(30 * DAY);
        let opts = CleanupConfig {
            dry_run: true,
            ..config()
        };

        let result = cleanup_at(&app, &opts, later);
        assert_eq!(result.backups_removed, 1);
        assert!(result.bytes_freed > 0);
        assert!(app.runs_dir().join("custom.backup.20250101-000000").exists());
        assert!(run_dir(&app, NetworkType::Testnet).exists());
        assert!(cleanup(&app, &CleanupConfig::default()).is_empty());
    }
}

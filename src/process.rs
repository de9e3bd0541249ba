//! Detached process control for locally managed daemons.
//!
//! Signals are delivered through the system `kill` utility so no platform
//! bindings are required.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Returns true when a process with `pid` exists.
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Sends SIGTERM. Returns false if the process was already gone.
pub fn terminate(pid: u32) -> Result<bool> {
    if !is_alive(pid) {
        return Ok(false);
    }
    let status = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("Failed to run kill")?;
    debug!("sent SIGTERM to {} (success: {})", pid, status.success());
    Ok(status.success())
}

/// Spawn `program` with `args`, appending stdout and stderr to `log_file`.
///
/// The child is not waited on and keeps running after the CLI exits.
pub fn spawn_detached(program: &Path, args: &[String], log_file: &Path) -> Result<u32> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file: {}", log_file.display()))?;
    let err_log = log.try_clone()?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(err_log))
        .spawn()
        .with_context(|| format!("Failed to start {}", program.display()))?;

    let pid = child.id();
    debug!("spawned {} with pid {}", program.display(), pid);
    Ok(pid)
}

/// Look `name` up on `PATH`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Read a pid file. Returns `None` when the file is missing.
pub fn read_pid_file(path: &Path) -> Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let pid = content
                .trim()
                .parse::<u32>()
                .with_context(|| format!("invalid PID in {}", path.display()))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read PID file {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(0));
    }

    #[test]
    fn test_read_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.pid");
        assert_eq!(read_pid_file(&path).unwrap(), None);

        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Some(4242));

        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(read_pid_file(&path).is_err());
    }

    #[test]
    fn test_spawn_and_terminate() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs").join("out.log");
        let sh = find_in_path("sh").unwrap();
        let pid = spawn_detached(
            &sh,
            &["-c".to_string(), "echo started; sleep 30".to_string()],
            &log,
        )
        .unwrap();
        assert!(is_alive(pid));
        assert!(terminate(pid).unwrap());
        assert!(log.exists());
    }
}

//! # Launch Primitive
//!
//! Every trigger ends up here. `launch_or_bring_to_front` must be safe to call
//! any number of times, from any number of triggers and processes at once:
//!
//! 1. An in-process mutex serializes triggers of the same launcher.
//! 2. A live pid in the instance file means the display is already up; with
//!    `single_top` that is the answer (optionally after a focus command).
//! 3. A launch marker created with `create_new` serializes launchers in
//!    different processes. A fresh marker owned by someone else means a launch
//!    is already in progress; a marker older than `MARKER_STALE_AFTER` is
//!    left over from a crashed launcher and is cleared.
//!
//! The display process itself holds an `InstanceLock` on the same pid file,
//! so a launched process and a hand-started one are indistinguishable.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

pub const PID_FILE_NAME: &str = "display.pid";
pub const MARKER_FILE_NAME: &str = "launch.marker";
pub const MARKER_STALE_AFTER: Duration = Duration::from_secs(15);

/// Launch request flags, mirroring an activity-style launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchFlags {
    /// Start detached, in its own process group.
    pub new_task: bool,
    /// Clear stale launch state left by crashed launchers before deciding.
    pub clear_top: bool,
    /// Reuse a running instance instead of creating a second one.
    pub single_top: bool,
    /// Raise a running instance with the focus command.
    pub bring_to_front: bool,
}

impl LaunchFlags {
    pub const KIOSK: LaunchFlags = LaunchFlags {
        new_task: true,
        clear_top: true,
        single_top: true,
        bring_to_front: true,
    };
}

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Set on the child on top of the launcher's own environment.
    pub env: Vec<(String, String)>,
}

impl LaunchTarget {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched { pid: u32 },
    AlreadyFrontmost { pid: u32 },
    /// Another launcher is starting the display right now.
    InProgress,
}

impl LaunchOutcome {
    /// Redundant launches are expected when triggers race and are not errors.
    pub fn is_race_noop(&self) -> bool {
        !matches!(self, LaunchOutcome::Launched { .. })
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Launch state file {path}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Display already running with pid {0}")]
    AlreadyRunning(u32),
}

/// The OS launch primitive.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch_or_bring_to_front(
        &self,
        target: &LaunchTarget,
        flags: LaunchFlags,
    ) -> Result<LaunchOutcome, LaunchError>;
}

/// Whether `pid` names a live, non-zombie process.
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new(),
    );
    sys.process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn write_pid(path: &Path, pid: u32) -> Result<(), LaunchError> {
    let state_err = |source: std::io::Error| LaunchError::State {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(state_err)?;
    }
    fs::write(path, pid.to_string()).map_err(state_err)
}

/// Pid of the running display instance recorded at `path`, if it is alive.
pub fn running_pid(path: &Path) -> Option<u32> {
    read_pid(path).filter(|pid| process_alive(*pid))
}

/// Single-instance lock held by the display process for its whole life.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
    held: bool,
}

impl InstanceLock {
    /// Records this process in the pid file. Fails when another live process
    /// already holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LaunchError> {
        let path = path.into();
        let pid = std::process::id();
        match running_pid(&path) {
            Some(other) if other != pid => return Err(LaunchError::AlreadyRunning(other)),
            _ => {}
        }
        write_pid(&path, pid)?;
        tracing::debug!(path = %path.display(), pid, "Instance lock acquired");
        Ok(Self {
            path,
            pid,
            held: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the pid file if it still names this process.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if read_pid(&self.path) == Some(self.pid) {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
            }
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Cross-process launch marker, removed on drop.
struct LaunchMarker(PathBuf);

impl LaunchMarker {
    fn try_create(path: &Path, clear_stale: bool) -> Result<Option<Self>, LaunchError> {
        let state_err = |source: std::io::Error| LaunchError::State {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(state_err)?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Content is informational; the file's existence is the lock.
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Some(Self(path.to_path_buf())));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !(clear_stale && Self::is_stale(path)) {
                        return Ok(None);
                    }
                    tracing::warn!(path = %path.display(), "Clearing stale launch marker");
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(state_err(e)),
                    }
                }
                Err(e) => return Err(state_err(e)),
            }
        }
        Ok(None)
    }

    fn is_stale(path: &Path) -> bool {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > MARKER_STALE_AFTER)
    }
}

impl Drop for LaunchMarker {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Launches the display as a local process.
pub struct ProcessLauncher {
    state_dir: PathBuf,
    /// Command raising an existing window; `{pid}` is substituted.
    focus_command: Option<Vec<String>>,
    serial: Mutex<()>,
}

impl ProcessLauncher {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            focus_command: None,
            serial: Mutex::new(()),
        }
    }

    pub fn with_focus_command(mut self, command: Vec<String>) -> Self {
        self.focus_command = (!command.is_empty()).then_some(command);
        self
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir.join(PID_FILE_NAME)
    }

    pub fn marker_file(&self) -> PathBuf {
        self.state_dir.join(MARKER_FILE_NAME)
    }

    async fn focus(&self, pid: u32) {
        let Some(parts) = &self.focus_command else {
            return;
        };
        let pid = pid.to_string();
        let mut argv = parts.iter().map(|p| p.replace("{pid}", &pid));
        let Some(program) = argv.next() else {
            return;
        };
        let mut command = Command::new(&program);
        command.args(argv).stdin(Stdio::null());
        match command.output().await {
            Ok(output) if output.status.success() => {
                tracing::debug!(pid = %pid, "Display brought to front")
            }
            Ok(output) => tracing::warn!(
                program = %program,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Focus command failed"
            ),
            Err(e) => tracing::warn!(program = %program, error = %e, "Failed to run focus command"),
        }
    }

    fn spawn(&self, target: &LaunchTarget, flags: LaunchFlags) -> Result<u32, LaunchError> {
        let mut command = Command::new(&target.program);
        command
            .args(&target.args)
            .envs(target.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        #[cfg(unix)]
        {
            if flags.new_task {
                command.process_group(0);
            }
        }
        #[cfg(not(unix))]
        let _ = flags;

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: target.program.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        // Reap the child so it never lingers as a zombie in this process.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(pid, %status, "Display process exited"),
                Err(e) => tracing::warn!(pid, error = %e, "Failed to wait for display process"),
            }
        });
        Ok(pid)
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch_or_bring_to_front(
        &self,
        target: &LaunchTarget,
        flags: LaunchFlags,
    ) -> Result<LaunchOutcome, LaunchError> {
        let _serial = self.serial.lock().await;
        let pid_file = self.pid_file();

        if flags.single_top {
            if let Some(pid) = running_pid(&pid_file) {
                if flags.bring_to_front {
                    self.focus(pid).await;
                }
                return Ok(LaunchOutcome::AlreadyFrontmost { pid });
            }
        }

        let Some(_marker) = LaunchMarker::try_create(&self.marker_file(), flags.clear_top)? else {
            return Ok(LaunchOutcome::InProgress);
        };

        // Another process may have finished a launch between our check and the marker.
        if flags.single_top {
            if let Some(pid) = running_pid(&pid_file) {
                return Ok(LaunchOutcome::AlreadyFrontmost { pid });
            }
        }

        let pid = self.spawn(target, flags)?;
        write_pid(&pid_file, pid)?;
        tracing::info!(pid, program = %target.program.display(), "Display process launched");
        Ok(LaunchOutcome::Launched { pid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sleeper() -> LaunchTarget {
        LaunchTarget::new("sleep").arg("30")
    }

    fn kill(pid: u32) {
        let _ = std::process::Command::new("kill").arg(pid.to_string()).status();
    }

    #[tokio::test]
    async fn racing_launches_produce_one_instance() {
        let dir = tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path());
        let target = sleeper();

        let (a, b) = tokio::join!(
            launcher.launch_or_bring_to_front(&target, LaunchFlags::KIOSK),
            launcher.launch_or_bring_to_front(&target, LaunchFlags::KIOSK),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let launched: Vec<u32> = outcomes
            .iter()
            .filter_map(|o| match o {
                LaunchOutcome::Launched { pid } => Some(*pid),
                _ => None,
            })
            .collect();
        assert_eq!(launched.len(), 1);
        let pid = launched[0];
        assert!(outcomes.contains(&LaunchOutcome::AlreadyFrontmost { pid }));
        assert_eq!(running_pid(&launcher.pid_file()), Some(pid));
        assert!(!launcher.marker_file().exists());

        kill(pid);
    }

    #[tokio::test]
    async fn fresh_marker_means_launch_in_progress() {
        let dir = tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path());
        fs::write(launcher.marker_file(), "4242").unwrap();

        let outcome = launcher
            .launch_or_bring_to_front(&sleeper(), LaunchFlags::KIOSK)
            .await
            .unwrap();
        assert_eq!(outcome, LaunchOutcome::InProgress);
        assert!(outcome.is_race_noop());
    }

    #[tokio::test]
    async fn stale_marker_is_cleared() {
        let dir = tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path());
        let marker = launcher.marker_file();
        fs::write(&marker, "4242").unwrap();
        let old = SystemTime::now() - Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&marker)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let outcome = launcher
            .launch_or_bring_to_front(&sleeper(), LaunchFlags::KIOSK)
            .await
            .unwrap();
        let LaunchOutcome::Launched { pid } = outcome else {
            panic!("expected launch, got {outcome:?}");
        };
        kill(pid);
    }

    #[tokio::test]
    async fn launched_process_sees_the_target_environment() {
        let dir = tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path());
        let out = dir.path().join("seen");
        let target = LaunchTarget::new("sh")
            .arg("-c")
            .arg(r#"printf %s "$SIGNAGE_SPREADSHEET_ID" > "$0.tmp" && mv "$0.tmp" "$0""#)
            .arg(out.display().to_string())
            .env("SIGNAGE_SPREADSHEET_ID", "sheet-7");

        let outcome = launcher
            .launch_or_bring_to_front(&target, LaunchFlags::KIOSK)
            .await
            .unwrap();
        assert!(matches!(outcome, LaunchOutcome::Launched { .. }));

        for _ in 0..50 {
            if out.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(fs::read_to_string(&out).unwrap(), "sheet-7");
    }

    #[test]
    fn instance_lock_is_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PID_FILE_NAME);

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(running_pid(&path), Some(std::process::id()));
        drop(lock);
        assert!(!path.exists());

        let mut lock = InstanceLock::acquire(&path).unwrap();
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn instance_lock_refuses_a_live_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PID_FILE_NAME);
        let mut other = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(&path, other.id().to_string()).unwrap();

        let result = InstanceLock::acquire(&path);
        let _ = other.kill();
        let _ = other.wait();
        assert!(matches!(result, Err(LaunchError::AlreadyRunning(pid)) if pid == other.id()));
    }

    #[test]
    fn dead_pid_does_not_block_the_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(PID_FILE_NAME);
        fs::write(&path, (u32::MAX - 1).to_string()).unwrap();
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[tokio::test]
    async fn failing_spawn_is_an_error() {
        let dir = tempdir().unwrap();
        let launcher = ProcessLauncher::new(dir.path());
        let target = LaunchTarget::new(dir.path().join("no-such-binary"));
        assert!(matches!(
            launcher.launch_or_bring_to_front(&target, LaunchFlags::KIOSK).await,
            Err(LaunchError::Spawn { .. })
        ));
        assert!(!launcher.marker_file().exists());
    }
}

//! Daemon process control
//!
//! Restarts run detached and single-flight; the restarting flag is cleared by
//! a spawned wait task once the daemon's restart command exits.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{PanelError, Result};

/// Upper bound for `xkeen -u`
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Called with `true` when a restart starts and `false` when it finishes
pub type RestartCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Result of a restart request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    Initiated,
    AlreadyInProgress,
}

impl RestartOutcome {
    pub fn is_initiated(&self) -> bool {
        matches!(self, RestartOutcome::Initiated)
    }
}

/// Controls the xkeen daemon wrapper
pub struct ProcessController {
    daemon_path: PathBuf,
    restarting: Arc<AtomicBool>,
    on_state_change: Option<RestartCallback>,
}

impl ProcessController {
    pub fn new(daemon_path: impl Into<PathBuf>) -> Self {
        Self {
            daemon_path: daemon_path.into(),
            restarting: Arc::new(AtomicBool::new(false)),
            on_state_change: None,
        }
    }

    pub fn with_state_callback(mut self, callback: RestartCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub fn daemon_path(&self) -> &Path {
        &self.daemon_path
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    fn notify(&self, restarting: bool) {
        if let Some(cb) = &self.on_state_change {
            cb(restarting);
        }
    }

    /// Launch `<daemon> -restart` without waiting for it
    #[instrument(skip(self))]
    pub fn restart(&self) -> Result<RestartOutcome> {
        if self
            .restarting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Restart already in progress");
            return Ok(RestartOutcome::AlreadyInProgress);
        }

        let mut command = Command::new(&self.daemon_path);
        command
            .arg("-restart")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.restarting.store(false, Ordering::SeqCst);
                error!("Failed to launch {}: {}", self.daemon_path.display(), e);
                return Err(PanelError::Network(format!(
                    "failed to launch {} -restart: {}",
                    self.daemon_path.display(),
                    e
                )));
            }
        };

        info!("Restarting xkeen (pid {:?})", child.id());
        self.notify(true);

        let restarting = self.restarting.clone();
        let callback = self.on_state_change.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!("xkeen restart finished"),
                Ok(status) => warn!("xkeen restart exited with {}", status),
                Err(e) => warn!("Failed to wait for xkeen restart: {}", e),
            }
            restarting.store(false, Ordering::SeqCst);
            if let Some(cb) = callback {
                cb(false);
            }
        });

        Ok(RestartOutcome::Initiated)
    }

    /// Run `<daemon> -u` and return its combined output
    #[instrument(skip(self))]
    pub async fn update(&self) -> Result<String> {
        let command = Command::new(&self.daemon_path)
            .arg("-u")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(UPDATE_TIMEOUT, command).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PanelError::Command {
                    message: format!("failed to run {} -u", self.daemon_path.display()),
                    output: e.to_string(),
                })
            }
            Err(_) => {
                return Err(PanelError::Command {
                    message: "update timed out".into(),
                    output: String::new(),
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(PanelError::Command {
                message: format!("update failed: {}", output.status),
                output: combined,
            });
        }

        info!("xkeen update finished");
        Ok(combined)
    }

    /// Whether an `xray run` process is alive
    pub fn is_running(&self) -> bool {
        let mut sys = System::new();
        sys.refresh_processes();

        sys.processes().values().any(|process| {
            process.name().contains("xray") && process.cmd().iter().any(|arg| arg == "run")
        })
    }
}

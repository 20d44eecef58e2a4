//! Managed Node Processes
//!
//! Nodes are plain OS processes started by the master. They are detached into their own
//! session so that a crashing master does not take the pool down with it, and a new master
//! can adopt them during startup recovery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::CacheConfig;

pub const NODE_BINARY_NAME: &str = "cache-node";

/// Starts cache nodes.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Starts a node listening on `port` that replicates from the master on `master_port`.
    /// Returns the pid of the started process.
    async fn launch(&self, port: u16, master_port: u16) -> Result<u32>;
}

/// Launches the `cache-node` executable as a detached child process.
pub struct ProcessLauncher {
    binary: PathBuf,
    log_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(binary: PathBuf, log_dir: Option<PathBuf>) -> Self {
        Self { binary, log_dir }
    }

    /// Uses the configured node binary, or `cache-node` next to the running executable.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let binary = match &config.service.nodes.binary {
            Some(path) => path.clone(),
            None => std::env::current_exe()
                .context("failed to locate the running executable")?
                .with_file_name(NODE_BINARY_NAME),
        };

        Ok(Self::new(binary, config.service.logs.dir.clone()))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn log_file(&self, port: u16) -> Result<Option<File>> {
        let Some(dir) = &self.log_dir else {
            return Ok(None);
        };

        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log dir {}", dir.display()))?;
        let path = dir.join(format!("node-{}.log", port));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Some(file))
    }
}

#[async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn launch(&self, port: u16, master_port: u16) -> Result<u32> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(master_port.to_string())
            .arg(port.to_string())
            .stdin(Stdio::null());

        match self.log_file(port)? {
            Some(out) => {
                let err = out.try_clone()?;
                cmd.stdout(Stdio::from(out)).stderr(Stdio::from(err));
            }
            None => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        detach(&mut cmd);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;
        let pid = child
            .id()
            .context("node process exited before reporting a pid")?;

        // Reap in the background so the exit status is logged and no zombie is left behind.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::info!("Node process {} (port {}) finished", pid, port);
                }
                Ok(status) => {
                    tracing::warn!("Node process {} (port {}) exited with {}", pid, port, status);
                }
                Err(e) => {
                    tracing::warn!("Failed to wait for node process {}: {}", pid, e);
                }
            }
        });

        Ok(pid)
    }
}

/// Puts the child into a new session, away from the master's process group and terminal.
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    // SAFETY: setsid() is async-signal-safe and only affects the forked child.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach(_cmd: &mut Command) {}

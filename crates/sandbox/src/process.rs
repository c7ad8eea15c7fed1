//! Child-process hosts for sandboxed models.
//!
//! [`ChildProcess`] owns the pipes of one long-lived child and does no
//! parsing of its own; [`ModelProcess`] and [`ClipProcess`] layer the
//! generation and ranking exchanges from [`crate::protocol`] on top.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout, Command};

use crate::capability::{Generator, Ranker};
use crate::error::SandboxError;
use crate::protocol;
use crate::registry::{ChildSlot, ProcessRegistry};

// ---------------------------------------------------------------------------
// ChildProcess
// ---------------------------------------------------------------------------

/// A spawned child with piped stdin/stdout.
///
/// stderr is inherited so that model tracebacks land in the worker's
/// own log stream. The child is killed on drop.
pub struct ChildProcess {
    label: String,
    child: ChildSlot,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ChildProcess {
    /// Spawn `cmd` and register it with `registry`.
    pub fn spawn(
        mut cmd: Command,
        label: impl Into<String>,
        registry: &ProcessRegistry,
    ) -> Result<Self, SandboxError> {
        let label = label.into();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            label: label.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Protocol(format!("{label}: stdin not piped")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Protocol(format!("{label}: stdout not piped")))?;

        tracing::info!(sandbox = %label, pid = child.id(), "Sandbox process started");

        let slot: ChildSlot = Arc::new(Mutex::new(Some(child)));
        registry.register(&slot);

        Ok(Self {
            label,
            child: slot,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the child has not been terminated yet.
    pub fn is_alive(&self) -> bool {
        self.child.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, request: &T) -> Result<(), SandboxError> {
        protocol::write_request(&mut self.stdin, request).await
    }

    pub fn lines(&mut self) -> &mut Lines<BufReader<ChildStdout>> {
        &mut self.stdout
    }

    /// Forcibly kill the child and wait for it to be reaped.
    pub async fn terminate(&mut self) {
        let taken = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut child) = taken {
            match child.kill().await {
                Ok(()) => tracing::info!(sandbox = %self.label, "Sandbox process killed"),
                Err(e) => {
                    tracing::warn!(sandbox = %self.label, error = %e, "Failed to kill sandbox process")
                }
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                let _ = child.start_kill();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ModelProcess
// ---------------------------------------------------------------------------

/// Generative model hosted in a child process.
pub struct ModelProcess {
    process: ChildProcess,
}

impl ModelProcess {
    pub fn spawn(
        cmd: Command,
        label: impl Into<String>,
        registry: &ProcessRegistry,
    ) -> Result<Self, SandboxError> {
        Ok(Self {
            process: ChildProcess::spawn(cmd, label, registry)?,
        })
    }
}

#[async_trait]
impl Generator for ModelProcess {
    async fn generate(&mut self, args: &serde_json::Value) -> Result<bool, SandboxError> {
        let label = self.process.label().to_string();
        if !self.process.is_alive() {
            return Err(SandboxError::ChildExited(label));
        }
        self.process.send(args).await?;
        tracing::debug!(sandbox = %label, "Generation request sent");
        protocol::read_generation(self.process.lines(), &label).await
    }

    async fn terminate(&mut self) {
        self.process.terminate().await;
    }
}

// ---------------------------------------------------------------------------
// ClipProcess
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RankRequest<'a> {
    text: &'a str,
    image: &'a str,
    cpu: bool,
}

/// CLIP similarity ranker hosted in a child process.
pub struct ClipProcess {
    process: ChildProcess,
}

impl ClipProcess {
    pub fn spawn(cmd: Command, registry: &ProcessRegistry) -> Result<Self, SandboxError> {
        Ok(Self {
            process: ChildProcess::spawn(cmd, "clip", registry)?,
        })
    }
}

#[async_trait]
impl Ranker for ClipProcess {
    async fn rank(&mut self, text: &str, image_path: &Path) -> Result<f32, SandboxError> {
        let image = image_path.to_string_lossy();
        let request = RankRequest {
            text,
            image: &image,
            cpu: false,
        };
        self.process.send(&request).await?;
        let label = self.process.label().to_string();
        protocol::read_ranking(self.process.lines(), &label).await
    }

    async fn terminate(&mut self) {
        self.process.terminate().await;
    }
}

//! [`ComputeFactory`] backed by child processes.

use std::path::{Path, PathBuf};

use aibrush_core::model::ModelKind;
use tokio::process::Command;

use crate::capability::{ComputeFactory, Generator, Ranker};
use crate::error::SandboxError;
use crate::process::{ClipProcess, ModelProcess};
use crate::registry::ProcessRegistry;

/// Script hosting the CLIP ranker.
pub const RANKER_SCRIPT: &str = "clip_process.py";

/// Launches `<interpreter> <scripts_dir>/<script>` children with the
/// transient-storage root as their working directory.
///
/// Both directories are stored absolute: a relative script path would be
/// resolved from inside the child's working directory.
#[derive(Debug, Clone)]
pub struct SandboxLauncher {
    interpreter: String,
    scripts_dir: PathBuf,
    work_dir: PathBuf,
    registry: ProcessRegistry,
}

impl SandboxLauncher {
    pub fn new(
        interpreter: impl Into<String>,
        scripts_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        registry: ProcessRegistry,
    ) -> Self {
        Self {
            interpreter: interpreter.into(),
            scripts_dir: absolute(scripts_dir.into()),
            work_dir: absolute(work_dir.into()),
            registry,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(self.scripts_dir.join(script))
            .current_dir(&self.work_dir);
        cmd
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

impl ComputeFactory for SandboxLauncher {
    fn generator(&self, model: ModelKind) -> Result<Box<dyn Generator>, SandboxError> {
        tracing::info!(model = %model, script = model.script(), "Launching model sandbox");
        let process = ModelProcess::spawn(self.command(model.script()), model.as_str(), &self.registry)?;
        Ok(Box::new(process))
    }

    fn ranker(&self) -> Result<Box<dyn Ranker>, SandboxError> {
        tracing::info!(script = RANKER_SCRIPT, "Launching ranker sandbox");
        let process = ClipProcess::spawn(self.command(RANKER_SCRIPT), &self.registry)?;
        Ok(Box::new(process))
    }
}

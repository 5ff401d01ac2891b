//! Engine process adapter: starts the reward calculator binary as a socket
//! client and kills it on stop.

use crate::domain::errors::RewardCalcError;
use crate::ports::outbound::{EngineHandle, EngineLaunchSpec, EngineLauncher};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Launches the engine with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self, spec: &EngineLaunchSpec) -> Result<Box<dyn EngineHandle>, RewardCalcError> {
        let mut command = Command::new(&spec.binary);
        command
            .args(spec.args())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            RewardCalcError::Process(format!("failed to start {}: {}", spec.binary.display(), e))
        })?;
        info!(
            pid = child.id(),
            binary = %spec.binary.display(),
            socket = %spec.socket_path.display(),
            "[qc-18] Engine process started"
        );
        Ok(Box::new(ProcessHandle { child }))
    }
}

/// A spawned engine process.
pub struct ProcessHandle {
    child: Child,
}

#[async_trait]
impl EngineHandle for ProcessHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<(), RewardCalcError> {
        let pid = self.child.id();
        match self.child.kill().await {
            Ok(()) => {
                info!(pid, "[qc-18] Engine process terminated");
                Ok(())
            }
            // Already exited and reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => {
                warn!(pid, error = %e, "[qc-18] Failed to terminate engine process");
                Err(RewardCalcError::Process(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(binary: &str) -> EngineLaunchSpec {
        EngineLaunchSpec {
            binary: PathBuf::from(binary),
            db_dir: PathBuf::from("/tmp/rc-db"),
            db_count: 1,
            data_root: PathBuf::from("/tmp/iiss"),
            socket_path: PathBuf::from("/tmp/rc.sock"),
            log_path: PathBuf::from("/tmp/rc.log"),
            monitor: false,
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_process_error() {
        let result = ProcessLauncher.launch(&spec("/nonexistent/qc-rc-engine")).await;
        assert!(matches!(result, Err(RewardCalcError::Process(_))));
    }

    #[tokio::test]
    async fn test_terminate_kills_running_process() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "sleep 30"]).kill_on_drop(true);
        let child = command.spawn().unwrap();
        let mut handle = ProcessHandle { child };

        assert!(handle.id().is_some());
        handle.terminate().await.unwrap();
        assert!(handle.id().is_none());
    }
}

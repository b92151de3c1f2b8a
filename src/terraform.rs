use serde::Serialize;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Init,
    Apply,
    Destroy,
}

impl Operation {
    /// Arguments passed to the tool. This is an external contract.
    pub fn args(self) -> &'static [&'static str] {
        match self {
            Operation::Init => &["init"],
            Operation::Apply => &["apply", "-auto-approve"],
            Operation::Destroy => &["destroy", "-auto-approve"],
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            Operation::Init => "Terraform initialized successfully",
            Operation::Apply => "Terraform applied successfully",
            Operation::Destroy => "Terraform destroyed successfully",
        }
    }

    pub fn name(self) -> &'static str {
        self.args()[0]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("working directory {} is missing or not a directory", .dir.display())]
    DirectoryMissing { dir: PathBuf },
    #[error("{program} not found in PATH")]
    ToolNotFound { program: String },
    #[error("{command} failed (exit code: {})\n{output}", .code.map_or("signal".to_string(), |c| c.to_string()))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        output: String,
    },
    #[error("failed to run tool: {0}")]
    Io(#[from] std::io::Error),
}

impl InvokeError {
    pub fn kind(&self) -> &'static str {
        match self {
            InvokeError::DirectoryMissing { .. } => "directory_missing",
            InvokeError::ToolNotFound { .. } => "tool_not_found",
            InvokeError::NonZeroExit { .. } => "non_zero_exit",
            InvokeError::Io(_) => "io",
        }
    }
}

/// Runs `program` with `args` in `dir`, returning stdout and stderr
/// interleaved as the child wrote them.
pub fn run_combined(program: &str, args: &[&str], dir: &Path) -> Result<Vec<u8>, InvokeError> {
    if !dir.is_dir() {
        return Err(InvokeError::DirectoryMissing {
            dir: dir.to_path_buf(),
        });
    }

    let (mut reader, writer) = std::io::pipe()?;
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(dir)
        .stdout(writer.try_clone()?)
        .stderr(writer);

    let mut child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => InvokeError::ToolNotFound {
            program: program.to_string(),
        },
        _ => InvokeError::Io(e),
    })?;
    // The command still holds both write ends; the read below only sees EOF
    // once every copy is closed.
    drop(command);

    let mut output = Vec::new();
    reader.read_to_end(&mut output)?;
    let status = child.wait()?;

    if !status.success() {
        return Err(InvokeError::NonZeroExit {
            command: format!("{} {}", program, args.join(" ")),
            code: status.code(),
            output: String::from_utf8_lossy(&output).trim().to_string(),
        });
    }

    Ok(output)
}

/// The tool's working directory, shared by every operation. Holding the
/// lock serializes runs against the same directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    binary: String,
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl Workspace {
    pub fn new(binary: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            dir: dir.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Blocking, and does not take the workspace lock. Use [`Workspace::invoke`]
    /// wherever runs can overlap.
    pub fn invoke_locked(&self, op: Operation) -> Result<Vec<u8>, InvokeError> {
        tracing::info!(
            program = %self.binary,
            args = ?op.args(),
            dir = %self.dir.display(),
            "running terraform"
        );
        let result = run_combined(&self.binary, op.args(), &self.dir);
        match &result {
            Ok(output) => {
                tracing::info!(operation = op.name(), "{}", String::from_utf8_lossy(output))
            }
            Err(e) => tracing::error!(operation = op.name(), kind = e.kind(), "{}", e),
        }
        result
    }

    /// Runs `op` under the workspace lock on the blocking pool. The guard
    /// moves into the blocking task, so the lock outlives a dropped request
    /// and is released only once the child has exited.
    pub async fn invoke(&self, op: Operation) -> Result<Vec<u8>, InvokeError> {
        let guard: OwnedMutexGuard<()> = self.lock.clone().lock_owned().await;
        let workspace = self.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            workspace.invoke_locked(op)
        })
        .await
        .map_err(|e| InvokeError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::testutil::FakeTerraform;

    #[test]
    fn operation_args_match_tool_contract() {
        assert_eq!(Operation::Init.args(), ["init"]);
        assert_eq!(Operation::Apply.args(), ["apply", "-auto-approve"]);
        assert_eq!(Operation::Destroy.args(), ["destroy", "-auto-approve"]);
    }

    #[cfg(unix)]
    #[test]
    fn run_combined_interleaves_stdout_and_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let output = run_combined(
            "sh",
            &["-c", "echo one; echo two 1>&2; echo three"],
            tmp.path(),
        )
        .unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "one\ntwo\nthree\n");
    }

    #[cfg(unix)]
    #[test]
    fn run_combined_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nope");
        let err = run_combined("sh", &["-c", "true"], &dir).unwrap_err();
        assert!(matches!(err, InvokeError::DirectoryMissing { .. }));
        assert!(err.to_string().contains("not a directory"));
    }

    #[cfg(unix)]
    #[test]
    fn run_combined_tool_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run_combined("definitely-not-a-real-tool-xyz", &["init"], tmp.path())
            .unwrap_err();
        assert!(matches!(err, InvokeError::ToolNotFound { .. }));
        assert_eq!(err.kind(), "tool_not_found");
    }

    #[cfg(unix)]
    #[test]
    fn run_combined_non_zero_exit_carries_output() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run_combined("sh", &["-c", "echo boom 1>&2; exit 3"], tmp.path()).unwrap_err();
        match &err {
            InvokeError::NonZeroExit { code, output, .. } => {
                assert_eq!(*code, Some(3));
                assert_eq!(output, "boom");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("exit code: 3"), "message: {}", msg);
        assert!(msg.contains("boom"), "message: {}", msg);
    }

    #[cfg(unix)]
    #[test]
    fn invoke_locked_passes_args_and_dir() {
        let fake = FakeTerraform::new();
        let workspace = fake.workspace();
        for op in [Operation::Init, Operation::Apply, Operation::Destroy] {
            workspace.invoke_locked(op).unwrap();
        }
        let calls = fake.calls();
        assert_eq!(
            calls,
            vec!["init", "apply -auto-approve", "destroy -auto-approve"]
        );
        assert_eq!(fake.last_cwd(), fake.working_dir());
    }

    #[cfg(unix)]
    #[test]
    fn invoke_locked_returns_tool_output() {
        let fake = FakeTerraform::new();
        let output = fake.workspace().invoke_locked(Operation::Init).unwrap();
        assert!(String::from_utf8_lossy(&output).contains("fake terraform init"));
    }

    #[cfg(unix)]
    #[test]
    fn invoke_locked_does_not_memoize() {
        let fake = FakeTerraform::new();
        let workspace = fake.workspace();
        workspace.invoke_locked(Operation::Init).unwrap();
        workspace.invoke_locked(Operation::Init).unwrap();
        assert_eq!(fake.calls(), vec!["init", "init"]);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_invocations_never_overlap() {
        let fake = FakeTerraform::with_delay_ms(200);
        let workspace = fake.workspace();

        let a = tokio::spawn({
            let ws = workspace.clone();
            async move { ws.invoke(Operation::Apply).await }
        });
        let b = tokio::spawn({
            let ws = workspace.clone();
            async move { ws.invoke(Operation::Apply).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(fake.calls().len(), 2);
        assert!(!fake.overlapped(), "two runs held the working directory at once");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lock_released_after_failure() {
        let fake = FakeTerraform::failing();
        let workspace = fake.workspace();
        assert!(workspace.invoke(Operation::Apply).await.is_err());
        // Would hang if the failed run leaked its guard.
        assert!(workspace.invoke(Operation::Apply).await.is_err());
        assert_eq!(fake.calls().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn run_combined_file_in_place_of_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("terraform");
        std::fs::write(&file, "").unwrap();
        let err = run_combined("sh", &["-c", "true"], &file).unwrap_err();
        assert!(matches!(err, InvokeError::DirectoryMissing { .. }));
        assert!(!err.to_string().contains("does not exist"));
        assert!(err.to_string().contains("not a directory"));
    }

    #[cfg(unix)]
    #[test]
    fn run_combined_killed_by_signal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run_combined("sh", &["-c", "echo hi; kill -9 $$"], tmp.path()).unwrap_err();
        match &err {
            InvokeError::NonZeroExit { code, output, .. } => {
                assert_eq!(*code, None);
                assert_eq!(output, "hi");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
        assert!(err.to_string().contains("exit code: signal"), "message: {}", err);
    }

    #[test]
    fn io_error_message_does_not_name_terraform() {
        let err = InvokeError::from(std::io::Error::other("pipe closed"));
        assert_eq!(err.kind(), "io");
        assert_eq!(err.to_string(), "failed to run tool: pipe closed");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn aborted_request_keeps_lock_until_child_exits() {
        let fake = FakeTerraform::with_delay_ms(400);
        let workspace = fake.workspace();

        let apply = tokio::spawn({
            let ws = workspace.clone();
            async move { ws.invoke(Operation::Apply).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        apply.abort();
        assert!(apply.await.unwrap_err().is_cancelled());

        workspace.invoke(Operation::Destroy).await.unwrap();

        assert_eq!(fake.calls(), vec!["apply -auto-approve", "destroy -auto-approve"]);
        assert!(!fake.overlapped(), "destroy ran while the aborted apply was still running");
    }
}

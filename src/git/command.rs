use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use log::{debug, trace};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
};
use tokio_util::sync::CancellationToken;

use super::{GitCommand, GitOptions};
use crate::platform::{platform_of, Invocation, Platform};

/// Environment that keeps git from waiting on a terminal. Variables already
/// present in the process environment are left alone.
const NON_INTERACTIVE_ENV: [(&str, &str); 3] = [
    ("GIT_TERMINAL_PROMPT", "0"),
    ("GIT_ASKPASS", "echo"),
    ("GIT_SSH_COMMAND", "ssh -oStrictHostKeyChecking=accept-new"),
];

/// Exit code of `cmd.exe` when the command it was asked to run does not exist.
const CMD_NOT_FOUND: i32 = 9009;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Git executable {program} was not found")]
    ExecutableNotFound { program: String },
    #[error("git {command} did not finish within {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
        pid: Option<u32>,
    },
    #[error("git {command} exited with code {exit_code}: {}", stderr.trim())]
    NonZeroExit {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("git {command} was cancelled")]
    Cancelled { command: String },
    #[error("IO error while running git {command}: {source}")]
    IO {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Per-call settings of [`GitCommand::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    pub env: BTreeMap<String, String>,
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn new(timeout: Duration) -> Self {
        RunOptions {
            timeout,
            env: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl From<&GitOptions> for RunOptions {
    fn from(options: &GitOptions) -> Self {
        RunOptions::new(options.timeout)
    }
}

/// Runs the git executable as a child process, one process per call.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    program: PathBuf,
    platform: Platform,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl GitExecutor {
    pub fn new(options: &GitOptions) -> GitExecutor {
        GitExecutor {
            program: options.program().to_path_buf(),
            platform: platform_of(options),
            cwd: options.cwd.clone(),
            env: options.env.clone(),
        }
    }

    fn command(&self, invocation: &Invocation, cwd: Option<&Path>, options: &RunOptions) -> Command {
        let mut command = Command::new(&invocation.program);
        apply_args(&mut command, invocation);
        if let Some(cwd) = cwd.or(self.cwd.as_deref()) {
            command.current_dir(cwd);
        }
        for (key, value) in NON_INTERACTIVE_ENV {
            if std::env::var_os(key).is_none() {
                command.env(key, value);
            }
        }
        command
            .envs(&self.env)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

enum Outcome {
    Exited(std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl GitCommand for GitExecutor {
    async fn run(
        &self,
        cwd: Option<&Path>,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandResult, ExecutionError> {
        let program = self.program.to_string_lossy();
        let command_name = args.first().cloned().unwrap_or_default();
        let invocation = self.platform.invocation(&program, args);
        trace!("Running {:?} {:?}", invocation.program, invocation.args);

        let start = Instant::now();
        let mut child = self
            .command(&invocation, cwd, options)
            .spawn()
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::NotFound => ExecutionError::ExecutableNotFound {
                    program: invocation.program.clone(),
                },
                _ => ExecutionError::IO {
                    command: command_name.clone(),
                    source: error,
                },
            })?;
        let mut tree = ProcessTree { pid: child.id() };

        let outcome = tokio::select! {
            output = collect_output(&mut child) => Outcome::Exited(output),
            _ = tokio::time::sleep(options.timeout) => Outcome::TimedOut,
            _ = options.cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(output) => {
                tree.release();
                let (status, stdout, stderr) = output.map_err(|source| ExecutionError::IO {
                    command: command_name.clone(),
                    source,
                })?;
                let result = CommandResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    duration: start.elapsed(),
                };
                debug!(
                    "git {} exited with {} after {:?}",
                    command_name, result.exit_code, result.duration
                );
                if status.success() {
                    Ok(result)
                } else if invocation.verbatim && result.exit_code == CMD_NOT_FOUND {
                    Err(ExecutionError::ExecutableNotFound {
                        program: program.into_owned(),
                    })
                } else {
                    Err(ExecutionError::NonZeroExit {
                        command: command_name,
                        exit_code: result.exit_code,
                        stdout: result.stdout,
                        stderr: result.stderr,
                    })
                }
            }
            Outcome::TimedOut => {
                let pid = child.id();
                terminate(&mut child, &mut tree).await;
                Err(ExecutionError::Timeout {
                    command: command_name,
                    timeout: options.timeout,
                    pid,
                })
            }
            Outcome::Cancelled => {
                terminate(&mut child, &mut tree).await;
                Err(ExecutionError::Cancelled {
                    command: command_name,
                })
            }
        }
    }
}

#[cfg(windows)]
fn apply_args(command: &mut Command, invocation: &Invocation) {
    if invocation.verbatim {
        for arg in &invocation.args {
            command.raw_arg(arg);
        }
    } else {
        command.args(&invocation.args);
    }
}

#[cfg(not(windows))]
fn apply_args(command: &mut Command, invocation: &Invocation) {
    command.args(&invocation.args);
}

async fn collect_output(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}

/// Kills the child together with the helpers it spawned, then reaps it.
async fn terminate(child: &mut Child, tree: &mut ProcessTree) {
    tree.kill();
    if let Err(error) = child.kill().await {
        debug!("Failed to kill git process {:?}: {}", child.id(), error);
    }
}

/// Everything started for one invocation: the child, and on Windows the git
/// behind `cmd.exe`, plus remote helpers such as `git-remote-https`.
///
/// The tree is killed when dropped before the child exited on its own.
struct ProcessTree {
    pid: Option<u32>,
}

impl ProcessTree {
    fn kill(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_tree(pid);
        }
    }

    fn release(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessTree {
    fn drop(&mut self) {
        self.kill();
    }
}

/// The child leads its own process group.
#[cfg(unix)]
fn kill_tree(pid: u32) {
    use nix::{
        sys::signal::{killpg, Signal},
        unistd::Pid,
    };

    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    if let Err(error) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!("Failed to kill process group {}: {}", pid, error);
    }
}

/// Must run while the child is alive, `taskkill` walks the tree by parent pid.
#[cfg(windows)]
fn kill_tree(pid: u32) {
    let status = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(error) = status {
        debug!("Failed to kill process tree {}: {}", pid, error);
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn executor(program: &str) -> GitExecutor {
        GitExecutor::new(&GitOptions {
            git_path: Some(PathBuf::from(program)),
            ..Default::default()
        })
    }

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_output() {
        let result = executor("sh")
            .run(
                None,
                &args(&["-c", "printf out; printf err >&2"]),
                &RunOptions::new(Duration::from_secs(10)),
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_output() {
        let error = executor("sh")
            .run(
                None,
                &args(&["-c", "printf partial; printf 'fatal: nope' >&2; exit 3"]),
                &RunOptions::new(Duration::from_secs(10)),
            )
            .await
            .unwrap_err();
        match error {
            ExecutionError::NonZeroExit {
                exit_code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stdout, "partial");
                assert_eq!(stderr, "fatal: nope");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_executable() {
        let error = executor("/nonexistent/bin/git")
            .run(
                None,
                &args(&["--version"]),
                &RunOptions::new(Duration::from_secs(10)),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(error, ExecutionError::ExecutableNotFound { .. }),
            "{error:?}"
        );
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let start = Instant::now();
        let error = executor("sleep")
            .run(
                None,
                &args(&["30"]),
                &RunOptions::new(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        let pid = match error {
            ExecutionError::Timeout { pid, .. } => pid.expect("a spawned process has a pid"),
            other => panic!("unexpected error {other:?}"),
        };
        if cfg!(target_os = "linux") {
            assert!(!Path::new(&format!("/proc/{pid}")).exists());
        }
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        let error = executor("sleep")
            .run(
                None,
                &args(&["30"]),
                &RunOptions::new(Duration::from_secs(60)).with_cancel(cancel),
            )
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(matches!(error, ExecutionError::Cancelled { .. }), "{error:?}");
    }

    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    /// Runs a shell that starts a background helper and waits on it, then
    /// checks that the helper did not survive the shell.
    async fn assert_helper_killed(options: RunOptions) -> ExecutionError {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
        let error = executor("sh")
            .run(None, &args(&["-c", &script]), &options)
            .await
            .unwrap_err();

        let helper = std::fs::read_to_string(&pid_file).unwrap().trim().to_owned();
        for _ in 0..100 {
            if !is_running(&helper) {
                return error;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("helper {helper} is still running");
    }

    #[tokio::test]
    async fn timeout_kills_spawned_helpers() {
        if !cfg!(target_os = "linux") {
            return;
        }
        let error = assert_helper_killed(RunOptions::new(Duration::from_millis(500))).await;
        assert!(matches!(error, ExecutionError::Timeout { .. }), "{error:?}");
    }

    #[tokio::test]
    async fn cancellation_kills_spawned_helpers() {
        if !cfg!(target_os = "linux") {
            return;
        }
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let error = assert_helper_killed(
            RunOptions::new(Duration::from_secs(60)).with_cancel(cancel),
        )
        .await;
        assert!(matches!(error, ExecutionError::Cancelled { .. }), "{error:?}");
    }

    #[tokio::test]
    async fn dropped_run_kills_spawned_helpers() {
        if !cfg!(target_os = "linux") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
        let git = executor("sh");
        let args = args(&["-c", &script]);
        let options = RunOptions::new(Duration::from_secs(60));
        let abandoned = tokio::time::timeout(
            Duration::from_millis(500),
            git.run(None, &args, &options),
        )
        .await;
        assert!(abandoned.is_err());

        let helper = std::fs::read_to_string(&pid_file).unwrap().trim().to_owned();
        for _ in 0..100 {
            if !is_running(&helper) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("helper {helper} is still running");
    }

    #[tokio::test]
    async fn runs_in_working_directory_with_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = RunOptions::new(Duration::from_secs(10));
        options.env.insert("EXTRA".to_owned(), "x".to_owned());
        let result = executor("sh")
            .run(
                Some(dir.path()),
                &args(&["-c", "pwd; printf %s \"$GIT_TERMINAL_PROMPT-$EXTRA\" >&2"]),
                &options,
            )
            .await
            .unwrap();
        assert_eq!(
            Path::new(result.stdout.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        if std::env::var_os("GIT_TERMINAL_PROMPT").is_none() {
            assert_eq!(result.stderr, "0-x");
        }
    }
}

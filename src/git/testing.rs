use std::{
    collections::VecDeque,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use super::{CommandResult, ExecutionError, GitCommand, RunOptions};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Output(String),
    Failure { exit_code: i32, stderr: String },
    Timeout,
}

impl Reply {
    pub(crate) fn output(stdout: &str) -> Reply {
        Reply::Output(stdout.to_owned())
    }

    pub(crate) fn failure(exit_code: i32, stderr: &str) -> Reply {
        Reply::Failure {
            exit_code,
            stderr: stderr.to_owned(),
        }
    }
}

/// Scripted stand-in for the git executable that counts its invocations.
pub(crate) struct FakeGit {
    fallback: Reply,
    replies: Mutex<VecDeque<Reply>>,
    delay: Duration,
    invocations: AtomicUsize,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeGit {
    pub(crate) fn new(fallback: Reply) -> FakeGit {
        FakeGit {
            fallback,
            replies: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            invocations: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replies handed out once each, in order, before falling back.
    pub(crate) fn with_replies(self, replies: impl IntoIterator<Item = Reply>) -> FakeGit {
        self.replies.lock().unwrap().extend(replies);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> FakeGit {
        self.delay = delay;
        self
    }

    pub(crate) fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitCommand for FakeGit {
    async fn run(
        &self,
        _cwd: Option<&Path>,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandResult, ExecutionError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(args.to_vec());
        let command = args.first().cloned().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = options.cancel.cancelled() => {
                return Err(ExecutionError::Cancelled { command });
            }
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Output(stdout) => Ok(CommandResult {
                exit_code: 0,
                stdout,
                stderr: String::new(),
                duration: self.delay,
            }),
            Reply::Failure { exit_code, stderr } => Err(ExecutionError::NonZeroExit {
                command,
                exit_code,
                stdout: String::new(),
                stderr,
            }),
            Reply::Timeout => Err(ExecutionError::Timeout {
                command,
                timeout: options.timeout,
                pid: None,
            }),
        }
    }
}

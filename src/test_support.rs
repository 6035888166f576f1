//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::remote::{CommandOutput, CommandRunner, RemoteError, RunnerFuture};

#[derive(Clone, Debug)]
enum Scripted {
    Output(CommandOutput),
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Scripted>,
    fallback: Option<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Once the queue is empty the fallback output is returned, or a spawn error
/// when no fallback was set.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the final argument, which is the remote command for `ssh` and
    /// the destination for `scp`.
    #[must_use]
    pub fn last_arg(&self) -> String {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.lock().invocations.clone()
    }

    /// Returns the number of responses still queued.
    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response terminated by `signal`.
    pub fn push_signal(&self, signal: i32) {
        self.lock()
            .responses
            .push_back(Scripted::Output(CommandOutput {
                code: None,
                signal: Some(signal),
                stdout: String::new(),
                stderr: String::new(),
            }));
    }

    /// Pushes a response that never completes, simulating a hung connection.
    pub fn push_hang(&self) {
        self.lock().responses.push_back(Scripted::Hang);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.lock()
            .responses
            .push_back(Scripted::Output(CommandOutput {
                code,
                signal: None,
                stdout: stdout.into(),
                stderr: stderr.into(),
            }));
    }

    /// Sets the output returned once the queue is exhausted.
    pub fn set_fallback_failure(&self, code: i32) {
        self.lock().fallback = Some(CommandOutput {
            code: Some(code),
            signal: None,
            stdout: String::new(),
            stderr: String::from("simulated failure"),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        let next = {
            let mut script = self.lock();
            script.invocations.push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
            script
                .responses
                .pop_front()
                .or_else(|| script.fallback.clone().map(Scripted::Output))
        };

        match next {
            Some(Scripted::Output(output)) => Box::pin(async move { Ok(output) }),
            Some(Scripted::Hang) => Box::pin(std::future::pending()),
            None => Box::pin(async move {
                Err(RemoteError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                })
            }),
        }
    }
}

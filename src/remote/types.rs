//! Command runner abstraction and the process-backed implementation.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::RemoteError;

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Signal that terminated the process, if any.
    pub signal: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero and no signal fired.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0)) && self.signal.is_none()
    }

    /// Converts the output into its standard output, failing on a non-zero
    /// exit status or signal termination.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::CommandFailure`] when the command did not
    /// succeed.
    pub fn into_stdout(self, program: &str) -> Result<String, RemoteError> {
        if self.is_success() {
            return Ok(self.stdout);
        }

        let status_text = match (self.code, self.signal) {
            (Some(code), _) => code.to_string(),
            (None, Some(signal)) => format!("signal {signal}"),
            (None, None) => String::from("unknown"),
        };
        Err(RemoteError::CommandFailure {
            program: program.to_owned(),
            status: self.code,
            signal: self.signal,
            status_text,
            stderr: self.stderr,
        })
    }
}

/// Future returned by [`CommandRunner::run`].
pub type RunnerFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput, RemoteError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a>;
}

/// Real command runner that shells out to the host operating system.
///
/// Standard error is forwarded line by line to `tracing` at debug level as
/// it arrives; standard output is buffered and returned once the process
/// exits.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        Box::pin(async move {
            let spawn_error = |err: io::Error| RemoteError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            };

            let mut child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(spawn_error)?;

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let (stdout_text, stderr_text) =
                tokio::join!(read_all(stdout), stream_lines(program, stderr));
            let status = child.wait().await.map_err(spawn_error)?;

            Ok(CommandOutput {
                code: status.code(),
                signal: exit_signal(status),
                stdout: stdout_text.map_err(spawn_error)?,
                stderr: stderr_text.map_err(spawn_error)?,
            })
        })
    }
}

async fn read_all<S: AsyncRead + Unpin>(pipe: Option<S>) -> io::Result<String> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = pipe {
        reader.read_to_end(&mut buffer).await?;
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn stream_lines<S: AsyncRead + Unpin>(program: &str, pipe: Option<S>) -> io::Result<String> {
    let mut collected = String::new();
    let Some(raw) = pipe else {
        return Ok(collected);
    };

    let mut reader = BufReader::new(raw);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(collected);
        }
        let text = String::from_utf8_lossy(&line);
        debug!(target: "ferry::remote", program, "{}", text.trim_end());
        collected.push_str(&text);
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
const fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

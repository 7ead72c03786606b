//! Command runner: executes OS-level commands and captures their output.
//!
//! Everything the supervisor does to the outside world (launching the worker,
//! checking whether it is alive, killing it) goes through a [`CommandRunner`].
//! The production implementation, [`ShellRunner`], shells out with
//! `tokio::process` and bounds every round trip with a timeout so a wedged
//! command interpreter cannot hang the supervisor forever.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::{AppError, Result};

/// Program plus arguments for a single command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable to run.
    pub program: String,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a spec with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Run `script` through PowerShell without loading a profile.
    #[must_use]
    pub fn powershell(script: impl Into<String>) -> Self {
        Self::new("powershell")
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(script)
    }

    /// Run `script` through the POSIX shell.
    #[must_use]
    pub fn sh(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Whether the command exited successfully.
    pub success: bool,
    /// Captured stdout (stderr is appended on failure), `\r\n` normalised.
    pub output: String,
}

/// Executes OS-level commands.
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion and capture its output.
    ///
    /// A command that runs but exits unsuccessfully is **not** an error; it
    /// yields `success: false`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Command`] if the command cannot be started or
    /// does not finish within the runner's timeout.
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    /// Create a runner whose commands are killed after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// `CREATE_NO_WINDOW`, so helper consoles never flash on screen.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

impl CommandRunner for ShellRunner {
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>> {
        Box::pin(async move {
            let mut cmd = Command::new(&spec.program);
            cmd.args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            #[cfg(windows)]
            cmd.creation_flags(CREATE_NO_WINDOW);

            let output = tokio::time::timeout(self.timeout, cmd.output())
                .await
                .map_err(|_| {
                    AppError::Command(format!(
                        "`{}` did not finish within {:?}",
                        spec.program, self.timeout
                    ))
                })?
                .map_err(|err| {
                    AppError::Command(format!("failed to run `{}`: {err}", spec.program))
                })?;

            let success = output.status.success();
            let mut text = normalize(&String::from_utf8_lossy(&output.stdout));
            if !success {
                let stderr = normalize(&String::from_utf8_lossy(&output.stderr));
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
            }

            debug!(program = %spec.program, success, "command finished");
            Ok(CommandOutput {
                success,
                output: text,
            })
        })
    }
}

fn normalize(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim().to_owned()
}

/// Escape `input` for embedding inside a double-quoted PowerShell string.
///
/// Backticks and double quotes are prefixed with a backtick.
#[must_use]
pub fn escape_powershell(input: &str) -> String {
    input.replace('`', "``").replace('"', "`\"")
}

/// Quote `input` as a single POSIX shell word.
#[must_use]
pub fn quote_sh(input: &str) -> String {
    format!("'{}'", input.replace('\'', r"'\''"))
}

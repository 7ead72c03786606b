//! Process host: launch, query, and terminate the worker process.
//!
//! [`ProcessHost`] is the boundary the supervisor and watcher talk to.
//! [`SystemHost`] implements it on top of a [`CommandRunner`]: PowerShell
//! on Windows (`Start-Process`, `Get-Process`, `Stop-Process`), `ps` and
//! `kill` on Unix. The worker is launched detached with its output
//! discarded; only its pid comes back.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::command::{escape_powershell, quote_sh, CommandRunner, CommandSpec};
use crate::config::WorkerConfig;
use crate::{AppError, Result};

/// One entry of a process listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Executable name without extension.
    pub process_name: String,
    /// OS process identifier.
    pub id: u32,
}

/// Selector for [`ProcessHost::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessQuery {
    /// Match a single process id.
    Id(u32),
    /// Match every process with this name.
    Name(String),
}

/// Start, check-alive-by-id, and terminate the worker process.
pub trait ProcessHost: Send + Sync {
    /// List processes matching `query`. An empty list means none matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing command fails or its output cannot
    /// be parsed.
    fn query<'a>(
        &'a self,
        query: &'a ProcessQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + 'a>>;

    /// Launch the worker hidden and detached, returning its pid.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the binary cannot be staged or
    /// launched.
    fn start_worker(&self) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>>;

    /// Terminate the worker: by `pid` when known, then by process name.
    ///
    /// Killing a process that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`] if a kill command fails to run.
    fn kill_worker(&self, pid: Option<u32>)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Whether `pid` is currently alive.
    ///
    /// # Errors
    ///
    /// Propagates [`query`](Self::query) failures; callers decide whether a
    /// failed check means anything.
    fn is_alive(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let query = ProcessQuery::Id(pid);
            Ok(!self.query(&query).await?.is_empty())
        })
    }
}

/// Command dialect used by [`SystemHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// PowerShell cmdlets.
    Windows,
    /// `sh`, `ps`, and `kill`.
    Unix,
}

impl Platform {
    /// Dialect of the platform this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// [`ProcessHost`] that shells out through a [`CommandRunner`].
pub struct SystemHost {
    runner: Arc<dyn CommandRunner>,
    worker: WorkerConfig,
    platform: Platform,
}

impl SystemHost {
    /// Create a host for the current platform.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, worker: WorkerConfig) -> Self {
        Self::with_platform(runner, worker, Platform::current())
    }

    /// Create a host using an explicit command dialect.
    #[must_use]
    pub fn with_platform(
        runner: Arc<dyn CommandRunner>,
        worker: WorkerConfig,
        platform: Platform,
    ) -> Self {
        Self {
            runner,
            worker,
            platform,
        }
    }

    fn query_command(&self, query: &ProcessQuery) -> CommandSpec {
        match (self.platform, query) {
            (Platform::Windows, ProcessQuery::Id(id)) => CommandSpec::powershell(format!(
                "Get-Process -ErrorAction SilentlyContinue -Id \"{id}\" \
                 | Select-Object ProcessName, Id | ConvertTo-Json -Compress"
            )),
            (Platform::Windows, ProcessQuery::Name(name)) => CommandSpec::powershell(format!(
                "Get-Process -ErrorAction SilentlyContinue -Name \"{}\" \
                 | Select-Object ProcessName, Id | ConvertTo-Json -Compress",
                escape_powershell(name)
            )),
            (Platform::Unix, ProcessQuery::Id(id)) => CommandSpec::new("ps")
                .arg("-p")
                .arg(id.to_string())
                .arg("-o")
                .arg("pid=,comm="),
            (Platform::Unix, ProcessQuery::Name(_)) => {
                CommandSpec::new("ps").arg("-A").arg("-o").arg("pid=,comm=")
            }
        }
    }

    async fn kill_ids(&self, ids: &[u32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let spec = match self.platform {
            Platform::Windows => {
                let list = ids
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                CommandSpec::powershell(format!(
                    "Stop-Process -ErrorAction SilentlyContinue -Force -Id {list}"
                ))
            }
            Platform::Unix => ids
                .iter()
                .fold(CommandSpec::new("kill").arg("-KILL"), |spec, id| {
                    spec.arg(id.to_string())
                }),
        };
        // A process exiting between query and kill makes `kill` fail; that
        // is the outcome we wanted, so only a failure to run counts.
        self.runner
            .run(&spec)
            .await
            .map_err(|err| AppError::Process(format!("kill failed: {err}")))?;
        Ok(())
    }
}

impl ProcessHost for SystemHost {
    fn query<'a>(
        &'a self,
        query: &'a ProcessQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + 'a>> {
        Box::pin(async move {
            let out = self.runner.run(&self.query_command(query)).await?;
            match self.platform {
                Platform::Windows => parse_powershell_processes(&out.output),
                Platform::Unix => {
                    let listed = parse_ps_output(&out.output)?;
                    Ok(match query {
                        ProcessQuery::Id(id) => {
                            listed.into_iter().filter(|p| p.id == *id).collect()
                        }
                        ProcessQuery::Name(name) => listed
                            .into_iter()
                            .filter(|p| name_matches(&p.process_name, name))
                            .collect(),
                    })
                }
            }
        })
    }

    fn start_worker(&self) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        Box::pin(async move {
            let path = stage_binary(&self.worker).await?;
            let shown = path.to_string_lossy();
            let spec = match self.platform {
                Platform::Windows => CommandSpec::powershell(format!(
                    "(Start-Process -PassThru -WindowStyle Hidden -FilePath \"{}\").Id",
                    escape_powershell(&shown)
                )),
                Platform::Unix => CommandSpec::sh(format!(
                    "nohup {} </dev/null >/dev/null 2>&1 & echo $!",
                    quote_sh(&shown)
                )),
            };

            let out = self
                .runner
                .run(&spec)
                .await
                .map_err(|err| AppError::Spawn(err.to_string()))?;
            if !out.success {
                return Err(AppError::Spawn(format!(
                    "launch of {shown} failed: {}",
                    out.output
                )));
            }

            let pid = out.output.trim().parse::<u32>().map_err(|err| {
                AppError::Spawn(format!("unexpected pid output {:?}: {err}", out.output))
            })?;
            info!(pid, binary = %shown, "worker launched");
            Ok(pid)
        })
    }

    fn kill_worker(
        &self,
        pid: Option<u32>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(pid) = pid {
                self.kill_ids(&[pid]).await?;
            }

            let name = self.worker.process_name();
            match self.platform {
                Platform::Windows => {
                    let spec = CommandSpec::powershell(format!(
                        "Stop-Process -ErrorAction SilentlyContinue -Force -Name \"{}\"",
                        escape_powershell(&name)
                    ));
                    self.runner
                        .run(&spec)
                        .await
                        .map_err(|err| AppError::Process(format!("kill failed: {err}")))?;
                }
                Platform::Unix => {
                    let query = ProcessQuery::Name(name);
                    let ids: Vec<u32> = self.query(&query).await?.iter().map(|p| p.id).collect();
                    self.kill_ids(&ids).await?;
                }
            }
            debug!(?pid, "worker kill issued");
            Ok(())
        })
    }
}

/// Copy the worker binary into the staging directory when staging is on.
async fn stage_binary(worker: &WorkerConfig) -> Result<PathBuf> {
    if !worker.stage {
        return Ok(worker.binary.clone());
    }

    let file_name = worker
        .binary
        .file_name()
        .ok_or_else(|| AppError::Spawn("worker.binary has no file name".into()))?;
    tokio::fs::create_dir_all(&worker.stage_dir)
        .await
        .map_err(|err| AppError::Spawn(format!("cannot create stage dir: {err}")))?;

    let staged = worker.stage_dir.join(file_name);
    tokio::fs::copy(&worker.binary, &staged)
        .await
        .map_err(|err| {
            AppError::Spawn(format!(
                "cannot stage {} into {}: {err}",
                worker.binary.display(),
                worker.stage_dir.display()
            ))
        })?;
    Ok(staged)
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "ProcessName", alias = "processname")]
    process_name: String,
    #[serde(rename = "Id", alias = "id")]
    id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PsEntry),
    Many(Vec<PsEntry>),
}

/// Parse `Get-Process | Select-Object ProcessName, Id | ConvertTo-Json`.
///
/// PowerShell emits nothing for no match, a bare object for one match,
/// and an array for several.
///
/// # Errors
///
/// Returns [`AppError::Process`] if non-empty output is not one of those
/// shapes.
pub fn parse_powershell_processes(output: &str) -> Result<Vec<ProcessInfo>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: OneOrMany = serde_json::from_str(trimmed)
        .map_err(|err| AppError::Process(format!("unreadable process listing: {err}")))?;
    let entries = match parsed {
        OneOrMany::One(entry) => vec![entry],
        OneOrMany::Many(entries) => entries,
    };
    Ok(entries
        .into_iter()
        .map(|e| ProcessInfo {
            process_name: e.process_name,
            id: e.id,
        })
        .collect())
}

/// Parse `ps -o pid=,comm=` output (one `<pid> <command>` pair per line).
///
/// # Errors
///
/// Returns [`AppError::Process`] if a line does not start with a pid.
pub fn parse_ps_output(output: &str) -> Result<Vec<ProcessInfo>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (pid, comm) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let id = pid
                .parse::<u32>()
                .map_err(|err| AppError::Process(format!("bad ps line {line:?}: {err}")))?;
            let comm = comm.trim();
            let process_name = Path::new(comm)
                .file_name()
                .map_or_else(|| comm.to_owned(), |n| n.to_string_lossy().into_owned());
            Ok(ProcessInfo { process_name, id })
        })
        .collect()
}

/// Linux truncates `comm` to 15 bytes, so a full-length `comm` only needs to
/// be a prefix of the configured name.
fn name_matches(comm: &str, name: &str) -> bool {
    const COMM_LEN: usize = 15;
    comm == name || (comm.len() >= COMM_LEN && name.starts_with(comm))
}

//! Unit tests for the command runner and quoting helpers.

use std::time::Duration;

use worker_bridge::command::{
    escape_powershell, quote_sh, CommandRunner, CommandSpec, ShellRunner,
};
use worker_bridge::AppError;

#[test]
fn powershell_spec_disables_profile() {
    let spec = CommandSpec::powershell("Get-Process");
    assert_eq!(spec.program, "powershell");
    assert_eq!(
        spec.args,
        vec!["-NoProfile", "-NonInteractive", "-Command", "Get-Process"]
    );
}

#[test]
fn sh_spec_uses_dash_c() {
    let spec = CommandSpec::sh("echo hi");
    assert_eq!(spec.program, "sh");
    assert_eq!(spec.args, vec!["-c", "echo hi"]);
}

#[test]
fn escape_powershell_prefixes_backtick() {
    assert_eq!(escape_powershell(r#"C:\a "b" `c`"#), r#"C:\a `"b`" ``c``"#);
}

#[test]
fn quote_sh_wraps_and_escapes_single_quotes() {
    assert_eq!(quote_sh("/opt/my worker"), "'/opt/my worker'");
    assert_eq!(quote_sh("it's"), r"'it'\''s'");
}

#[cfg(unix)]
#[tokio::test]
async fn shell_runner_captures_stdout() {
    let runner = ShellRunner::new(Duration::from_secs(5));
    let out = runner
        .run(&CommandSpec::sh("echo hello"))
        .await
        .expect("runs");
    assert!(out.success);
    assert_eq!(out.output, "hello");
}

#[cfg(unix)]
#[tokio::test]
async fn shell_runner_appends_stderr_on_failure() {
    let runner = ShellRunner::new(Duration::from_secs(5));
    let out = runner
        .run(&CommandSpec::sh("echo out; echo err >&2; exit 3"))
        .await
        .expect("runs");
    assert!(!out.success);
    assert_eq!(out.output, "out\nerr");
}

#[cfg(unix)]
#[tokio::test]
async fn shell_runner_times_out() {
    let runner = ShellRunner::new(Duration::from_millis(100));
    let result = runner.run(&CommandSpec::sh("sleep 5")).await;
    assert!(matches!(result, Err(AppError::Command(_))));
}

#[tokio::test]
async fn shell_runner_reports_missing_program() {
    let runner = ShellRunner::new(Duration::from_secs(5));
    let result = runner
        .run(&CommandSpec::new("definitely-not-a-real-program-4f1c"))
        .await;
    assert!(matches!(result, Err(AppError::Command(_))));
}

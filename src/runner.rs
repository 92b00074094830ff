// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Every OS command the installer issues goes through [`CommandRunner`]. It is
//! the single place where a failed command is classified as fatal or
//! tolerated, according to the [`FailurePolicy`] chosen at each call site.
//!
//! # Run Log
//!
//! Captured output is kept in a small [`RunLog`] for diagnostic reports. The
//! stdout buffer of the current command is rotated into a "previous" buffer
//! before each new invocation, so a report always shows the output of the
//! last two commands. Stderr accumulates across commands. All buffers keep
//! only their most recent [`CAPTURE_LIMIT`] bytes.

use crate::console::{Console, ConsoleError, Interrupt};

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, instrument, warn};

/// Maximum amount of bytes retained per capture buffer.
pub const CAPTURE_LIMIT: usize = 64 * 1024;

/// How to treat a command that exits unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Failure is fatal and propagates to the caller.
    Strict,

    /// Failure is recorded for reporting, and the caller continues.
    Tolerant,

    /// Operator decides whether the failure is tolerated or fatal.
    Interactive,
}

/// External command description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    capture: bool,
}

impl Cmd {
    /// Construct new command for `program` with capture enabled.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            capture: true,
        }
    }

    /// Construct new command from a program followed by its arguments.
    ///
    /// Returns `None` when `line` is empty.
    pub fn from_argv(line: impl IntoIterator<Item = impl Into<OsString>>) -> Option<Self> {
        let mut line = line.into_iter().map(Into::into);
        let program = line.next()?;
        Some(Self::new(program).args(line))
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run command from within `path`.
    pub fn current_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(path.into());
        self
    }

    /// Let the command write straight to the terminal instead of capturing.
    pub fn inherit_output(mut self) -> Self {
        self.capture = false;
        self
    }

    /// Working directory of command if any.
    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }
}

impl Display for Cmd {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.program.to_string_lossy().as_ref())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// Outcome of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: String,
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Rolling capture buffers of recent command output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunLog {
    stdout: String,
    previous_stdout: String,
    stderr: String,
}

impl RunLog {
    /// Stdout of the current (most recent) command.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Stdout of the command before the current one.
    pub fn previous_stdout(&self) -> &str {
        &self.previous_stdout
    }

    /// Accumulated stderr of all captured commands.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    fn rotate(&mut self) {
        self.previous_stdout = std::mem::take(&mut self.stdout);
    }

    fn append_stdout(&mut self, text: &str) {
        self.stdout.push_str(text);
        keep_tail(&mut self.stdout, CAPTURE_LIMIT);
    }

    fn append_stderr(&mut self, text: &str) {
        self.stderr.push_str(text);
        keep_tail(&mut self.stderr, CAPTURE_LIMIT);
    }
}

/// Runs external commands under a [`FailurePolicy`].
#[derive(Debug, Default)]
pub struct CommandRunner {
    log: RunLog,
    tolerated: Vec<CommandOutcome>,
    invocations: usize,
    interrupt: Interrupt,
}

impl CommandRunner {
    /// Construct new command runner watching `interrupt`.
    pub fn new(interrupt: Interrupt) -> Self {
        Self {
            interrupt,
            ..Self::default()
        }
    }

    /// Capture buffers of recent commands.
    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Number of commands issued so far.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    /// Take every tolerated failure recorded since the last drain.
    pub fn drain_tolerated(&mut self) -> Vec<CommandOutcome> {
        std::mem::take(&mut self.tolerated)
    }

    /// Run command under failure policy.
    ///
    /// A program that cannot be spawned counts as a failed command and is
    /// subject to the same policy.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError::Interrupted`] if the operator interrupted the
    ///   installer while the command ran, regardless of policy.
    /// - Return [`RunnerError::CommandFailed`] if the command failed under
    ///   [`FailurePolicy::Strict`], or the operator refused to continue under
    ///   [`FailurePolicy::Interactive`].
    /// - Return [`RunnerError::Console`] if the operator cannot be asked.
    #[instrument(skip(self, cmd, console), fields(command = %cmd), level = "debug")]
    pub fn run(
        &mut self,
        cmd: &Cmd,
        policy: FailurePolicy,
        console: &mut impl Console,
    ) -> Result<CommandOutcome> {
        self.log.rotate();
        self.invocations += 1;
        let outcome = self.execute(cmd);

        if self.interrupt.is_raised() {
            return Err(RunnerError::Interrupted {
                command: outcome.command,
            });
        }

        if outcome.succeeded {
            return Ok(outcome);
        }

        match policy {
            FailurePolicy::Strict => Err(RunnerError::failed(outcome)),
            FailurePolicy::Tolerant => {
                warn!("command {:?} failed, continuing", outcome.command);
                self.tolerated.push(outcome.clone());
                Ok(outcome)
            }
            FailurePolicy::Interactive => {
                warn!("command {:?} failed", outcome.command);
                let message = format!("command `{}` failed, continue anyway?", outcome.command);
                if console.confirm(&message, false)? {
                    self.tolerated.push(outcome.clone());
                    Ok(outcome)
                } else {
                    Err(RunnerError::failed(outcome))
                }
            }
        }
    }

    fn execute(&mut self, cmd: &Cmd) -> CommandOutcome {
        let command_line = cmd.to_string();
        debug!("run {command_line:?}");

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.current_dir {
            command.current_dir(dir);
        }

        if !cmd.capture {
            let status = command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status();
            return match status {
                Ok(status) => CommandOutcome {
                    command: command_line,
                    succeeded: status.success(),
                    stdout: String::new(),
                    stderr: String::new(),
                },
                Err(error) => self.spawn_failure(command_line, error),
            };
        }

        match command.stdin(Stdio::null()).output() {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
                let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
                if !stdout.is_empty() {
                    debug!("stdout: {}", chomp(&stdout));
                }
                if !stderr.is_empty() {
                    debug!("stderr: {}", chomp(&stderr));
                }

                self.log.append_stdout(&stdout);
                self.log.append_stderr(&stderr);

                CommandOutcome {
                    command: command_line,
                    succeeded: output.status.success(),
                    stdout,
                    stderr,
                }
            }
            Err(error) => self.spawn_failure(command_line, error),
        }
    }

    fn spawn_failure(&mut self, command: String, error: std::io::Error) -> CommandOutcome {
        let stderr = format!("failed to spawn {command:?}: {error}\n");
        self.log.append_stderr(&stderr);

        CommandOutcome {
            command,
            succeeded: false,
            stdout: String::new(),
            stderr,
        }
    }
}

fn chomp(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or(text.strip_suffix('\n'))
        .unwrap_or(text)
}

fn keep_tail(buffer: &mut String, limit: usize) {
    if buffer.len() <= limit {
        return;
    }

    let mut cut = buffer.len() - limit;
    while !buffer.is_char_boundary(cut) {
        cut += 1;
    }
    buffer.drain(..cut);
}

/// Command runner error types.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Command failed and was not tolerated.
    #[error("command {command:?} failed:\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Operator interrupted the installer.
    #[error("command {command:?} interrupted by operator")]
    Interrupted { command: String },

    /// Operator could not be asked whether to continue.
    #[error(transparent)]
    Console(#[from] ConsoleError),
}

impl RunnerError {
    fn failed(outcome: CommandOutcome) -> Self {
        Self::CommandFailed {
            command: outcome.command,
            stderr: chomp(&outcome.stderr).to_string(),
        }
    }

    /// Check if error stems from operator interruption.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Interrupted { .. } | Self::Console(ConsoleError::Interrupted)
        )
    }
}

/// Friendly result alias :3
pub type Result<T, E = RunnerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{Answer, ScriptedConsole};
    use pretty_assertions::assert_eq;

    fn sh(script: &str) -> Cmd {
        Cmd::new("sh").args(["-c", script])
    }

    #[test]
    fn run_captures_output() -> anyhow::Result<()> {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::default();

        let outcome = runner.run(
            &sh("echo hello; echo oops >&2"),
            FailurePolicy::Strict,
            &mut console,
        )?;

        assert!(outcome.succeeded);
        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.stderr, "oops\n");
        assert_eq!(runner.log().stdout(), "hello\n");
        assert_eq!(runner.log().stderr(), "oops\n");
        assert_eq!(runner.invocations(), 1);

        Ok(())
    }

    #[test]
    fn run_rotates_stdout_between_commands() -> anyhow::Result<()> {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::default();

        runner.run(&sh("echo first"), FailurePolicy::Strict, &mut console)?;
        runner.run(&sh("echo second; echo e2 >&2"), FailurePolicy::Strict, &mut console)?;
        assert_eq!(runner.log().stdout(), "second\n");
        assert_eq!(runner.log().previous_stdout(), "first\n");

        runner.run(&sh("echo third"), FailurePolicy::Strict, &mut console)?;
        assert_eq!(runner.log().stdout(), "third\n");
        assert_eq!(runner.log().previous_stdout(), "second\n");
        assert_eq!(runner.log().stderr(), "e2\n");

        Ok(())
    }

    #[test]
    fn run_uses_working_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::default();

        runner.run(
            &sh("touch marker").current_dir(dir.path()),
            FailurePolicy::Strict,
            &mut console,
        )?;
        assert!(dir.path().join("marker").exists());

        Ok(())
    }

    #[test]
    fn strict_failure_propagates() {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::default();

        let result = runner.run(&sh("echo bad >&2; exit 3"), FailurePolicy::Strict, &mut console);
        match result {
            Err(RunnerError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "bad"),
            other => panic!("expected command failure, got {other:?}"),
        }
        assert!(runner.drain_tolerated().is_empty());
    }

    #[test]
    fn tolerant_failure_is_recorded() -> anyhow::Result<()> {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::default();

        let outcome = runner.run(&Cmd::new("false"), FailurePolicy::Tolerant, &mut console)?;
        assert!(!outcome.succeeded);

        let tolerated = runner.drain_tolerated();
        assert_eq!(tolerated, vec![outcome]);
        assert!(runner.drain_tolerated().is_empty());

        Ok(())
    }

    #[test]
    fn interactive_failure_continues_on_yes() -> anyhow::Result<()> {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::new([Answer::Confirm(true)]);

        let outcome = runner.run(&Cmd::new("false"), FailurePolicy::Interactive, &mut console)?;
        assert!(!outcome.succeeded);
        assert_eq!(runner.drain_tolerated().len(), 1);
        assert_eq!(console.prompts().len(), 1);

        Ok(())
    }

    #[test]
    fn interactive_failure_propagates_on_no() {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::new([Answer::Confirm(false)]);

        let result = runner.run(&Cmd::new("false"), FailurePolicy::Interactive, &mut console);
        assert!(matches!(result, Err(RunnerError::CommandFailed { .. })));
        assert!(runner.drain_tolerated().is_empty());
    }

    #[test]
    fn interactive_success_never_asks() -> anyhow::Result<()> {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::default();

        runner.run(&Cmd::new("true"), FailurePolicy::Interactive, &mut console)?;
        assert!(console.prompts().is_empty());

        Ok(())
    }

    #[test]
    fn missing_program_is_a_failed_outcome() -> anyhow::Result<()> {
        let mut runner = CommandRunner::default();
        let mut console = ScriptedConsole::default();

        let outcome = runner.run(
            &Cmd::new("zmdeploy-surely-missing-program"),
            FailurePolicy::Tolerant,
            &mut console,
        )?;
        assert!(!outcome.succeeded);
        assert!(outcome.stderr.contains("failed to spawn"));
        assert!(runner.log().stderr().contains("failed to spawn"));

        Ok(())
    }

    #[test]
    fn interrupt_overrides_policy() {
        let interrupt = Interrupt::new();
        let mut runner = CommandRunner::new(interrupt.clone());
        let mut console = ScriptedConsole::default();
        interrupt.raise();

        let result = runner.run(&Cmd::new("true"), FailurePolicy::Tolerant, &mut console);
        assert!(matches!(&result, Err(error) if error.is_interrupted()));
    }

    #[test]
    fn capture_buffers_keep_recent_tail() {
        let mut log = RunLog::default();
        log.append_stderr(&"a".repeat(CAPTURE_LIMIT));
        log.append_stderr("tail");
        assert_eq!(log.stderr().len(), CAPTURE_LIMIT);
        assert!(log.stderr().ends_with("tail"));
    }

    #[test]
    fn cmd_display_and_argv() {
        let cmd = Cmd::from_argv(["service", "apache2", "restart"]).unwrap();
        assert_eq!(cmd.to_string(), "service apache2 restart");
        assert!(Cmd::from_argv(Vec::<String>::new()).is_none());
    }
}

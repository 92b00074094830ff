// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Install session context.
//!
//! A [`Session`] bundles everything the flows share for the duration of one
//! run: settings, the command runner with its capture buffers, the operator
//! console, the reporter, and the interrupt flag. It is created once at
//! process start and handed down to each flow by mutable reference.

use crate::{
    config::Settings,
    console::{Console, Interrupt},
    report::{ReportSink, Reporter},
    runner::{Cmd, CommandOutcome, CommandRunner, FailurePolicy, RunnerError},
};

/// Shared context of one installer run.
#[derive(Debug)]
pub struct Session<C, S> {
    pub settings: Settings,
    pub runner: CommandRunner,
    pub console: C,
    pub reporter: Reporter<S>,
    pub interrupt: Interrupt,

    /// Operator supplies certificates, no ACME client involved.
    pub own_certificates: bool,
}

impl<C, S> Session<C, S>
where
    C: Console,
    S: ReportSink,
{
    /// Construct new session.
    pub fn new(
        settings: Settings,
        console: C,
        reporter: Reporter<S>,
        interrupt: Interrupt,
        own_certificates: bool,
    ) -> Self {
        Self {
            settings,
            runner: CommandRunner::new(interrupt.clone()),
            console,
            reporter,
            interrupt,
            own_certificates,
        }
    }

    /// Run command under failure policy, reporting tolerated failures.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError`] as described by [`CommandRunner::run`].
    pub async fn run(
        &mut self,
        cmd: &Cmd,
        policy: FailurePolicy,
    ) -> Result<CommandOutcome, RunnerError> {
        let outcome = self.runner.run(cmd, policy, &mut self.console)?;
        for failure in self.runner.drain_tolerated() {
            self.reporter.tolerated(&failure, self.runner.log()).await;
        }

        Ok(outcome)
    }

    /// Run a command line taken from settings.
    ///
    /// Empty command lines are skipped and count as success.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError`] as described by [`CommandRunner::run`].
    pub async fn run_argv(
        &mut self,
        argv: &[String],
        policy: FailurePolicy,
    ) -> Result<Option<CommandOutcome>, RunnerError> {
        match Cmd::from_argv(argv) {
            Some(cmd) => Ok(Some(self.run(&cmd, policy).await?)),
            None => Ok(None),
        }
    }

    /// Fail with [`RunnerError::Interrupted`] if the operator pressed Ctrl-C.
    pub fn check_interrupt(&self, step: &str) -> Result<(), RunnerError> {
        if self.interrupt.is_raised() {
            return Err(RunnerError::Interrupted {
                command: step.to_string(),
            });
        }

        Ok(())
    }
}

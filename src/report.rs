// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Outcome reporting.
//!
//! After every install, successful or not, zmdeploy sends a short report to
//! a collection endpoint: what happened, on which distribution, for which
//! mirrors, and the tail of the captured command output. Reporting is best
//! effort all the way down. It never fails, so it never masks the error that
//! triggered it.

use crate::{config::ReportSettings, runner::{CommandOutcome, RunLog}, state::InstallState};

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Kind of report, which also selects the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Success,
    Error,
}

/// Diagnostic payload, sent as a URL encoded form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub kind: ReportKind,
    pub message: String,
    pub version: String,
    pub os: String,
    pub targets: String,
    pub email: String,
    pub stdout: String,
    pub previous_stdout: String,
    pub stderr: String,
}

/// Destination of reports.
#[allow(async_fn_in_trait)]
pub trait ReportSink {
    /// Deliver report, swallowing any failure.
    async fn deliver(&mut self, report: &Report);
}

/// Sink posting reports to the configured HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpSink {
    success_url: String,
    error_url: String,
    timeout: Duration,
}

impl HttpSink {
    /// Construct new HTTP sink from report settings.
    pub fn new(settings: &ReportSettings) -> Self {
        Self {
            success_url: settings.success_url.clone(),
            error_url: settings.error_url.clone(),
            timeout: Duration::from_secs(15),
        }
    }

    async fn post(&self, url: &str, report: &Report, relaxed: bool) -> reqwest::Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(relaxed)
            .build()?;
        client
            .post(url)
            .form(report)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

impl ReportSink for HttpSink {
    #[instrument(skip(self, report), fields(kind = ?report.kind), level = "debug")]
    async fn deliver(&mut self, report: &Report) {
        let url = match report.kind {
            ReportKind::Success => self.success_url.as_str(),
            ReportKind::Error => self.error_url.as_str(),
        };

        let Err(error) = self.post(url, report, false).await else {
            debug!("report delivered to {url}");
            return;
        };

        debug!("report delivery failed ({error}), retrying without certificate verification");
        match self.post(url, report, true).await {
            Ok(()) => debug!("report delivered to {url}"),
            Err(error) => warn!("unable to send report to {url}: {error}"),
        }
    }
}

/// Keeps every report in memory.
impl ReportSink for Vec<Report> {
    async fn deliver(&mut self, report: &Report) {
        self.push(report.clone());
    }
}

/// Composes reports from the current install context.
#[derive(Debug, Clone)]
pub struct Reporter<S> {
    sink: Option<S>,
    os: String,
    targets: String,
    email: String,
}

impl<S> Reporter<S>
where
    S: ReportSink,
{
    /// Construct new reporter delivering to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink: Some(sink),
            os: String::new(),
            targets: String::new(),
            email: String::new(),
        }
    }

    /// Construct new reporter that discards everything.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            os: String::new(),
            targets: String::new(),
            email: String::new(),
        }
    }

    /// Sink of reporter if enabled.
    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Record distribution identification of host.
    pub fn set_os(&mut self, os: impl Into<String>) {
        self.os = os.into();
    }

    /// Record selected targets and contact email.
    pub fn set_selection(&mut self, state: &InstallState) {
        self.targets = state.targets.join(",");
        self.email = state.contact_email.clone();
    }

    /// Compose report of `kind` with captured output of `log`.
    pub fn compose(&self, kind: ReportKind, message: impl Into<String>, log: &RunLog) -> Report {
        Report {
            kind,
            message: message.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            os: self.os.clone(),
            targets: self.targets.clone(),
            email: self.email.clone(),
            stdout: log.stdout().into(),
            previous_stdout: log.previous_stdout().into(),
            stderr: log.stderr().into(),
        }
    }

    /// Report successful outcome.
    pub async fn success(&mut self, message: impl Into<String>, log: &RunLog) {
        let report = self.compose(ReportKind::Success, message, log);
        self.send(report).await;
    }

    /// Report fatal error.
    pub async fn error(&mut self, message: impl Into<String>, log: &RunLog) {
        let report = self.compose(ReportKind::Error, message, log);
        self.send(report).await;
    }

    /// Report command failure that was tolerated.
    pub async fn tolerated(&mut self, outcome: &CommandOutcome, log: &RunLog) {
        let mut report = self.compose(
            ReportKind::Error,
            format!("tolerated failure of {:?}", outcome.command),
            log,
        );
        report.stdout = outcome.stdout.clone();
        report.stderr = outcome.stderr.clone();
        self.send(report).await;
    }

    async fn send(&mut self, report: Report) {
        match self.sink.as_mut() {
            Some(sink) => sink.deliver(&report).await,
            None => debug!("reporting disabled, dropping {:?} report", report.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TargetSettings;
    use pretty_assertions::assert_eq;

    fn selection() -> InstallState {
        let mut state = InstallState {
            contact_email: "me@example.com".into(),
            ..InstallState::default()
        };
        for (name, domain) in [("google", "g.example.com"), ("twitterPC", "t.example.com")] {
            state.insert(
                name,
                TargetSettings {
                    domain: domain.into(),
                    certificate: None,
                },
            );
        }
        state
    }

    #[tokio::test]
    async fn reports_carry_install_context() {
        let mut reporter = Reporter::new(Vec::new());
        reporter.set_os("Ubuntu 16.04.7 LTS");
        reporter.set_selection(&selection());

        reporter.error("certificate unavailable", &RunLog::default()).await;
        let sent = reporter.sink().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ReportKind::Error);
        assert_eq!(sent[0].message, "certificate unavailable");
        assert_eq!(sent[0].os, "Ubuntu 16.04.7 LTS");
        assert_eq!(sent[0].targets, "google,twitterPC");
        assert_eq!(sent[0].email, "me@example.com");
        assert_eq!(sent[0].version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn tolerated_report_uses_command_output() {
        let mut reporter = Reporter::new(Vec::new());
        let outcome = CommandOutcome {
            command: "apt-get update".into(),
            succeeded: false,
            stdout: "Reading package lists...".into(),
            stderr: "E: network unreachable".into(),
        };

        reporter.tolerated(&outcome, &RunLog::default()).await;
        let sent = &reporter.sink().unwrap()[0];
        assert_eq!(sent.kind, ReportKind::Error);
        assert!(sent.message.contains("apt-get update"));
        assert_eq!(sent.stderr, "E: network unreachable");
    }

    #[tokio::test]
    async fn disabled_reporter_drops_reports() {
        let mut reporter = Reporter::<Vec<Report>>::disabled();
        reporter.success("done", &RunLog::default()).await;
        assert!(reporter.sink().is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_swallowed() {
        let mut sink = HttpSink::new(&ReportSettings {
            enabled: true,
            success_url: "http://127.0.0.1:9/success".into(),
            error_url: "http://127.0.0.1:9/error".into(),
        });
        sink.timeout = Duration::from_millis(200);

        let report = Reporter::new(Vec::new()).compose(
            ReportKind::Success,
            "done",
            &RunLog::default(),
        );
        sink.deliver(&report).await;
    }
}

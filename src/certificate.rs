// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! TLS certificate acquisition.
//!
//! Certificates are obtained through an external ACME client in standalone
//! mode, one domain at a time. Freshly created DNS records often take a while
//! to propagate, so a failed attempt is retried after a wait that grows with
//! every attempt. Once the attempt limit is reached the operator decides
//! whether to keep trying or give up on the whole install.

use crate::{
    catalog::CertificateBundle,
    console::{Console, ConsoleError},
    report::ReportSink,
    runner::{Cmd, FailurePolicy, RunnerError},
    session::Session,
    state::InstallState,
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Retry bookkeeping of one domain.
///
/// # Invariant
///
/// - `wait_seconds` strictly increases with every failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub attempt_count: u32,
    pub attempt_limit: u32,
    pub wait_seconds: u64,
    base_wait: u64,
}

impl RetryState {
    /// Construct new retry state.
    pub fn new(attempt_limit: u32, base_wait: u64) -> Self {
        Self {
            attempt_count: 0,
            attempt_limit,
            wait_seconds: base_wait,
            base_wait,
        }
    }

    /// Record failed attempt, returning whether the operator must be asked.
    pub fn record_failure(&mut self) -> bool {
        self.attempt_count += 1;
        self.wait_seconds = self.base_wait + u64::from(self.attempt_count);
        self.attempt_count >= self.attempt_limit
    }

    /// Grant `attempts` more attempts before asking again.
    pub fn extend(&mut self, attempts: u32) {
        self.attempt_limit = self.attempt_count + attempts.max(1);
    }
}

/// Path of the certificate the ACME client stores for `domain`.
pub fn certificate_path(root: impl AsRef<Path>, domain: &str) -> PathBuf {
    CertificateBundle::acme(root, domain).certificate
}

/// Obtain certificates for every selected target that needs one.
///
/// The web server is stopped while the ACME client runs, because the client
/// binds port 80 itself. It is started again afterwards, whatever the
/// outcome.
///
/// # Errors
///
/// - Return [`CertificateError::Unavailable`] if the operator gave up on a
///   domain. Remaining domains are not attempted.
/// - Return [`CertificateError::Runner`] if the installer was interrupted.
#[instrument(skip(session, state), level = "debug")]
pub async fn acquire_all<C, S>(session: &mut Session<C, S>, state: &InstallState) -> Result<()>
where
    C: Console,
    S: ReportSink,
{
    let domains = state
        .selected()
        .filter(|(_, settings)| settings.certificate.is_none())
        .map(|(_, settings)| settings.domain.clone())
        .collect::<Vec<_>>();
    if domains.is_empty() {
        return Ok(());
    }

    let stop = session.settings.server.stop.clone();
    session.run_argv(&stop, FailurePolicy::Tolerant).await?;

    let mut result = Ok(());
    for domain in &domains {
        result = acquire(session, domain, &state.contact_email).await;
        if result.is_err() {
            break;
        }
    }

    let start = session.settings.server.start.clone();
    session.run_argv(&start, FailurePolicy::Tolerant).await?;

    result
}

/// Obtain certificate of one domain.
///
/// An existing certificate is kept as is. Success requires both a zero exit
/// status of the client and the certificate file on disk.
///
/// # Errors
///
/// - Return [`CertificateError::Unavailable`] if the operator refused to
///   keep trying.
/// - Return [`CertificateError::Runner`] if the installer was interrupted.
/// - Return [`CertificateError::Console`] if the operator cannot be asked.
#[instrument(skip(session, email), level = "debug")]
pub async fn acquire<C, S>(session: &mut Session<C, S>, domain: &str, email: &str) -> Result<()>
where
    C: Console,
    S: ReportSink,
{
    let settings = session.settings.certificate.clone();
    let certificate = certificate_path(&session.settings.paths.certificate_root, domain);
    if certificate.is_file() {
        info!("certificate of {domain} already exists, skipping");
        return Ok(());
    }

    let client = Cmd::from_argv(settings.client.split_whitespace())
        .ok_or(CertificateError::NoClient)?
        .args(["certonly", "--agree-tos", "-t", "-m", email, "--standalone", "-d", domain]);

    let mut retry = RetryState::new(settings.attempt_limit, settings.base_wait);
    loop {
        info!("obtaining certificate of {domain} (attempt {})", retry.attempt_count + 1);
        let outcome = session.run(&client, FailurePolicy::Tolerant).await?;
        if outcome.succeeded && certificate.is_file() {
            info!("obtained certificate of {domain}");
            return Ok(());
        }

        warn!("failed to obtain certificate of {domain}");
        if retry.record_failure() {
            let message = format!(
                "Obtaining certificate of {domain} failed {} times. Make sure its DNS record \
                 points at this host. Keep trying?",
                retry.attempt_count
            );
            if !session.console.confirm(&message, true)? {
                return Err(CertificateError::Unavailable(domain.to_string()));
            }
            retry.extend(settings.attempt_limit);
        }

        session
            .console
            .countdown(&format!("retrying {domain} in"), retry.wait_seconds)
            .await?;
    }
}

/// Certificate acquisition error types.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    /// Operator gave up on obtaining a certificate.
    #[error("unable to obtain certificate of {0}")]
    Unavailable(String),

    /// No ACME client command is configured.
    #[error("no ACME client configured")]
    NoClient,

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

/// Friendly result alias :3
pub type Result<T, E = CertificateError> = std::result::Result<T, E>;

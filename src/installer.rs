// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Top-level install flow.
//!
//! [`Installer`] drives one run from start to finish: resume or start fresh,
//! selection, packages, certificates, deployment, and the final report. It
//! is also the one place that decides what a failure means for the process,
//! through [`InstallError::exit_code`].

use crate::{
    catalog::Catalog,
    certificate::{acquire_all, CertificateError},
    console::{Console, ConsoleError},
    deploy::{deploy, upgrade, DeployError},
    report::ReportSink,
    runner::{FailurePolicy, RunnerError},
    selection::{choose_targets, collect_contact, RunMode, Selection, SelectionError},
    session::Session,
    state::{InstallState, StateError, StateStore},
    system::{install_packages, SystemError},
    template::TemplateSource,
};

use tracing::{info, instrument, warn};

/// Exit code of an interrupted run.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Installer driving a [`Session`] through the whole install.
#[derive(Debug)]
pub struct Installer<C, S, T> {
    session: Session<C, S>,
    store: StateStore,
    templates: T,
    upgrade_only: bool,
}

impl<C, S, T> Installer<C, S, T>
where
    C: Console,
    S: ReportSink,
    T: TemplateSource,
{
    /// Construct new installer.
    pub fn new(
        session: Session<C, S>,
        store: StateStore,
        templates: T,
        upgrade_only: bool,
    ) -> Self {
        Self {
            session,
            store,
            templates,
            upgrade_only,
        }
    }

    pub fn session(&self) -> &Session<C, S> {
        &self.session
    }

    pub fn into_session(self) -> Session<C, S> {
        self.session
    }

    /// Run the install, reporting any fatal error.
    ///
    /// Errors the operator caused on purpose, declining or selecting nothing,
    /// are not reported.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError`] of whatever step failed.
    pub async fn run(&mut self) -> Result<()> {
        let result = if self.upgrade_only {
            self.upgrade_only().await
        } else {
            self.execute().await
        };

        if let Err(error) = &result {
            if error.is_reportable() {
                let message = report_message(error);
                let log = self.session.runner.log().clone();
                self.session.reporter.error(message, &log).await;
            }
        }

        result
    }

    #[instrument(skip(self), level = "debug")]
    async fn execute(&mut self) -> Result<()> {
        let catalog = Catalog::detect(&self.session.settings.paths.install_root);
        let (mode, state) = self.resume_or_start()?;

        let mut selection = Selection::new(catalog, self.store.clone(), mode, state);
        let own_certificates = self.session.own_certificates;
        choose_targets(&mut selection, &mut self.session.console, own_certificates)?;
        if selection.state().targets.is_empty() {
            return Err(InstallError::NothingSelected);
        }

        collect_contact(&mut selection, &mut self.session.console, own_certificates)?;
        self.session.reporter.set_selection(selection.state());
        self.confirm(&selection)?;

        let state = selection.into_state();
        install_packages(&mut self.session).await?;
        acquire_all(&mut self.session, &state).await?;
        deploy(&mut self.session, &state, mode, &self.templates).await?;

        let restart = self.session.settings.server.restart.clone();
        self.session.run_argv(&restart, FailurePolicy::Tolerant).await?;
        self.store.clear()?;

        for (name, settings) in state.selected() {
            info!("{name} is ready at https://{}", settings.domain);
        }
        let log = self.session.runner.log().clone();
        self.session
            .reporter
            .success(format!("installed {} mirrors", state.targets.len()), &log)
            .await;

        Ok(())
    }

    fn resume_or_start(&mut self) -> Result<(RunMode, InstallState)> {
        let saved = match self.store.load() {
            Ok(Some(saved)) => saved,
            Ok(None) => return Ok((RunMode::FirstRun, InstallState::default())),
            Err(error @ StateError::Decode { .. }) => {
                warn!("{error}, starting over");
                self.store.clear()?;
                return Ok((RunMode::FirstRun, InstallState::default()));
            }
            Err(error) => return Err(error.into()),
        };

        let message = format!(
            "Found an unfinished install of {}. Resume it?",
            saved.targets.join(", ")
        );
        if self.session.console.confirm(&message, true)? {
            return Ok((RunMode::Resume, saved));
        }

        self.store.clear()?;
        Ok((RunMode::FirstRun, InstallState::default()))
    }

    fn confirm(&mut self, selection: &Selection) -> Result<()> {
        for line in selection.summary().lines() {
            info!("{line}");
        }

        if !self.session.console.confirm("Start installing?", true)? {
            return Err(InstallError::Declined);
        }

        Ok(())
    }

    /// Upgrade installed mirrors in place, then report how many succeeded.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Deploy`] if the installer was interrupted.
    /// - Return [`InstallError::Runner`] if the web server restart was
    ///   interrupted.
    #[instrument(skip(self), level = "debug")]
    pub async fn upgrade_only(&mut self) -> Result<()> {
        let catalog = Catalog::detect(&self.session.settings.paths.install_root);
        let total = catalog.installed().count();
        if total == 0 {
            warn!("no installed mirrors found");
        }

        let upgraded = upgrade(&mut self.session, &catalog).await?;
        if total > 0 {
            let restart = self.session.settings.server.restart.clone();
            self.session.run_argv(&restart, FailurePolicy::Tolerant).await?;
        }

        info!("upgraded {upgraded} of {total} mirrors");
        let log = self.session.runner.log().clone();
        self.session
            .reporter
            .success(format!("upgrade only: {upgraded} of {total} mirrors upgraded"), &log)
            .await;

        Ok(())
    }
}

fn report_message(error: &InstallError) -> String {
    if error.is_interrupted() {
        return "interrupted by operator".into();
    }

    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(&format!(": {cause}"));
        source = std::error::Error::source(cause);
    }
    message
}

/// Install error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Operator finished selection without picking anything.
    #[error("no mirror selected")]
    NothingSelected,

    /// Operator declined the final confirmation.
    #[error("install declined by operator")]
    Declined,

    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

impl InstallError {
    /// Process exit code for error.
    pub fn exit_code(&self) -> i32 {
        if self.is_interrupted() {
            return EXIT_INTERRUPTED;
        }

        match self {
            Self::System(SystemError::NotDebian) => 1,
            Self::System(SystemError::NotRoot(_)) => 2,
            Self::System(SystemError::ReleaseTooOld(_)) => 7,
            Self::Certificate(CertificateError::Unavailable(_)) => 3,
            Self::NothingSelected => 4,
            Self::Declined => 5,
            _ => 1,
        }
    }

    /// Check if error stems from operator interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Runner(error)
            | Self::Certificate(CertificateError::Runner(error))
            | Self::Deploy(DeployError::Runner(error))
            | Self::System(SystemError::Runner(error)) => error.is_interrupted(),
            Self::Console(error)
            | Self::Certificate(CertificateError::Console(error))
            | Self::Selection(SelectionError::Console(error)) => {
                matches!(error, ConsoleError::Interrupted)
            }
            _ => false,
        }
    }

    /// Check if error is worth a report.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::NothingSelected | Self::Declined)
    }
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::CATALOG,
        config::Settings,
        console::{Answer, Interrupt, ScriptedConsole},
        report::{Report, ReportKind, Reporter},
        state::TargetSettings,
    };
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::{collections::HashMap, path::Path};

    type TestInstaller = Installer<ScriptedConsole, Vec<Report>, HashMap<String, String>>;

    fn installer(root: &Path, answers: Vec<Answer>, upgrade_only: bool) -> TestInstaller {
        let mut settings = Settings::default();
        settings.paths.install_root = root.join("www");
        settings.server.restart = Vec::new();
        let session = Session::new(
            settings,
            ScriptedConsole::new(answers),
            Reporter::new(Vec::new()),
            Interrupt::new(),
            false,
        );
        Installer::new(
            session,
            StateStore::new(root.join("state.json")),
            HashMap::new(),
            upgrade_only,
        )
    }

    fn reports(installer: &TestInstaller) -> Vec<Report> {
        installer.session().reporter.sink().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn upgrade_only_without_installed_mirrors() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut installer = installer(root.path(), Vec::new(), true);

        installer.run().await?;
        let sent = reports(&installer);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ReportKind::Success);
        assert!(sent[0].message.contains("0 of 0"));
        assert_eq!(installer.session().runner.invocations(), 0);
        assert!(installer.session().console.prompts().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn nothing_selected_is_not_reported() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut installer = installer(root.path(), vec![Answer::Select(CATALOG.len())], false);

        let error = installer.run().await.unwrap_err();
        assert!(matches!(error, InstallError::NothingSelected));
        assert_eq!(error.exit_code(), 4);
        assert!(reports(&installer).is_empty());
        assert_eq!(installer.session().runner.invocations(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn declined_confirmation_stops_before_packages() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let answers = vec![
            Answer::Select(0),
            Answer::Text("g.example.com".into()),
            Answer::Select(CATALOG.len()),
            Answer::Text("me@example.com".into()),
            Answer::Confirm(false),
            Answer::Confirm(false),
        ];
        let mut installer = installer(root.path(), answers, false);

        let error = installer.run().await.unwrap_err();
        assert!(matches!(error, InstallError::Declined));
        assert_eq!(error.exit_code(), 5);
        assert!(reports(&installer).is_empty());
        assert_eq!(installer.session().runner.invocations(), 0);

        let saved = StateStore::new(root.path().join("state.json")).load()?;
        assert_eq!(saved.map(|state| state.targets), Some(vec!["google".to_string()]));

        Ok(())
    }

    #[tokio::test]
    async fn declining_resume_clears_saved_state() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::new(root.path().join("state.json"));
        let mut saved = InstallState::default();
        saved.insert(
            "google",
            TargetSettings {
                domain: "g.example.com".into(),
                certificate: None,
            },
        );
        store.save(&saved)?;

        let answers = vec![Answer::Confirm(false), Answer::Select(CATALOG.len())];
        let mut installer = installer(root.path(), answers, false);

        let error = installer.run().await.unwrap_err();
        assert!(matches!(error, InstallError::NothingSelected));
        assert_eq!(store.load()?, None);

        Ok(())
    }

    #[tokio::test]
    async fn resumed_selection_keeps_saved_contact() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::new(root.path().join("state.json"));
        let mut saved = InstallState {
            contact_email: "me@example.com".into(),
            ..InstallState::default()
        };
        saved.insert(
            "google",
            TargetSettings {
                domain: "g.example.com".into(),
                certificate: None,
            },
        );
        store.save(&saved)?;

        let answers = vec![
            Answer::Confirm(true),
            Answer::Select(CATALOG.len()),
            Answer::Confirm(false),
        ];
        let mut installer = installer(root.path(), answers, false);

        let error = installer.run().await.unwrap_err();
        assert!(matches!(error, InstallError::Declined));

        let console = &installer.session().console;
        assert_eq!(
            console.prompts(),
            [
                "Found an unfinished install of google. Resume it?",
                "Select mirrors to deploy",
                "Start installing?",
            ]
        );
        assert!(console.menus()[0]
            .iter()
            .any(|line| line.contains("[SELECTED] g.example.com")));
        assert_eq!(console.remaining(), 0);
        assert_eq!(store.load()?, Some(saved));

        Ok(())
    }

    #[tokio::test]
    async fn truncated_state_starts_over() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = StateStore::new(root.path().join("state.json"));
        std::fs::write(
            store.path(),
            r#"{"saved_at": "2025-03-01T12:00:00Z", "targets": ["goo"#,
        )?;

        let mut installer = installer(root.path(), vec![Answer::Select(CATALOG.len())], false);

        let error = installer.run().await.unwrap_err();
        assert!(matches!(error, InstallError::NothingSelected));
        assert_eq!(installer.session().console.prompts(), ["Select mirrors to deploy"]);
        assert!(!store.path().exists());

        Ok(())
    }

    #[tokio::test]
    async fn interrupted_upgrade_is_reported() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        std::fs::create_dir_all(root.path().join("www").join("google"))?;
        let mut installer = installer(root.path(), Vec::new(), true);
        installer.session.interrupt.raise();

        let error = installer.run().await.unwrap_err();
        assert!(error.is_interrupted());
        assert_eq!(error.exit_code(), EXIT_INTERRUPTED);

        let sent = reports(&installer);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, ReportKind::Error);
        assert_eq!(sent[0].message, "interrupted by operator");

        Ok(())
    }

    #[test_case(InstallError::System(SystemError::NotDebian), 1; "wrong os family")]
    #[test_case(InstallError::System(SystemError::NotRoot(Some(1000))), 2; "not root")]
    #[test_case(InstallError::Certificate(CertificateError::Unavailable("g.example.com".into())), 3; "certificate unavailable")]
    #[test_case(InstallError::NothingSelected, 4; "nothing selected")]
    #[test_case(InstallError::Declined, 5; "declined")]
    #[test_case(InstallError::System(SystemError::ReleaseTooOld("Debian 7".into())), 7; "release too old")]
    #[test_case(InstallError::Console(ConsoleError::Interrupted), 130; "interrupted prompt")]
    #[test_case(InstallError::Deploy(DeployError::Runner(RunnerError::Interrupted { command: "chown".into() })), 130; "interrupted command")]
    #[test_case(InstallError::Deploy(DeployError::UnknownTarget("myspace".into())), 1; "other failure")]
    #[test]
    fn exit_codes(error: InstallError, code: i32) {
        pretty_assertions::assert_eq!(error.exit_code(), code);
    }
}

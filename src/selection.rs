// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Target selection.
//!
//! The operator picks the mirrors to provision from the [`Catalog`] and
//! assigns each a public domain. Every accepted change is saved to the
//! [`StateStore`] right away, so an interrupted run can be resumed with the
//! exact same decisions.
//!
//! # Run Modes
//!
//! A fresh install runs in [`RunMode::FirstRun`], where anything already
//! deployed on the host is off limits: installed targets cannot be selected
//! again and their domains cannot be reused. A resumed install runs in
//! [`RunMode::Resume`], where leftovers of the interrupted attempt are
//! expected and will be replaced.

use crate::{
    catalog::{entry, Catalog, CertificateBundle},
    console::{Console, ConsoleError},
    state::{InstallState, StateError, StateStore, TargetSettings, Verification},
};

use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Whether the install starts fresh or continues a saved one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    FirstRun,
    Resume,
}

/// Validated, persisted target selection.
#[derive(Debug)]
pub struct Selection {
    state: InstallState,
    store: StateStore,
    catalog: Catalog,
    mode: RunMode,
}

impl Selection {
    /// Construct new selection starting from `state`.
    pub fn new(catalog: Catalog, store: StateStore, mode: RunMode, state: InstallState) -> Self {
        Self {
            state,
            store,
            catalog,
            mode,
        }
    }

    pub fn state(&self) -> &InstallState {
        &self.state
    }

    pub fn into_state(self) -> InstallState {
        self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Check if `domain` may be assigned to target `name`.
    ///
    /// The target being edited is left out of the duplicate check, so
    /// re-selecting a target keeps whatever domain it had available.
    ///
    /// # Errors
    ///
    /// - Return [`SelectionError::InvalidDomain`] if `domain` is not a
    ///   hostname with at least one dot.
    /// - Return [`SelectionError::DuplicateDomain`] if another selected target
    ///   already uses `domain`.
    /// - Return [`SelectionError::InstalledDomain`] if an installed target
    ///   that is not selected serves `domain` during a first run.
    pub fn validate_domain(&self, name: &str, domain: &str) -> Result<()> {
        if !is_hostname(domain) {
            return Err(SelectionError::InvalidDomain(domain.to_string()));
        }

        let duplicate = self
            .state
            .selected()
            .filter(|(other, _)| *other != name)
            .find(|(_, settings)| settings.domain.eq_ignore_ascii_case(domain));
        if let Some((other, _)) = duplicate {
            return Err(SelectionError::DuplicateDomain {
                domain: domain.to_string(),
                target: other.to_string(),
            });
        }

        if self.mode == RunMode::FirstRun {
            let installed = self
                .catalog
                .installed()
                .filter(|target| target.name() != name && !self.state.is_selected(target.name()))
                .find(|target| {
                    target
                        .installed_domain()
                        .is_some_and(|installed| installed.eq_ignore_ascii_case(domain))
                });
            if let Some(target) = installed {
                return Err(SelectionError::InstalledDomain {
                    domain: domain.to_string(),
                    target: target.name().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Check if target `name` may be selected at all.
    ///
    /// # Errors
    ///
    /// - Return [`SelectionError::UnknownTarget`] if `name` is not in the
    ///   catalog.
    /// - Return [`SelectionError::TargetInstalled`] if `name` is already
    ///   deployed during a first run.
    pub fn validate_target(&self, name: &str) -> Result<()> {
        let target = self
            .catalog
            .get(name)
            .ok_or_else(|| SelectionError::UnknownTarget(name.to_string()))?;

        if self.mode == RunMode::FirstRun && target.installed.is_some() {
            return Err(SelectionError::TargetInstalled(name.to_string()));
        }

        Ok(())
    }

    /// Select target `name` served at `domain`, then save.
    ///
    /// # Errors
    ///
    /// - Return any validation error of [`Self::validate_target`] or
    ///   [`Self::validate_domain`].
    /// - Return [`SelectionError::MissingCertificate`] if an operator supplied
    ///   certificate file does not exist.
    /// - Return [`SelectionError::State`] if the selection cannot be saved.
    #[instrument(skip(self, certificate), level = "debug")]
    pub fn select(
        &mut self,
        name: &str,
        domain: &str,
        certificate: Option<CertificateBundle>,
    ) -> Result<()> {
        self.validate_target(name)?;
        let domain = domain.trim();
        self.validate_domain(name, domain)?;

        if let Some(missing) = certificate
            .as_ref()
            .and_then(|bundle| bundle.missing_files().first().map(|path| path.to_path_buf()))
        {
            return Err(SelectionError::MissingCertificate(missing));
        }

        self.state.insert(
            name,
            TargetSettings {
                domain: domain.to_string(),
                certificate,
            },
        );
        self.store.save(&self.state)?;
        info!("selected {name} at {domain}");

        Ok(())
    }

    /// Deselect target `name` then save, returning whether it was selected.
    ///
    /// # Errors
    ///
    /// - Return [`SelectionError::State`] if the selection cannot be saved.
    pub fn deselect(&mut self, name: &str) -> Result<bool> {
        let removed = self.state.remove(name);
        if removed {
            self.store.save(&self.state)?;
            info!("deselected {name}");
        }

        Ok(removed)
    }

    /// Set contact email then save.
    ///
    /// # Errors
    ///
    /// - Return [`SelectionError::InvalidEmail`] if `email` lacks an `@`.
    /// - Return [`SelectionError::State`] if the selection cannot be saved.
    pub fn set_contact_email(&mut self, email: &str) -> Result<()> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(SelectionError::InvalidEmail(email.to_string()));
        }

        self.state.contact_email = email.to_string();
        self.store.save(&self.state)?;

        Ok(())
    }

    /// Set or unset visitor verification then save.
    ///
    /// # Errors
    ///
    /// - Return [`SelectionError::State`] if the selection cannot be saved.
    pub fn set_verification(&mut self, verification: Option<Verification>) -> Result<()> {
        self.state.verification = verification;
        self.store.save(&self.state)?;

        Ok(())
    }

    /// Describe selection for the final confirmation.
    pub fn summary(&self) -> String {
        let mut summary = String::from("mirrors to deploy:\n");
        for (name, settings) in self.state.selected() {
            let label = entry(name).map(|entry| entry.label).unwrap_or(name);
            summary.push_str(&format!("  {label:<48} https://{}\n", settings.domain));
        }

        if !self.state.contact_email.is_empty() {
            summary.push_str(&format!("contact email: {}\n", self.state.contact_email));
        }

        if let Some(verification) = &self.state.verification {
            summary.push_str(&format!(
                "visitor verification: {:?} (answer {:?})\n",
                verification.question, verification.answer
            ));
        }

        summary
    }

    fn menu(&self) -> Vec<String> {
        let mut options = self
            .catalog
            .iter()
            .map(|target| {
                let mut line = format!("{:<14} {}", target.name(), target.entry.label);
                if let Some(domain) = self.state.domain_of(target.name()) {
                    line.push_str(&format!("  [SELECTED] {domain}"));
                }
                if target.installed.is_some() {
                    line.push_str("  [INSTALLED]");
                }
                line
            })
            .collect::<Vec<_>>();
        options.push("Done".into());
        options
    }
}

/// Let the operator pick targets until they choose "Done".
///
/// Picking a selected target deselects it. Rejected answers are logged and
/// asked again.
///
/// # Errors
///
/// - Return [`SelectionError::Console`] if the operator cannot be asked.
/// - Return [`SelectionError::State`] if the selection cannot be saved.
#[instrument(skip(selection, console), level = "debug")]
pub fn choose_targets(
    selection: &mut Selection,
    console: &mut impl Console,
    own_certificates: bool,
) -> Result<()> {
    loop {
        let options = selection.menu();
        let choice = console.select("Select mirrors to deploy", &options)?;
        let Some(target) = selection.catalog.iter().nth(choice) else {
            debug!("selection finished");
            return Ok(());
        };
        let name = target.name();
        let default = target.installed_domain().map(ToString::to_string);

        if selection.state.is_selected(name) {
            selection.deselect(name)?;
            continue;
        }

        if let Err(error) = selection.validate_target(name) {
            warn!("{error}");
            continue;
        }

        let domain = loop {
            let answer = console.text(&format!("Domain of {name} mirror"), default.as_deref())?;
            let answer = answer.trim().to_string();
            match selection.validate_domain(name, &answer) {
                Ok(()) => break answer,
                Err(error) if error.is_rejection() => warn!("{error}"),
                Err(error) => return Err(error),
            }
        };

        let certificate = if own_certificates {
            Some(ask_certificate(console, name)?)
        } else {
            None
        };

        selection.select(name, &domain, certificate)?;
    }
}

fn ask_certificate(console: &mut impl Console, name: &str) -> Result<CertificateBundle> {
    loop {
        let bundle = CertificateBundle {
            certificate: PathBuf::from(
                console.text(&format!("Certificate file of {name}"), None)?.trim(),
            ),
            private_key: PathBuf::from(
                console.text(&format!("Private key file of {name}"), None)?.trim(),
            ),
            chain: PathBuf::from(
                console.text(&format!("Certificate chain file of {name}"), None)?.trim(),
            ),
        };

        match bundle.missing_files().first() {
            None => return Ok(bundle),
            Some(missing) => warn!("{:?} does not exist", missing.display()),
        }
    }
}

/// Ask for contact email and optional visitor verification.
///
/// A resumed selection that already has an email keeps it, and keeps its
/// verification settings.
///
/// # Errors
///
/// - Return [`SelectionError::Console`] if the operator cannot be asked.
/// - Return [`SelectionError::State`] if the selection cannot be saved.
#[instrument(skip(selection, console), level = "debug")]
pub fn collect_contact(
    selection: &mut Selection,
    console: &mut impl Console,
    own_certificates: bool,
) -> Result<()> {
    let resumed = selection.mode == RunMode::Resume && !selection.state.contact_email.is_empty();
    if resumed {
        debug!("keeping resumed contact settings");
        return Ok(());
    }

    if !own_certificates {
        loop {
            let email = console.text("Contact email for certificate expiry notices", None)?;
            match selection.set_contact_email(&email) {
                Ok(()) => break,
                Err(error) if error.is_rejection() => warn!("{error}"),
                Err(error) => return Err(error),
            }
        }
    }

    if console.confirm("Require visitors to answer a verification question?", false)? {
        let question = console.text("Verification question", None)?;
        let answer = console.text("Expected answer", None)?;
        let hint = console.text("Hint shown to visitors", Some(""))?;
        selection.set_verification(Some(Verification {
            question: question.trim().into(),
            answer: answer.trim().into(),
            hint: hint.trim().into(),
        }))?;
    }

    Ok(())
}

fn is_hostname(domain: &str) -> bool {
    domain.len() <= 253
        && domain.contains('.')
        && domain.split('.').all(|label| {
            (1..=63).contains(&label.len())
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Target selection error types.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("unknown mirror {0:?}")]
    UnknownTarget(String),

    #[error("mirror {0:?} is already installed, remove it first")]
    TargetInstalled(String),

    #[error("{0:?} is not a valid domain")]
    InvalidDomain(String),

    #[error("domain {domain:?} is already used by selected mirror {target}")]
    DuplicateDomain { domain: String, target: String },

    #[error("domain {domain:?} is already served by installed mirror {target}")]
    InstalledDomain { domain: String, target: String },

    #[error("{0:?} is not a valid email address")]
    InvalidEmail(String),

    #[error("certificate file {:?} does not exist", .0.display())]
    MissingCertificate(PathBuf),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Console(#[from] ConsoleError),
}

impl SelectionError {
    /// Check if error rejects operator input rather than failing the run.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::State(_) | Self::Console(_))
    }
}

/// Friendly result alias :3
pub type Result<T, E = SelectionError> = std::result::Result<T, E>;

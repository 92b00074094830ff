// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Install state persistence.
//!
//! Obtaining certificates and cloning source trees can fail halfway through
//! for reasons outside of our control: DNS records that did not propagate
//! yet, flaky networks, an impatient operator hitting Ctrl-C. So every
//! decision the operator makes is written to a state file immediately, and
//! the next run offers to pick up where the last one stopped.
//!
//! # State File Layout
//!
//! The state file is a single JSON document mirroring [`InstallState`], plus
//! the time it was saved:
//!
//! ```json
//! {
//!   "saved_at": "2025-03-01T12:00:00Z",
//!   "targets": ["google"],
//!   "contact_email": "me@example.com",
//!   "verification": null,
//!   "settings": { "google": { "domain": "g.example.com", "certificate": null } }
//! }
//! ```
//!
//! The file is removed once an install completes.

use crate::catalog::CertificateBundle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{read_to_string, remove_file, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Decisions made by the operator for the current install.
///
/// # Invariant
///
/// - Every name in `targets` has an entry in `settings` and vice versa.
/// - Domains of selected targets are pairwise distinct.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    /// Selected targets in selection order.
    pub targets: Vec<String>,

    /// Contact email handed to the ACME client.
    pub contact_email: String,

    /// Optional question visitors must answer before using the mirrors.
    pub verification: Option<Verification>,

    /// Per-target settings.
    pub settings: BTreeMap<String, TargetSettings>,
}

impl InstallState {
    /// Check if target is selected.
    pub fn is_selected(&self, name: &str) -> bool {
        self.settings.contains_key(name)
    }

    /// Select target, or replace settings of an already selected target.
    ///
    /// Re-selecting a target keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, settings: TargetSettings) {
        let name = name.into();
        if !self.is_selected(&name) {
            self.targets.push(name.clone());
        }
        self.settings.insert(name, settings);
    }

    /// Deselect target, returning whether it was selected.
    pub fn remove(&mut self, name: &str) -> bool {
        self.targets.retain(|target| target != name);
        self.settings.remove(name).is_some()
    }

    /// Iterate selected targets with their settings in selection order.
    pub fn selected(&self) -> impl Iterator<Item = (&str, &TargetSettings)> {
        self.targets.iter().filter_map(|name| {
            self.settings
                .get(name)
                .map(|settings| (name.as_str(), settings))
        })
    }

    /// Domain assigned to target if selected.
    pub fn domain_of(&self, name: &str) -> Option<&str> {
        self.settings.get(name).map(|settings| settings.domain.as_str())
    }
}

/// Settings of one selected target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSettings {
    /// Public hostname of mirror.
    pub domain: String,

    /// Operator supplied certificate, obtained automatically when unset.
    pub certificate: Option<CertificateBundle>,
}

/// Human verification question for mirror visitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub question: String,
    pub answer: String,
    pub hint: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,

    #[serde(flatten)]
    state: InstallState,
}

#[derive(Debug, Serialize)]
struct SnapshotRef<'a> {
    saved_at: DateTime<Utc>,

    #[serde(flatten)]
    state: &'a InstallState,
}

/// Store of the state file.
///
/// A disabled store never writes, and never finds anything to load. Installs
/// with operator supplied certificates use one, since they have no network
/// step worth resuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStore {
    path: PathBuf,
    enabled: bool,
}

impl StateStore {
    /// Construct new store persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
        }
    }

    /// Construct new store that never persists anything.
    pub fn disabled(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: false,
        }
    }

    /// Path of state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if store persists anything.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Save state, atomically replacing previous content.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Encode`] if state cannot be serialized.
    /// - Return [`StateError::Write`] if state file cannot be written.
    #[instrument(skip(self, state), level = "debug")]
    pub fn save(&self, state: &InstallState) -> Result<()> {
        if !self.enabled {
            debug!("state persistence disabled, not saving");
            return Ok(());
        }

        let snapshot = SnapshotRef {
            saved_at: Utc::now(),
            state,
        };
        let content = serde_json::to_string_pretty(&snapshot).map_err(StateError::Encode)?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|source| StateError::Write {
                source,
                path: self.path.clone(),
            })?;
        }

        // INVARIANT: State file is replaced whole, never left half written.
        let staging = self.staging_path();
        write(&staging, content).map_err(|source| StateError::Write {
            source,
            path: staging.clone(),
        })?;
        rename(&staging, &self.path).map_err(|source| StateError::Write {
            source,
            path: self.path.clone(),
        })?;
        debug!("saved install state to {:?}", self.path.display());

        Ok(())
    }

    /// Load saved state if any.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Read`] if state file exists but cannot be read.
    /// - Return [`StateError::Decode`] if state file is malformed.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self) -> Result<Option<InstallState>> {
        if !self.enabled {
            return Ok(None);
        }

        let content = match read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Read {
                    source,
                    path: self.path.clone(),
                })
            }
        };

        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|source| StateError::Decode {
                source,
                path: self.path.clone(),
            })?;
        info!(
            "found unfinished install saved at {}",
            snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        Ok(Some(snapshot.state))
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Remove state file.
    ///
    /// A missing state file is not an error.
    ///
    /// # Errors
    ///
    /// - Return [`StateError::Remove`] if state file cannot be removed.
    pub fn clear(&self) -> Result<()> {
        match remove_file(&self.path) {
            Ok(()) => {
                debug!("removed install state {:?}", self.path.display());
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Remove {
                source,
                path: self.path.clone(),
            }),
        }
    }
}

/// Install state error types.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// State file cannot be read.
    #[error("failed to read install state from {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file cannot be written.
    #[error("failed to write install state to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file cannot be removed.
    #[error("failed to remove install state at {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// State file content is malformed.
    #[error("malformed install state at {:?}", path.display())]
    Decode {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// State cannot be serialized.
    #[error(transparent)]
    Encode(serde_json::Error),
}

/// Friendly result alias :3
pub type Result<T, E = StateError> = std::result::Result<T, E>;

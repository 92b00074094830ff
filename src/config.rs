// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional settings file that tunes where zmdeploy
//! installs things, where it fetches things from, and how patient it is with
//! the ACME client. Every field has a default, so an empty or missing file
//! yields a working configuration for a stock Debian/Ubuntu Apache host.
//!
//! # Example
//!
//! ```toml
//! [paths]
//! install_root = "/var/www"
//! server_conf_dir = "/etc/apache2/conf-enabled"
//!
//! [certificate]
//! attempt_limit = 8
//!
//! [report]
//! enabled = false
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Installer settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Filesystem locations.
    pub paths: PathSettings,

    /// Where source trees and templates come from.
    pub source: SourceSettings,

    /// ACME client behavior.
    pub certificate: CertificateSettings,

    /// Web server handling.
    pub server: ServerSettings,

    /// Outcome reporting.
    pub report: ReportSettings,
}

impl Settings {
    /// Load settings from file.
    ///
    /// An explicit `path` must exist. Without one, `fallback` is read if it
    /// exists, otherwise the defaults are used.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    pub fn load(path: Option<&Path>, fallback: Option<&Path>) -> Result<Self> {
        let path = match (path, fallback) {
            (Some(path), _) => path,
            (None, Some(fallback)) if fallback.exists() => fallback,
            _ => {
                debug!("no settings file, using defaults");
                return Ok(Self::default());
            }
        };

        debug!("load settings from {:?}", path.display());
        read_to_string(path)
            .map_err(|source| ConfigError::Read {
                source,
                path: path.to_path_buf(),
            })?
            .parse()
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        let paths = &mut settings.paths;
        paths.install_root = expand(&paths.install_root)?;
        paths.server_conf_dir = expand(&paths.server_conf_dir)?;
        paths.certificate_root = expand(&paths.certificate_root)?;
        paths.renewal_job = expand(&paths.renewal_job)?;
        paths.state_file = paths.state_file.as_deref().map(expand).transpose()?;

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Filesystem locations.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathSettings {
    /// Directory holding one sub-directory per installed mirror.
    pub install_root: PathBuf,

    /// Directory Apache reads virtual host configuration from.
    pub server_conf_dir: PathBuf,

    /// Directory the ACME client stores live certificates under.
    pub certificate_root: PathBuf,

    /// Path of the periodic certificate renewal script.
    pub renewal_job: PathBuf,

    /// Path of the install state file, next to the executable when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            install_root: "/var/www".into(),
            server_conf_dir: "/etc/apache2/conf-enabled".into(),
            certificate_root: "/etc/letsencrypt/live".into(),
            renewal_job: "/etc/cron.weekly/zmirror-letsencrypt-renew.sh".into(),
            state_file: None,
        }
    }
}

/// Remote sources.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Git URL of the zmirror source tree.
    pub repository: String,

    /// Base URL of the web server configuration templates.
    pub templates: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            repository: "https://github.com/aploium/zmirror.git".into(),
            templates: "https://raw.githubusercontent.com/aploium/zmirror-onekey/master/configs"
                .into(),
        }
    }
}

/// ACME client behavior.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificateSettings {
    /// ACME client command, split on whitespace.
    pub client: String,

    /// Attempts per domain before the operator is asked to keep going.
    pub attempt_limit: u32,

    /// Seconds added to the attempt number to compute each retry wait.
    pub base_wait: u64,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            client: "certbot".into(),
            attempt_limit: 5,
            base_wait: 5,
        }
    }
}

/// Web server handling.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Owner of deployed mirror trees, ownership is left alone when empty.
    pub web_user: String,

    /// Command stopping the web server.
    pub stop: Vec<String>,

    /// Command starting the web server.
    pub start: Vec<String>,

    /// Command restarting the web server.
    pub restart: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            web_user: "www-data".into(),
            stop: argv(["service", "apache2", "stop"]),
            start: argv(["service", "apache2", "start"]),
            restart: argv(["service", "apache2", "restart"]),
        }
    }
}

/// Outcome reporting.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Send reports at all.
    pub enabled: bool,

    /// Endpoint receiving success reports.
    pub success_url: String,

    /// Endpoint receiving error reports.
    pub error_url: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            success_url: "https://report.zmirror.org/onekey/log/success".into(),
            error_url: "https://report.zmirror.org/onekey/log/error".into(),
        }
    }
}

fn argv<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.into_iter().map(String::from).collect()
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host checks and system packages.
//!
//! zmdeploy only knows how to provision Debian and its derivatives, as root,
//! on a release recent enough to ship Python 3 packages of mod_wsgi. These
//! conditions are checked before the operator is asked anything.

use crate::{
    console::Console,
    report::ReportSink,
    runner::{Cmd, FailurePolicy, RunnerError},
    session::Session,
};

use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Packages every mirror needs.
pub const BASE_PACKAGES: &[&str] = &[
    "git",
    "python3",
    "python3-pip",
    "apache2",
    "libapache2-mod-wsgi-py3",
];

/// ACME client package, skipped when the operator brings certificates.
pub const ACME_PACKAGE: &str = "certbot";

/// Python packages zmirror cannot run without.
pub const PYTHON_PACKAGES: &[&str] = &["requests", "flask"];

/// Python packages that only speed zmirror up.
pub const SPEEDUP_PACKAGES: &[&str] = &["cchardet", "fastcache", "lru-dict"];

/// Apache modules enabled for the mirrors.
pub const APACHE_MODULES: &[&str] = &[
    "rewrite", "mime", "include", "headers", "filter", "expires", "deflate", "autoindex",
    "setenvif", "ssl", "http2",
];

/// Distribution identification from `os-release`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub id: String,
    pub version_id: String,
    pub pretty_name: String,
}

impl HostInfo {
    /// Human readable name of distribution.
    pub fn name(&self) -> String {
        if !self.pretty_name.is_empty() {
            return self.pretty_name.clone();
        }

        match (self.id.as_str(), self.version_id.as_str()) {
            ("", _) => "unknown".into(),
            (id, "") => id.into(),
            (id, version) => format!("{id} {version}"),
        }
    }
}

/// Parse `os-release` content.
pub fn parse_os_release(content: &str) -> HostInfo {
    let mut info = HostInfo::default();
    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();

        match key.trim() {
            "ID" => info.id = value.to_ascii_lowercase(),
            "VERSION_ID" => info.version_id = value,
            "PRETTY_NAME" => info.pretty_name = value,
            _ => {}
        }
    }

    info
}

/// Extract effective user ID from `/proc/<pid>/status` content.
pub fn effective_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|uid| uid.parse().ok())
}

/// Check distribution release is recent enough.
///
/// Unknown distributions and unparsable versions pass.
///
/// # Errors
///
/// - Return [`SystemError::ReleaseTooOld`] for Ubuntu before 14.04 or Debian
///   before 8.
pub fn check_release(host: &HostInfo) -> Result<()> {
    let minimum = match host.id.as_str() {
        "ubuntu" => (14, 4),
        "debian" => (8, 0),
        _ => return Ok(()),
    };

    let Some(version) = parse_version(&host.version_id) else {
        warn!("cannot tell release of {}, assuming supported", host.name());
        return Ok(());
    };

    if version < minimum {
        return Err(SystemError::ReleaseTooOld(host.name()));
    }

    Ok(())
}

fn parse_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(minor) => minor.parse().ok()?,
        None => 0,
    };

    Some((major, minor))
}

/// Check host below filesystem `root` can be provisioned.
///
/// # Errors
///
/// - Return [`SystemError::NotDebian`] if `etc/debian_version` is missing.
/// - Return [`SystemError::NotRoot`] if the effective user is not root.
/// - Return [`SystemError::ReleaseTooOld`] as described by [`check_release`].
/// - Return [`SystemError::Io`] if a system file cannot be read.
#[instrument(level = "debug")]
pub fn preflight(root: &Path) -> Result<HostInfo> {
    if !root.join("etc/debian_version").is_file() {
        return Err(SystemError::NotDebian);
    }

    let status_path = root.join("proc/self/status");
    let status = read_system_file(&status_path)?.unwrap_or_default();
    match effective_uid(&status) {
        Some(0) => {}
        uid => return Err(SystemError::NotRoot(uid)),
    }

    let host = read_system_file(&root.join("etc/os-release"))?
        .map(|content| parse_os_release(&content))
        .unwrap_or_default();
    check_release(&host)?;
    info!("running on {}", host.name());

    Ok(host)
}

fn read_system_file(path: &Path) -> Result<Option<String>> {
    match read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!("{:?} not found", path.display());
            Ok(None)
        }
        Err(source) => Err(SystemError::Io {
            source,
            path: path.to_path_buf(),
        }),
    }
}

/// Install system packages, Python packages, and Apache modules.
///
/// # Errors
///
/// - Return [`SystemError::Runner`] if a required package cannot be
///   installed, or the installer was interrupted.
#[instrument(skip(session), level = "debug")]
pub async fn install_packages<C, S>(session: &mut Session<C, S>) -> Result<()>
where
    C: Console,
    S: ReportSink,
{
    info!("install system packages");
    session
        .run(&Cmd::new("apt-get").arg("update"), FailurePolicy::Tolerant)
        .await?;

    let mut packages = BASE_PACKAGES.to_vec();
    if !session.own_certificates {
        packages.push(ACME_PACKAGE);
    }
    let apt = Cmd::new("apt-get").args(["install", "-y"]).args(packages);
    session.run(&apt, FailurePolicy::Strict).await?;

    info!("install python packages");
    let pip = Cmd::new("python3").args(["-m", "pip", "install", "-U"]);
    session
        .run(&pip.clone().args(PYTHON_PACKAGES), FailurePolicy::Interactive)
        .await?;
    session
        .run(&pip.args(SPEEDUP_PACKAGES), FailurePolicy::Tolerant)
        .await?;

    info!("enable apache modules");
    session
        .run(&Cmd::new("a2enmod").args(APACHE_MODULES), FailurePolicy::Strict)
        .await?;

    Ok(())
}

/// Host check error types.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("only Debian and its derivatives are supported")]
    NotDebian,

    #[error("must run as root (effective uid {0:?})")]
    NotRoot(Option<u32>),

    #[error("{0} is too old, Ubuntu 14.04 or Debian 8 or later is required")]
    ReleaseTooOld(String),

    #[error("failed to read {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Friendly result alias :3
pub type Result<T, E = SystemError> = std::result::Result<T, E>;

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployable mirror catalog.
//!
//! zmirror ships ready-made configurations for a handful of well known sites
//! under its `more_configs/` directory. Each [`CatalogEntry`] names one of
//! these site profiles along with the configuration files that must be copied
//! over the defaults to turn a plain zmirror tree into that mirror.
//!
//! # Installed Targets
//!
//! Every target is deployed into `<install_root>/<name>`. A target whose
//! directory already exists counts as installed, and its public domain is
//! recovered from the `my_host_name` assignment of its `config.py`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing::debug;

/// Static description of a deployable mirror.
#[derive(Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Identifier, also the name of the install directory.
    pub name: &'static str,

    /// Human readable description shown in menus.
    pub label: &'static str,

    /// Files under `more_configs/` copied to the given destination in the
    /// mirror's root.
    pub config_files: &'static [(&'static str, &'static str)],
}

/// All mirrors zmdeploy knows how to deploy.
pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "google",
        label: "Google (with scholar, image and zh_wikipedia)",
        config_files: &[("config_google_and_zhwikipedia.py", "config.py")],
    },
    CatalogEntry {
        name: "twitterPC",
        label: "Twitter (PC)",
        config_files: &[
            ("config_twitter_pc.py", "config.py"),
            ("custom_func_twitter.py", "custom_func.py"),
        ],
    },
    CatalogEntry {
        name: "twitterMobile",
        label: "Twitter (Mobile)",
        config_files: &[
            ("config_twitter_mobile.py", "config.py"),
            ("custom_func_twitter.py", "custom_func.py"),
        ],
    },
    CatalogEntry {
        name: "youtubePC",
        label: "YouTube (PC)",
        config_files: &[
            ("config_youtube.py", "config.py"),
            ("custom_func_youtube.py", "custom_func.py"),
        ],
    },
    CatalogEntry {
        name: "youtubeMobile",
        label: "YouTube (Mobile)",
        config_files: &[
            ("config_youtube_mobile.py", "config.py"),
            ("custom_func_youtube.py", "custom_func.py"),
        ],
    },
    CatalogEntry {
        name: "instagram",
        label: "Instagram",
        config_files: &[("config_instagram.py", "config.py")],
    },
    CatalogEntry {
        name: "facebook",
        label: "Facebook",
        config_files: &[("config_facebook.py", "config.py")],
    },
];

/// Look up catalog entry by name.
pub fn entry(name: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.name == name)
}

/// Certificate files used by a mirror's HTTPS virtual host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub private_key: PathBuf,
    pub certificate: PathBuf,
    pub chain: PathBuf,
}

impl CertificateBundle {
    /// Bundle the ACME client stores for `domain` under `root`.
    pub fn acme(root: impl AsRef<Path>, domain: &str) -> Self {
        let live = root.as_ref().join(domain);
        Self {
            private_key: live.join("privkey.pem"),
            certificate: live.join("cert.pem"),
            chain: live.join("chain.pem"),
        }
    }

    /// List files of bundle that do not exist.
    pub fn missing_files(&self) -> Vec<&Path> {
        [&self.private_key, &self.certificate, &self.chain]
            .into_iter()
            .map(PathBuf::as_path)
            .filter(|path| !path.is_file())
            .collect()
    }
}

/// Existing installation of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub path: PathBuf,
    pub domain: Option<String>,
}

/// Catalog entry together with what is known about it on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub entry: &'static CatalogEntry,
    pub installed: Option<Installation>,
}

impl Target {
    /// Name of target.
    pub fn name(&self) -> &'static str {
        self.entry.name
    }

    /// Domain of existing installation if any.
    pub fn installed_domain(&self) -> Option<&str> {
        self.installed
            .as_ref()
            .and_then(|installation| installation.domain.as_deref())
    }
}

/// Catalog of targets as found on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    targets: Vec<Target>,
}

impl Catalog {
    /// Construct new catalog assuming nothing is installed.
    pub fn new() -> Self {
        Self {
            targets: CATALOG
                .iter()
                .map(|entry| Target {
                    entry,
                    installed: None,
                })
                .collect(),
        }
    }

    /// Construct new catalog by probing `install_root` for installed targets.
    pub fn detect(install_root: impl AsRef<Path>) -> Self {
        let mut catalog = Self::new();
        for target in &mut catalog.targets {
            let path = install_root.as_ref().join(target.entry.name);
            if !path.is_dir() {
                continue;
            }

            let domain = read_installed_domain(path.join("config.py"));
            debug!("found installed {} at {:?} ({domain:?})", target.entry.name, path.display());
            target.installed = Some(Installation { path, domain });
        }

        catalog
    }

    /// Look up target by name.
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|target| target.name() == name)
    }

    /// Iterate all targets in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    /// Iterate installed targets in catalog order.
    pub fn installed(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|target| target.installed.is_some())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

static HOST_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*my_host_name\s*=\s*['"]([^'"]+)['"]"#).unwrap()
});

/// Read the domain a deployed mirror serves from its configuration file.
///
/// The last assignment wins, matching Python semantics.
pub fn read_installed_domain(config: impl AsRef<Path>) -> Option<String> {
    let content = read_to_string(config.as_ref()).ok()?;
    HOST_NAME
        .captures_iter(&content)
        .last()
        .map(|captures| captures[1].to_string())
}

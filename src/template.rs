// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Web server configuration templates.
//!
//! Virtual host templates are plain text files with `{{token}}` placeholders.
//! They are rendered by exact string replacement of each known token, not by
//! a template engine, because Apache configuration has brace syntax of its
//! own that an engine would try to interpret.

use crate::catalog::CertificateBundle;

use regex::Regex;
use std::{collections::HashMap, path::Path, sync::LazyLock};
use tracing::{debug, instrument};

/// Replace every token with its value.
pub fn render<K, V>(template: &str, tokens: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    tokens
        .into_iter()
        .fold(template.to_string(), |text, (token, value)| {
            text.replace(token.as_ref(), value.as_ref())
        })
}

/// Tokens describing one mirror.
pub fn target_tokens(
    name: &str,
    domain: &str,
    install_path: &Path,
    certificate: &CertificateBundle,
) -> Vec<(&'static str, String)> {
    vec![
        ("{{domain}}", domain.to_string()),
        ("{{mirror_name}}", name.to_string()),
        ("{{install_path}}", install_path.display().to_string()),
        ("{{cert_file}}", certificate.certificate.display().to_string()),
        ("{{private_key_file}}", certificate.private_key.display().to_string()),
        ("{{cert_chain_file}}", certificate.chain.display().to_string()),
    ]
}

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*[A-Za-z0-9_]+\s*\}\}").unwrap());

/// List placeholders still present in rendered text.
pub fn leftover_tokens(text: &str) -> Vec<&str> {
    TOKEN.find_iter(text).map(|found| found.as_str()).collect()
}

/// Where templates come from.
#[allow(async_fn_in_trait)]
pub trait TemplateSource {
    /// Fetch raw template by file name.
    async fn fetch(&self, name: &str) -> Result<String>;
}

/// Templates served over HTTP below a base URL.
#[derive(Debug, Clone)]
pub struct HttpTemplates {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTemplates {
    /// Construct new HTTP template source.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_of(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }
}

impl TemplateSource for HttpTemplates {
    #[instrument(skip(self), level = "debug")]
    async fn fetch(&self, name: &str) -> Result<String> {
        let url = self.url_of(name);
        debug!("download template {url}");
        let fetch = async {
            self.client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await
        };

        fetch
            .await
            .map_err(|source| TemplateError::Download { source, url })
    }
}

/// Templates held in memory, keyed by file name.
impl TemplateSource for HashMap<String, String> {
    async fn fetch(&self, name: &str) -> Result<String> {
        self.get(name)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }
}

/// Template error types.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Template could not be downloaded.
    #[error("failed to download template from {url}")]
    Download {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// Template does not exist in source.
    #[error("template {0:?} not found")]
    NotFound(String),
}

/// Friendly result alias :3
pub type Result<T, E = TemplateError> = std::result::Result<T, E>;

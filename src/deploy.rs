// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror deployment.
//!
//! Deployment turns one clone of the zmirror source tree into an independent
//! copy per selected target:
//!
//! 1. The source repository is cloned into `<install_root>/zmirror`.
//! 2. Each target gets a full copy at `<install_root>/<name>`, owned by the
//!    web server user, with its site profile laid over the default
//!    configuration and its domain patched into `config.py`.
//! 3. Virtual host configurations are rendered from templates into the web
//!    server's configuration directory.
//! 4. A weekly renewal job keeps ACME certificates fresh.
//!
//! The base clone is removed once every target is in place.
//!
//! # Run Modes
//!
//! A first run never destroys anything it did not create: an existing target
//! directory is a fatal conflict and existing virtual host files are kept. A
//! resumed run expects leftovers of the interrupted attempt, so it purges
//! target directories and overwrites virtual host files.

use crate::{
    catalog::{entry, Catalog, CatalogEntry, CertificateBundle},
    console::Console,
    report::ReportSink,
    runner::{Cmd, FailurePolicy, RunnerError},
    selection::RunMode,
    session::Session,
    state::{InstallState, Verification},
    template::{leftover_tokens, render, target_tokens, TemplateError, TemplateSource},
};

use git2::{build::RepoBuilder, FetchOptions, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use std::{
    fs::{
        copy, create_dir_all, read_link, read_to_string, remove_dir_all, set_permissions, write,
        Permissions,
    },
    io::ErrorKind,
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
    sync::LazyLock,
    time,
};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Name of the base source tree below the install root.
pub const SOURCE_DIR: &str = "zmirror";

/// Shared virtual host template.
pub const BOILERPLATE_TEMPLATE: &str = "apache2-boilerplate.conf";

/// Per-target HTTPS virtual host template.
pub const HTTPS_TEMPLATE: &str = "apache2-https.conf";

/// Per-target HTTP to HTTPS redirect template.
pub const HTTP_TEMPLATE: &str = "apache2-http.conf";

/// Deploy every selected target.
///
/// # Errors
///
/// - Return [`DeployError::Git2`] if the source tree cannot be cloned.
/// - Return [`DeployError::DirectoryConflict`] if a target directory exists
///   during a first run.
/// - Return [`DeployError::Template`] if a template cannot be fetched.
/// - Return [`DeployError::Io`] if any file operation fails.
/// - Return [`DeployError::Runner`] if the installer was interrupted.
#[instrument(skip(session, state, templates), level = "debug")]
pub async fn deploy<C, S>(
    session: &mut Session<C, S>,
    state: &InstallState,
    mode: RunMode,
    templates: &impl TemplateSource,
) -> Result<()>
where
    C: Console,
    S: ReportSink,
{
    let install_root = session.settings.paths.install_root.clone();
    let base = install_root.join(SOURCE_DIR);
    if base.exists() {
        debug!("remove stale source tree {:?}", base.display());
        remove_dir_all(&base).map_err(|source| DeployError::io(source, &base))?;
    }

    // INVARIANT: Base tree never outlives this call, even on failure.
    let result = deploy_from_source(session, state, mode, templates, &base).await;
    match remove_dir_all(&base) {
        Ok(()) => debug!("removed source tree {:?}", base.display()),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(source) if result.is_ok() => return Err(DeployError::io(source, &base)),
        Err(error) => warn!("cannot remove source tree {:?}: {error}", base.display()),
    }

    result
}

async fn deploy_from_source<C, S>(
    session: &mut Session<C, S>,
    state: &InstallState,
    mode: RunMode,
    templates: &impl TemplateSource,
    base: &Path,
) -> Result<()>
where
    C: Console,
    S: ReportSink,
{
    let install_root = session.settings.paths.install_root.clone();
    let repository = session.settings.source.repository.clone();
    fetch_source(&repository, base)?;

    for (name, settings) in state.selected() {
        session.check_interrupt(name)?;
        let entry = entry(name).ok_or_else(|| DeployError::UnknownTarget(name.to_string()))?;
        let dest = install_root.join(name);
        info!("deploy {name} to {:?}", dest.display());

        prepare_target_dir(&dest, mode)?;
        copy_tree(base, &dest)?;

        let user = session.settings.server.web_user.clone();
        if !user.is_empty() {
            let chown = Cmd::new("chown")
                .arg("-R")
                .arg(format!("{user}:{user}"))
                .arg(&dest);
            session.run(&chown, FailurePolicy::Tolerant).await?;
        }

        overlay_config_files(entry, &dest)?;
        patch_config(
            dest.join("config.py"),
            &settings.domain,
            state.verification.as_ref(),
        )?;
    }

    install_templates(session, state, mode, templates).await?;

    if !session.own_certificates {
        install_renewal_job(
            &session.settings.paths.renewal_job,
            &session.settings.certificate.client,
            &session.settings.server.stop,
            &session.settings.server.start,
        )?;
    }

    Ok(())
}

/// Clone source repository at `url` into `path` showing a progress bar.
///
/// # Errors
///
/// - Return [`DeployError::Git2`] if libgit2 operations fail.
/// - Return [`DeployError::IndicatifStyleTemplate`] if the progress bar
///   cannot be styled.
#[instrument(level = "debug")]
pub fn fetch_source(url: &str, path: &Path) -> Result<()> {
    info!("clone {url}");
    let bar = ProgressBar::no_length();
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(url.to_string());
    bar.enable_steady_tick(time::Duration::from_millis(100));

    let mut throttle = time::Instant::now();
    let mut rc = RemoteCallbacks::new();
    rc.transfer_progress(|progress| {
        if throttle.elapsed() > time::Duration::from_millis(10) {
            throttle = time::Instant::now();
            bar.set_length(progress.total_objects() as u64);
            bar.set_position(progress.received_objects() as u64);
        }
        true
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    let result = RepoBuilder::new().fetch_options(fo).clone(url, path);
    bar.finish_and_clear();
    result?;

    Ok(())
}

/// Make sure `dest` is free for a new deployment.
///
/// # Errors
///
/// - Return [`DeployError::DirectoryConflict`] if `dest` exists during a
///   first run. Nothing is deleted.
/// - Return [`DeployError::Io`] if `dest` cannot be purged.
pub fn prepare_target_dir(dest: &Path, mode: RunMode) -> Result<()> {
    if !dest.exists() {
        return Ok(());
    }

    match mode {
        RunMode::FirstRun => Err(DeployError::DirectoryConflict(dest.to_path_buf())),
        RunMode::Resume => {
            warn!("purge leftover {:?}", dest.display());
            remove_dir_all(dest).map_err(|source| DeployError::io(source, dest))
        }
    }
}

/// Copy directory tree `from` to `to`, keeping symbolic links as links.
///
/// # Errors
///
/// - Return [`DeployError::Walk`] if `from` cannot be traversed.
/// - Return [`DeployError::Io`] if anything cannot be copied.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry?;
        // INVARIANT: Every walked path lives below the walk root.
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            create_dir_all(&target).map_err(|source| DeployError::io(source, &target))?;
        } else if file_type.is_symlink() {
            let link =
                read_link(entry.path()).map_err(|source| DeployError::io(source, entry.path()))?;
            symlink(link, &target).map_err(|source| DeployError::io(source, &target))?;
        } else {
            copy(entry.path(), &target).map_err(|source| DeployError::io(source, &target))?;
        }
    }

    Ok(())
}

/// Lay the site profile of `entry` over the defaults of the tree at `dest`.
///
/// # Errors
///
/// - Return [`DeployError::Io`] if a profile file is missing or cannot be
///   copied.
pub fn overlay_config_files(entry: &CatalogEntry, dest: &Path) -> Result<()> {
    for (from, to) in entry.config_files {
        let source = dest.join("more_configs").join(from);
        let target = dest.join(to);
        debug!("overlay {from} as {to}");
        copy(&source, &target).map_err(|error| DeployError::io(error, &source))?;
    }

    Ok(())
}

static HOST_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*my_host_name[ \t]*=.*$").unwrap());
static HOST_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*my_host_scheme[ \t]*=.*$").unwrap());

/// Patch mirror configuration at `path` for `domain`.
///
/// # Errors
///
/// - Return [`DeployError::Io`] if the configuration cannot be read or
///   written.
#[instrument(skip(path, verification), level = "debug")]
pub fn patch_config(
    path: impl AsRef<Path>,
    domain: &str,
    verification: Option<&Verification>,
) -> Result<()> {
    let path = path.as_ref();
    let content = read_to_string(path).map_err(|source| DeployError::io(source, path))?;
    let patched = patched_config(&content, domain, verification, &generate_secret());
    write(path, patched).map_err(|source| DeployError::io(source, path))
}

fn patched_config(
    content: &str,
    domain: &str,
    verification: Option<&Verification>,
    secret: &str,
) -> String {
    let mut content = assign(content, &HOST_NAME, &format!("my_host_name = {}", py_str(domain)));
    content = assign(&content, &HOST_SCHEME, "my_host_scheme = 'https://'");

    if let Some(verification) = verification {
        content.push_str(&verification_block(verification, secret));
    }

    content.push_str("verbose_level = 2\n");
    content
}

fn assign(content: &str, pattern: &Regex, line: &str) -> String {
    if pattern.is_match(content) {
        return pattern.replace(content, regex::NoExpand(line)).into_owned();
    }

    let mut content = content.to_string();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(line);
    content.push('\n');
    content
}

/// Configuration lines enabling visitor verification.
pub fn verification_block(verification: &Verification, secret: &str) -> String {
    format!(
        "\n####### Visitor verification, added by zmdeploy #######\n\
         human_ip_verification_enabled = True\n\
         human_ip_verification_answer_any_one_questions_is_ok = False\n\
         human_ip_verification_questions = (\n    ({}, {}, {}),\n)\n\
         human_ip_verification_identity_record = ()\n\
         human_ip_verification_answers_hash_str = {}\n\
         human_ip_verification_whitelist_from_cookies = True\n\
         enable_custom_access_cookie_generate_and_verify = False\n\
         identity_verify_required = False\n\n",
        py_str(&verification.question),
        py_str(&verification.answer),
        py_str(&verification.hint),
        py_str(secret),
    )
}

/// Fresh 32 character alphanumeric secret.
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn py_str(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n");
    format!("'{escaped}'")
}

/// Render virtual host configurations of every selected target.
///
/// Returns the configuration files written.
///
/// # Errors
///
/// - Return [`DeployError::Template`] if a template cannot be fetched.
/// - Return [`DeployError::Io`] if a configuration file cannot be written.
#[instrument(skip(session, state, templates), level = "debug")]
pub async fn install_templates<C, S>(
    session: &Session<C, S>,
    state: &InstallState,
    mode: RunMode,
    templates: &impl TemplateSource,
) -> Result<Vec<PathBuf>>
where
    C: Console,
    S: ReportSink,
{
    let paths = &session.settings.paths;
    let mut written = Vec::new();

    let boilerplate = templates.fetch(BOILERPLATE_TEMPLATE).await?;
    let target = paths.server_conf_dir.join("zmirror-boilerplate.conf");
    if write_conf(&target, &boilerplate, mode)? {
        written.push(target);
    }

    let https = templates.fetch(HTTPS_TEMPLATE).await?;
    let http = templates.fetch(HTTP_TEMPLATE).await?;
    for (name, settings) in state.selected() {
        let bundle = settings
            .certificate
            .clone()
            .unwrap_or_else(|| CertificateBundle::acme(&paths.certificate_root, &settings.domain));
        let tokens = target_tokens(
            name,
            &settings.domain,
            &paths.install_root.join(name),
            &bundle,
        );

        for (template, scheme) in [(&https, "https"), (&http, "http")] {
            let rendered = render(template, tokens.iter().map(|(k, v)| (*k, v.as_str())));
            let leftover = leftover_tokens(&rendered);
            if !leftover.is_empty() {
                warn!("{scheme} configuration of {name} keeps unknown placeholders {leftover:?}");
            }

            let target = paths.server_conf_dir.join(format!("zmirror-{name}-{scheme}.conf"));
            if write_conf(&target, &rendered, mode)? {
                written.push(target);
            }
        }
    }

    Ok(written)
}

fn write_conf(path: &Path, content: &str, mode: RunMode) -> Result<bool> {
    if path.exists() && mode == RunMode::FirstRun {
        warn!("{:?} already exists, keeping it", path.display());
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent).map_err(|source| DeployError::io(source, parent))?;
    }
    write(path, content).map_err(|source| DeployError::io(source, path))?;
    debug!("wrote {:?}", path.display());

    Ok(true)
}

/// Install weekly certificate renewal job at `path` unless one exists.
///
/// Returns whether the job was written.
///
/// # Errors
///
/// - Return [`DeployError::Io`] if the job cannot be written.
pub fn install_renewal_job(
    path: &Path,
    client: &str,
    stop: &[String],
    start: &[String],
) -> Result<bool> {
    if path.exists() {
        debug!("renewal job {:?} already installed", path.display());
        return Ok(false);
    }

    let script = format!(
        "#!/bin/sh\n\
         # Renew zmirror certificates, installed by zmdeploy.\n\
         {client} renew -n --agree-tos --standalone --pre-hook \"{}\" --post-hook \"{}\"\n\
         exit 0\n",
        stop.join(" "),
        start.join(" "),
    );

    if let Some(parent) = path.parent() {
        mkdirp::mkdirp(parent).map_err(|source| DeployError::io(source, parent))?;
    }
    write(path, script).map_err(|source| DeployError::io(source, path))?;
    set_permissions(path, Permissions::from_mode(0o755))
        .map_err(|source| DeployError::io(source, path))?;
    info!("installed renewal job {:?}", path.display());

    Ok(true)
}

/// Pull latest source into every installed target.
///
/// Returns the number of targets upgraded successfully.
///
/// # Errors
///
/// - Return [`DeployError::Runner`] if the installer was interrupted.
#[instrument(skip(session, catalog), level = "debug")]
pub async fn upgrade<C, S>(session: &mut Session<C, S>, catalog: &Catalog) -> Result<usize>
where
    C: Console,
    S: ReportSink,
{
    let mut upgraded = 0;
    for target in catalog.installed() {
        let Some(installation) = &target.installed else {
            continue;
        };

        info!("upgrade {}", target.name());
        let pull = Cmd::new("git").arg("pull").current_dir(&installation.path);
        if session.run(&pull, FailurePolicy::Tolerant).await?.succeeded {
            upgraded += 1;
        }
    }

    Ok(upgraded)
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Target directory exists during a first run.
    #[error("{:?} already exists, remove it or resume a previous install", .0.display())]
    DirectoryConflict(PathBuf),

    /// Selected target is not in the catalog.
    #[error("unknown mirror {0:?}")]
    UnknownTarget(String),

    /// File operation failed.
    #[error("file operation failed at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Source tree cannot be traversed.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

impl DeployError {
    fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        console::{Interrupt, ScriptedConsole},
        report::{Report, Reporter},
        state::TargetSettings,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{collections::HashMap, fs::metadata};

    fn verification() -> Verification {
        Verification {
            question: "Who wrote zmirror?".into(),
            answer: "aploium".into(),
            hint: "it's on GitHub".into(),
        }
    }

    fn session(root: &Path) -> Session<ScriptedConsole, Vec<Report>> {
        let mut settings = Settings::default();
        settings.paths.install_root = root.join("www");
        settings.paths.server_conf_dir = root.join("conf-enabled");
        settings.paths.certificate_root = root.join("live");
        Session::new(
            settings,
            ScriptedConsole::default(),
            Reporter::disabled(),
            Interrupt::new(),
            false,
        )
    }

    fn templates() -> HashMap<String, String> {
        HashMap::from([
            (BOILERPLATE_TEMPLATE.to_string(), "LoadModule wsgi_module\n".to_string()),
            (
                HTTPS_TEMPLATE.to_string(),
                "ServerName {{domain}}\nSSLCertificateFile {{cert_file}}\n".to_string(),
            ),
            (
                HTTP_TEMPLATE.to_string(),
                "Redirect / https://{{domain}}/ # {{mirror_name}}\n".to_string(),
            ),
        ])
    }

    fn google_state() -> InstallState {
        let mut state = InstallState::default();
        state.insert(
            "google",
            TargetSettings {
                domain: "g.example.com".into(),
                certificate: None,
            },
        );
        state
    }

    #[test]
    fn patch_rewrites_first_assignments() {
        let config = indoc! {r#"
            # zmirror config
            my_host_name = '127.0.0.1'
            my_host_scheme = 'http://'
            target_domain = 'www.google.com'
            my_host_name = 'unused'
        "#};
        let expect = indoc! {r#"
            # zmirror config
            my_host_name = 'g.example.com'
            my_host_scheme = 'https://'
            target_domain = 'www.google.com'
            my_host_name = 'unused'
            verbose_level = 2
        "#};

        assert_eq!(patched_config(config, "g.example.com", None, "s"), expect);
    }

    #[test]
    fn patch_appends_missing_assignments() {
        let result = patched_config("target_domain = 'www.google.com'", "g.example.com", None, "s");
        let expect = indoc! {r#"
            target_domain = 'www.google.com'
            my_host_name = 'g.example.com'
            my_host_scheme = 'https://'
            verbose_level = 2
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn patch_appends_verification_block() {
        let result = patched_config("", "g.example.com", Some(&verification()), "S3CR3T");
        assert!(result.contains("human_ip_verification_enabled = True\n"));
        assert!(result.contains("('Who wrote zmirror?', 'aploium', 'it\\'s on GitHub'),"));
        assert!(result.contains("human_ip_verification_answers_hash_str = 'S3CR3T'\n"));
        assert!(result.ends_with("verbose_level = 2\n"));
    }

    #[test]
    fn secret_is_fresh_alphanumeric() {
        let first = generate_secret();
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, generate_secret());
    }

    #[test]
    fn first_run_conflict_deletes_nothing() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("google");
        create_dir_all(&dest)?;
        write(dest.join("config.py"), "keep me")?;

        let result = prepare_target_dir(&dest, RunMode::FirstRun);
        assert!(matches!(result, Err(DeployError::DirectoryConflict(path)) if path == dest));
        assert_eq!(read_to_string(dest.join("config.py"))?, "keep me");

        Ok(())
    }

    #[test]
    fn resume_purges_leftovers() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("google");
        create_dir_all(dest.join("nested"))?;
        write(dest.join("nested").join("stale.py"), "stale")?;

        prepare_target_dir(&dest, RunMode::Resume)?;
        assert!(!dest.exists());
        prepare_target_dir(&dest, RunMode::FirstRun)?;

        Ok(())
    }

    #[test]
    fn copy_tree_and_overlay() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let base = root.path().join("zmirror");
        create_dir_all(base.join("more_configs"))?;
        write(base.join("config.py"), "default")?;
        write(base.join("more_configs").join("config_twitter_pc.py"), "twitter")?;
        write(base.join("more_configs").join("custom_func_twitter.py"), "func")?;
        symlink("config.py", base.join("link.py"))?;

        let dest = root.path().join("twitterPC");
        copy_tree(&base, &dest)?;
        overlay_config_files(entry("twitterPC").unwrap(), &dest)?;

        assert_eq!(read_to_string(dest.join("config.py"))?, "twitter");
        assert_eq!(read_to_string(dest.join("custom_func.py"))?, "func");
        assert_eq!(read_link(dest.join("link.py"))?, PathBuf::from("config.py"));
        assert_eq!(read_to_string(base.join("config.py"))?, "default");

        Ok(())
    }

    #[test]
    fn overlay_missing_profile_fails() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let result = overlay_config_files(entry("google").unwrap(), root.path());
        assert!(matches!(result, Err(DeployError::Io { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn templates_are_rendered_per_target() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let session = session(root.path());

        let written =
            install_templates(&session, &google_state(), RunMode::FirstRun, &templates()).await?;
        let conf = root.path().join("conf-enabled");
        assert_eq!(
            written,
            vec![
                conf.join("zmirror-boilerplate.conf"),
                conf.join("zmirror-google-https.conf"),
                conf.join("zmirror-google-http.conf"),
            ]
        );

        let https = read_to_string(conf.join("zmirror-google-https.conf"))?;
        let cert = root.path().join("live").join("g.example.com").join("cert.pem");
        assert_eq!(
            https,
            format!("ServerName g.example.com\nSSLCertificateFile {}\n", cert.display())
        );
        assert_eq!(
            read_to_string(conf.join("zmirror-google-http.conf"))?,
            "Redirect / https://g.example.com/ # google\n"
        );

        Ok(())
    }

    #[tokio::test]
    async fn existing_templates_depend_on_mode() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let session = session(root.path());
        let conf = root.path().join("conf-enabled");
        create_dir_all(&conf)?;
        write(conf.join("zmirror-google-http.conf"), "operator edit")?;

        let written =
            install_templates(&session, &google_state(), RunMode::FirstRun, &templates()).await?;
        assert_eq!(written.len(), 2);
        assert_eq!(read_to_string(conf.join("zmirror-google-http.conf"))?, "operator edit");

        let written =
            install_templates(&session, &google_state(), RunMode::Resume, &templates()).await?;
        assert_eq!(written.len(), 3);
        assert_ne!(read_to_string(conf.join("zmirror-google-http.conf"))?, "operator edit");

        Ok(())
    }

    #[tokio::test]
    async fn missing_template_fails() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let session = session(root.path());
        let result =
            install_templates(&session, &google_state(), RunMode::FirstRun, &HashMap::new()).await;
        assert!(matches!(result, Err(DeployError::Template(TemplateError::NotFound(_)))));

        Ok(())
    }

    #[test]
    fn renewal_job_is_installed_once() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let job = root.path().join("cron.weekly").join("zmirror-letsencrypt-renew.sh");
        let stop = vec!["service".to_string(), "apache2".into(), "stop".into()];
        let start = vec!["service".to_string(), "apache2".into(), "start".into()];

        assert!(install_renewal_job(&job, "certbot", &stop, &start)?);
        let script = read_to_string(&job)?;
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(
            "certbot renew -n --agree-tos --standalone --pre-hook \"service apache2 stop\""
        ));
        assert_eq!(metadata(&job)?.permissions().mode() & 0o777, 0o755);

        write(&job, "custom")?;
        assert!(!install_renewal_job(&job, "certbot", &stop, &start)?);
        assert_eq!(read_to_string(&job)?, "custom");

        Ok(())
    }

    #[tokio::test]
    async fn upgrade_without_installed_targets_does_nothing() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut session = session(root.path());
        let upgraded = upgrade(&mut session, &Catalog::detect(root.path())).await?;
        assert_eq!(upgraded, 0);
        assert_eq!(session.runner.invocations(), 0);

        Ok(())
    }
}

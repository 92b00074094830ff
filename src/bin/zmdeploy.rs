// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use zmdeploy::{
    config::Settings,
    console::{Interrupt, TerminalConsole},
    installer::{InstallError, Installer},
    path::{default_settings_path, default_state_path},
    report::{HttpSink, Reporter},
    session::Session,
    state::StateStore,
    system::preflight,
    template::HttpTemplates,
};

use anyhow::Result;
use clap::Parser;
use std::{
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One-key installer of zmirror mirrors.
#[derive(Debug, Clone, Parser)]
#[command(about, version)]
struct Cli {
    /// Show debug output.
    #[arg(long)]
    pub debug: bool,

    /// Use certificates you already have instead of obtaining new ones.
    #[arg(long = "i-have-cert")]
    pub i_have_cert: bool,

    /// Only upgrade mirrors that are already installed.
    #[arg(long)]
    pub upgrade_only: bool,

    /// Path to settings file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,
}

impl Cli {
    async fn run(self, interrupt: Interrupt) -> Result<()> {
        let host = preflight(Path::new("/")).map_err(InstallError::from)?;

        let fallback = default_settings_path().ok();
        let settings = Settings::load(self.config.as_deref(), fallback.as_deref())?;

        let state_path = match &settings.paths.state_file {
            Some(path) => path.clone(),
            None => default_state_path()?,
        };
        let store = if self.i_have_cert {
            StateStore::disabled(state_path)
        } else {
            StateStore::new(state_path)
        };

        let mut reporter = if settings.report.enabled {
            Reporter::new(HttpSink::new(&settings.report))
        } else {
            Reporter::disabled()
        };
        reporter.set_os(host.name());

        let templates = HttpTemplates::new(&settings.source.templates);
        let console = TerminalConsole::new(interrupt.clone());
        let session = Session::new(settings, console, reporter, interrupt, self.i_have_cert);
        Installer::new(session, store, templates, self.upgrade_only)
            .run()
            .await?;

        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let interrupt = Interrupt::new();
    let listener = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after current step");
            listener.raise();
        }
    });

    if let Err(error) = cli.run(interrupt).await {
        error!("{error:?}");
        let code = error
            .downcast_ref::<InstallError>()
            .map(InstallError::exit_code)
            .unwrap_or(1);
        exit(code);
    }

    exit(0)
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations of the files zmdeploy itself reads and writes.
//! None of these functions check whether the returned path exists.

use std::path::PathBuf;

/// Name of the install state file.
pub const STATE_FILE_NAME: &str = ".zmdeploy-state.json";

/// Determine default absolute path to the settings file.
///
/// Uses `$XDG_CONFIG_HOME/zmdeploy/settings.toml`.
///
/// # Errors
///
/// - Return [`PathError::NoConfigDir`] if the configuration directory cannot
///   be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("zmdeploy").join("settings.toml"))
        .ok_or(PathError::NoConfigDir)
}

/// Determine default absolute path to the install state file.
///
/// The state file sits right next to the zmdeploy executable, so a rerun of
/// the same binary finds the state of an interrupted install.
///
/// # Errors
///
/// - Return [`PathError::CurrentExe`] if the path of the running executable
///   cannot be determined.
pub fn default_state_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(PathError::CurrentExe)?;
    let dir = exe
        .parent()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(dir.join(STATE_FILE_NAME))
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// No configuration directory for current user.
    #[error("cannot determine absolute path to user's configuration directory")]
    NoConfigDir,

    /// Executable path unknown.
    #[error("cannot determine path of running executable")]
    CurrentExe(#[source] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;

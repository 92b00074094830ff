// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! One-key installer of zmirror reverse proxy mirrors.
//!
//! zmdeploy provisions one or more zmirror mirrors on a Debian-like host:
//! it asks the operator which sites to mirror and under which domains,
//! installs the packages the mirrors need, obtains TLS certificates through
//! an ACME client, deploys one copy of zmirror per mirror behind Apache, and
//! reports the outcome.
//!
//! Every decision is saved to a state file as soon as it is made, so an
//! install cut short by a failed certificate request or an impatient Ctrl-C
//! can be resumed by simply running zmdeploy again.

pub mod catalog;
pub mod certificate;
pub mod config;
pub mod console;
pub mod deploy;
pub mod installer;
pub mod path;
pub mod report;
pub mod runner;
pub mod selection;
pub mod session;
pub mod state;
pub mod system;
pub mod template;

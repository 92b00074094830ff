// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operator interaction.
//!
//! Everything that blocks on the human sitting in front of the installer goes
//! through the [`Console`] trait: yes/no questions, free text, menu choices,
//! and the per-second countdown shown between certificate attempts.
//!
//! [`TerminalConsole`] is the real thing, built on `inquire` for prompts and
//! `indicatif` for countdowns. [`ScriptedConsole`] replays pre-recorded
//! answers, which lets every flow run without a terminal attached.

use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, Select, Text};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, instrument};

/// Interface to the operator.
#[allow(async_fn_in_trait)]
pub trait Console {
    /// Ask a yes/no question.
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool>;

    /// Ask for a line of free text.
    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String>;

    /// Ask the operator to pick one of `options`, returning its index.
    fn select(&mut self, message: &str, options: &[String]) -> Result<usize>;

    /// Wait `seconds` whole seconds while showing progress once per second.
    async fn countdown(&mut self, message: &str, seconds: u64) -> Result<()>;
}

/// Operator interrupt flag.
///
/// Raised by the Ctrl-C listener of the binary. Long running pieces of the
/// installer poll it between steps, since the listener itself never touches
/// install state.
#[derive(Debug, Default, Clone)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Construct new lowered interrupt flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether the operator asked us to stop.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Console backed by the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalConsole {
    interrupt: Interrupt,
}

impl TerminalConsole {
    /// Construct new terminal console that aborts countdowns on `interrupt`.
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }
}

impl Console for TerminalConsole {
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new(message).with_default(default).prompt()?)
    }

    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        let mut prompt = Text::new(message);
        if let Some(default) = default {
            prompt = prompt.with_default(default);
        }

        Ok(prompt.prompt()?)
    }

    fn select(&mut self, message: &str, options: &[String]) -> Result<usize> {
        let choice = Select::new(message, options.to_vec())
            .with_page_size(options.len().max(1))
            .raw_prompt()?;

        Ok(choice.index)
    }

    #[instrument(skip(self, message), level = "debug")]
    async fn countdown(&mut self, message: &str, seconds: u64) -> Result<()> {
        let bar = ProgressBar::new(seconds);
        let style = ProgressStyle::with_template(
            "{msg}  [{bar:30.yellow/blue}]  {pos}/{len}s",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(message.to_string());

        for _ in 0..seconds {
            if self.interrupt.is_raised() {
                bar.abandon();
                return Err(ConsoleError::Interrupted);
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
            bar.inc(1);
        }

        bar.finish_and_clear();
        Ok(())
    }
}

/// Pre-recorded answer for [`ScriptedConsole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Confirm(bool),
    Text(String),
    Select(usize),
}

/// Console that replays a fixed script of answers.
///
/// Every prompt and countdown is recorded, so callers can inspect what the
/// operator would have been asked.
#[derive(Debug, Default, Clone)]
pub struct ScriptedConsole {
    answers: VecDeque<Answer>,
    prompts: Vec<String>,
    menus: Vec<Vec<String>>,
    countdowns: Vec<u64>,
}

impl ScriptedConsole {
    /// Construct new scripted console from answers in the order they are
    /// asked for.
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Prompts shown so far.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    /// Options of every menu shown so far.
    pub fn menus(&self) -> &[Vec<String>] {
        &self.menus
    }

    /// Lengths of every countdown waited through so far.
    pub fn countdowns(&self) -> &[u64] {
        &self.countdowns
    }

    /// Answers that were never asked for.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, message: &str) -> Result<Answer> {
        self.prompts.push(message.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| ConsoleError::Exhausted(message.to_string()))
    }
}

impl Console for ScriptedConsole {
    fn confirm(&mut self, message: &str, _default: bool) -> Result<bool> {
        match self.next(message)? {
            Answer::Confirm(answer) => Ok(answer),
            other => Err(ConsoleError::Mismatch {
                prompt: message.to_string(),
                answer: other,
            }),
        }
    }

    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        match self.next(message)? {
            Answer::Text(answer) if answer.is_empty() => {
                Ok(default.map(ToString::to_string).unwrap_or(answer))
            }
            Answer::Text(answer) => Ok(answer),
            other => Err(ConsoleError::Mismatch {
                prompt: message.to_string(),
                answer: other,
            }),
        }
    }

    fn select(&mut self, message: &str, options: &[String]) -> Result<usize> {
        self.menus.push(options.to_vec());
        match self.next(message)? {
            Answer::Select(index) if index < options.len() => Ok(index),
            other => Err(ConsoleError::Mismatch {
                prompt: message.to_string(),
                answer: other,
            }),
        }
    }

    async fn countdown(&mut self, message: &str, seconds: u64) -> Result<()> {
        debug!("{message} {seconds}s (scripted)");
        self.countdowns.push(seconds);
        Ok(())
    }
}

/// Console error types.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// Operator pressed Ctrl-C or Esc.
    #[error("operation interrupted by operator")]
    Interrupted,

    /// Prompt could not be rendered or read.
    #[error(transparent)]
    Prompt(InquireError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Scripted console ran out of answers.
    #[error("no scripted answer left for prompt {0:?}")]
    Exhausted(String),

    /// Scripted answer does not fit the prompt.
    #[error("scripted answer {answer:?} does not fit prompt {prompt:?}")]
    Mismatch { prompt: String, answer: Answer },
}

impl From<InquireError> for ConsoleError {
    fn from(error: InquireError) -> Self {
        match error {
            InquireError::OperationInterrupted | InquireError::OperationCanceled => {
                ConsoleError::Interrupted
            }
            error => ConsoleError::Prompt(error),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ConsoleError> = std::result::Result<T, E>;

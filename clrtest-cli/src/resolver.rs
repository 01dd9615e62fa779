// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::OutputContext;
use camino::Utf8PathBuf;
use clrtest_runner::runner::{RunnerResolver, RunnerStrategy};
use dialoguer::{
    Input,
    theme::{ColorfulTheme, SimpleTheme},
};
use itertools::Itertools;
use std::io::IsTerminal;
use tracing::{info, warn};

/// Asks for a runner's location on the terminal.
///
/// Never prompts unless both stdin and stderr are terminals, and never in CI.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PromptResolver {
    interactive: bool,
    colorize: bool,
}

impl PromptResolver {
    pub(crate) fn new(output: OutputContext) -> Self {
        let interactive =
            std::io::stdin().is_terminal() && std::io::stderr().is_terminal() && !is_ci::cached();
        Self {
            interactive,
            colorize: output.color.should_colorize(supports_color::Stream::Stderr),
        }
    }
}

impl RunnerResolver for PromptResolver {
    fn resolve(
        &self,
        strategy: &dyn RunnerStrategy,
        searched: &[Utf8PathBuf],
    ) -> Option<Utf8PathBuf> {
        if !self.interactive {
            return None;
        }
        if !searched.is_empty() {
            info!(
                "{} not found under {}",
                strategy.executable_name(),
                searched.iter().join(", ")
            );
        }

        let colorful_theme = ColorfulTheme::default();
        let input = if self.colorize {
            Input::<String>::with_theme(&colorful_theme)
        } else {
            Input::<String>::with_theme(&SimpleTheme)
        };
        let prompt = format!(
            "path to {} for {} tests (leave empty to skip)",
            strategy.executable_name(),
            strategy.test_type(),
        );
        match input.with_prompt(prompt).allow_empty(true).interact_text() {
            Ok(answer) => {
                let answer = answer.trim();
                (!answer.is_empty()).then(|| Utf8PathBuf::from(answer))
            }
            Err(error) => {
                warn!("failed to read {} runner path: {error}", strategy.test_type());
                None
            }
        }
    }
}

// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running selected tests through each framework's console runner.
//!
//! The main structure in this module is [`TestOrchestrator`], which for each framework locates a
//! runner with [`RunnerLocator`], writes the working files described by [`RunArtifacts`], builds
//! a [`RunnerCommand`] and waits for it. Per-framework differences live behind
//! [`RunnerStrategy`].

mod command;
mod exec;
mod locate;
mod orchestrator;
mod run_list;
mod strategy;

#[cfg(unix)]
#[path = "unix.rs"]
mod os;

#[cfg(windows)]
#[path = "windows.rs"]
mod os;

pub use command::*;
pub use exec::{ExecuteOptions, RunnerExit};
pub use locate::*;
pub use orchestrator::*;
pub use run_list::*;
pub use strategy::*;

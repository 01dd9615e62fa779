// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to clrtest's machine-readable output.
//!
//! `clrtest list --message-format json` and `clrtest run --message-format json` print the
//! summaries defined here. The enums shared between discovery and execution ([`TestType`] and
//! [`TestExecutionStatus`]) also live in this crate so that consumers of the JSON output don't
//! need to depend on the runner.

mod exit_codes;
mod test_list;

pub use exit_codes::*;
pub use test_list::*;

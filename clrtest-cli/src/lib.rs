// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `clrtest` command: discover tests in .NET assemblies and run them through each
//! framework's console runner.
//!
//! `clrtest list` prints the tests found in a set of binaries, and `clrtest run` hands the
//! selected tests to the xUnit, NUnit and MSTest runners and reports the correlated results.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod report;
mod resolver;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};

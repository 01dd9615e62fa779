// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for clrtest: discovering xUnit, NUnit and MSTest tests in compiled .NET
//! binaries, running them through each framework's console runner, and joining the results back
//! onto the discovered tests.
//!
//! The basic flow is:
//! 1. [`list::CatalogBuilder`] reads the ECMA-335 metadata of each binary (see [`metadata`]) and
//!    classifies its types and methods into a [`list::TestCatalog`].
//! 2. [`runner::TestOrchestrator`] runs the selected tests, one framework at a time.
//! 3. [`results::read_results`] parses each runner's results artifact, and
//!    [`correlate::correlate`] attaches the results to catalog methods.

pub mod config;
pub mod correlate;
pub mod errors;
pub mod list;
pub mod metadata;
pub mod results;
pub mod runner;
pub mod signal;

// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixture data for clrtest tests: a writer for small .NET assemblies, and a set of sample
//! binaries along with what discovery is expected to find in them.

pub mod assembly;
pub mod models;
pub mod sample_tests;

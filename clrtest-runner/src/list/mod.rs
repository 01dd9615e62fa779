// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery of test classes and methods in compiled binaries.
//!
//! The main data structures in this module are:
//! * [`TestCatalog`] for discovered test classes and their methods
//! * [`DiscoveryReport`] for a catalog along with the units that were skipped to build it
//! * [`FrameworkConvention`] for the marker attribute rules of each framework

mod classify;
mod output_format;
mod test_list;

pub use classify::*;
pub use output_format::*;
pub use test_list::*;

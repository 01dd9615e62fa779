// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for clrtest.
//!
//! Configuration is layered: the embedded default config, then the workspace's
//! `.config/clrtest.toml` (or an explicitly passed file), then `CLRTEST_`-prefixed environment
//! variables. The last known location of each framework's runner is kept separately, in the
//! user's config directory, by [`RunnerPathStore`].

mod imp;
mod runner_paths;
mod scan_threads;

pub use imp::*;
pub use runner_paths::*;
pub use scan_threads::*;

// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod discovery;
mod fixtures;
#[cfg(unix)]
mod run;

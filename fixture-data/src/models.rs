// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data models for fixture information.

use clrtest_metadata::TestType;

#[derive(Copy, Clone, Debug)]
pub struct ExpectedClass {
    /// The file name of the binary the class is defined in.
    pub binary_name: &'static str,
    pub full_name: &'static str,
    pub test_type: TestType,
    pub methods: &'static [ExpectedMethod],
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ExpectedMethod {
    pub name: &'static str,
    /// Sorted, as discovery reports them.
    pub traits: &'static [&'static str],
}

impl ExpectedMethod {
    pub const fn new(name: &'static str, traits: &'static [&'static str]) -> Self {
        Self { name, traits }
    }
}

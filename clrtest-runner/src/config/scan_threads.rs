// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::fmt;

/// Type for the `discovery.scan-threads` config key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanThreads {
    /// Scan a specified number of binaries at once.
    Count(usize),

    /// Scan as many binaries at once as there are logical CPUs.
    NumCpus,
}

impl ScanThreads {
    /// Gets the actual number of scan threads computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(threads) => threads,
            Self::NumCpus => std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

impl fmt::Display for ScanThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for ScanThreads {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = ScanThreads;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a positive integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    return Ok(ScanThreads::NumCpus);
                }
                // Environment variables always arrive as strings.
                match v.parse::<i64>() {
                    Ok(n) => self.visit_i64(n),
                    Err(_) => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    )),
                }
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match usize::try_from(v) {
                    Ok(n) if n > 0 => Ok(ScanThreads::Count(n)),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match usize::try_from(v) {
                    Ok(n) if n > 0 => Ok(ScanThreads::Count(n)),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    struct Wrapper {
        scan_threads: ScanThreads,
    }

    #[test_case("scan-threads = 4", Some(ScanThreads::Count(4)) ; "positive")]
    #[test_case("scan-threads = \"num-cpus\"", Some(ScanThreads::NumCpus) ; "num cpus")]
    #[test_case("scan-threads = \"6\"", Some(ScanThreads::Count(6)) ; "numeric string")]
    #[test_case("scan-threads = 0", None ; "zero")]
    #[test_case("scan-threads = -2", None ; "negative")]
    #[test_case("scan-threads = \"lots\"", None ; "other string")]
    fn parse_scan_threads(input: &str, expected: Option<ScanThreads>) {
        let parsed = toml::from_str::<Wrapper>(input).ok().map(|w| w.scan_threads);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn compute() {
        assert_eq!(ScanThreads::Count(3).compute(), 3);
        assert!(ScanThreads::NumCpus.compute() >= 1);
    }
}

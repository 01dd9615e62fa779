// Copyright (c) The clrtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by clrtest.

use camino::Utf8PathBuf;
use clrtest_metadata::TestType;
use config::ConfigError;
use itertools::Itertools;
use std::{error, fmt, io};
use thiserror::Error;

/// Displays an error along with every error in its source chain, separated by `: `.
///
/// Errors in this crate never repeat their source's message in their own, so the chain reads as
/// a single sentence from the most general failure to the most specific one.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain` wrapping `error`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse clrtest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing the config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The config sources couldn't be read or merged.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// The merged config couldn't be deserialized.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The coverage command template is invalid.
    #[error("invalid value for coverage.template")]
    InvalidCommandTemplate(#[source] CommandTemplateError),
}

/// A structural problem with a binary's PE container or ECMA-335 metadata.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MetadataFormatError {
    /// The file isn't a PE image.
    #[error("not a portable executable")]
    NotPortableExecutable,

    /// The PE image has no CLI header, so it isn't a managed assembly.
    #[error("no CLI header (not a managed assembly)")]
    NoCliHeader,

    /// A relative virtual address didn't fall within any section.
    #[error("RVA {rva:#x} isn't mapped by any section")]
    UnmappedRva {
        /// The unmapped address.
        rva: u32,
    },

    /// The data ended before a structure was complete.
    #[error("truncated {what} at offset {offset:#x}")]
    Truncated {
        /// What was being read.
        what: &'static str,
        /// Where reading started.
        offset: usize,
    },

    /// A compressed integer had an invalid leading byte.
    #[error("invalid compressed integer at offset {offset:#x}")]
    InvalidCompressedInteger {
        /// Where the integer started.
        offset: usize,
    },

    /// The metadata root didn't start with `BSJB`.
    #[error("bad metadata root signature")]
    BadMetadataSignature,

    /// A required metadata stream wasn't present.
    #[error("missing metadata stream `{name}`")]
    MissingStream {
        /// The stream's name.
        name: &'static str,
    },

    /// The tables stream is the uncompressed `#-` form.
    #[error("unsupported metadata: uncompressed tables stream")]
    UncompressedTables,

    /// An indirection (`*Ptr`) table is present.
    #[error("unsupported metadata: indirection table {table} is present")]
    IndirectionTable {
        /// The table's name.
        table: &'static str,
    },

    /// A heap or table index was out of range.
    #[error("{what} index {index} is out of range")]
    InvalidIndex {
        /// What the index refers to.
        what: &'static str,
        /// The index.
        index: u32,
    },

    /// A `#Strings` heap entry wasn't valid null-terminated UTF-8.
    #[error("invalid string at #Strings index {index}")]
    InvalidString {
        /// The heap index.
        index: u32,
    },

    /// A signature blob couldn't be decoded.
    #[error("invalid signature: {what}")]
    InvalidSignature {
        /// What was wrong.
        what: &'static str,
    },

    /// A custom attribute value blob couldn't be decoded.
    #[error("invalid custom attribute value: {what}")]
    InvalidAttributeBlob {
        /// What was wrong.
        what: &'static str,
    },
}

/// An error that occurred while loading an assembly's metadata.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MetadataReadError {
    /// The binary couldn't be read from disk.
    #[error("failed to read `{path}`")]
    Io {
        /// The binary's path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The binary's metadata is malformed or unsupported.
    #[error("failed to read metadata from `{path}`")]
    Format {
        /// The binary's path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: MetadataFormatError,
    },
}

/// An error that occurred while decoding a single type definition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to decode TypeDef row {row}{}", display_type_name(.type_name))]
pub struct TypeReadError {
    row: u32,
    type_name: Option<String>,
    #[source]
    error: MetadataFormatError,
}

fn display_type_name(type_name: &Option<String>) -> String {
    match type_name {
        Some(name) => format!(" (`{name}`)"),
        None => String::new(),
    }
}

impl TypeReadError {
    pub(crate) fn new(row: u32, type_name: Option<String>, error: MetadataFormatError) -> Self {
        Self {
            row,
            type_name,
            error,
        }
    }

    /// Returns the row in the TypeDef table.
    pub fn row(&self) -> u32 {
        self.row
    }

    /// Returns the type's full name, if it could be decoded.
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }
}

/// An error that occurred while decoding a single method definition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to decode MethodDef row {row}")]
pub struct MethodReadError {
    row: u32,
    #[source]
    error: MetadataFormatError,
}

impl MethodReadError {
    pub(crate) fn new(row: u32, error: MetadataFormatError) -> Self {
        Self { row, error }
    }

    /// Returns the row in the MethodDef table.
    pub fn row(&self) -> u32 {
        self.row
    }
}

/// An error that occurred while building the test catalog.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CreateTestListError {
    /// The tokio runtime used for scanning couldn't be created.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),
}

/// An error that occurred while writing the test catalog.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteTestListError {
    /// An I/O error occurred.
    #[error("error writing to output")]
    Io(#[source] io::Error),

    /// An error occurred while serializing JSON.
    #[error("error serializing to JSON")]
    Json(#[source] serde_json::Error),
}

/// A structural problem with a results document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResultsXmlError {
    /// The XML itself is malformed.
    #[error("malformed XML")]
    Xml(#[from] quick_xml::Error),

    /// The document has no root element.
    #[error("document has no root element")]
    NoRoot,

    /// The root element isn't the one this format uses.
    #[error("expected root element `{expected}`, found `{found}`")]
    UnexpectedRoot {
        /// The expected root element.
        expected: &'static str,
        /// The root element that was found.
        found: String,
    },

    /// An end tag didn't match any open element.
    #[error("unbalanced end tag")]
    UnbalancedEnd,

    /// The document ended with elements still open.
    #[error("unexpected end of document")]
    UnexpectedEof,
}

/// An error that occurred while reading a results artifact.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResultsParseError {
    /// The artifact couldn't be read.
    #[error("failed to read results file `{path}`")]
    Read {
        /// The artifact's path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The artifact couldn't be parsed.
    #[error("failed to parse results file `{path}`")]
    Parse {
        /// The artifact's path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: ResultsXmlError,
    },
}

impl ResultsParseError {
    pub(crate) fn read(path: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            error,
        }
    }

    pub(crate) fn parse(path: impl Into<Utf8PathBuf>, error: ResultsXmlError) -> Self {
        Self::Parse {
            path: path.into(),
            error,
        }
    }
}

/// An error returned when the signal handler couldn't be set up.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[source] io::Error);

impl SignalHandlerSetupError {
    pub(crate) fn new(error: io::Error) -> Self {
        Self(error)
    }
}

/// No runner executable could be found for a framework.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "{test_type} runner `{executable}` not found (searched: {})",
    display_searched(.searched)
)]
pub struct RunnerNotFound {
    test_type: TestType,
    executable: &'static str,
    searched: Vec<Utf8PathBuf>,
}

fn display_searched(searched: &[Utf8PathBuf]) -> String {
    if searched.is_empty() {
        "no search roots".to_owned()
    } else {
        searched.iter().join(", ")
    }
}

impl RunnerNotFound {
    pub(crate) fn new(
        test_type: TestType,
        executable: &'static str,
        searched: Vec<Utf8PathBuf>,
    ) -> Self {
        Self {
            test_type,
            executable,
            searched,
        }
    }

    /// Returns the framework whose runner wasn't found.
    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    /// Returns the executable name that was searched for.
    pub fn executable(&self) -> &'static str {
        self.executable
    }

    /// Returns the search roots that were inspected.
    pub fn searched(&self) -> &[Utf8PathBuf] {
        &self.searched
    }
}

/// An error that occurred while reading or writing the persisted runner paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerPathStoreError {
    /// The user's config directory couldn't be determined.
    #[error("could not determine the user config directory")]
    NoConfigDir,

    /// The user's config directory isn't valid UTF-8.
    #[error("user config directory is not valid UTF-8")]
    NonUtf8Path(#[source] camino::FromPathBufError),

    /// The store couldn't be read.
    #[error("failed to read runner paths from `{path}`")]
    Read {
        /// The store's path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The store couldn't be parsed.
    #[error("failed to parse runner paths at `{path}`")]
    Parse {
        /// The store's path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },

    /// The store couldn't be serialized.
    #[error("failed to serialize runner paths")]
    Serialize(#[source] toml::ser::Error),

    /// The store's directory couldn't be created.
    #[error("failed to create directory `{path}`")]
    CreateDir {
        /// The directory.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The store couldn't be written.
    #[error("failed to write runner paths to `{path}`")]
    Write {
        /// The store's path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: atomicwrites::Error<io::Error>,
    },
}

/// An error that occurred while preparing the working artifacts for a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunArtifactsError {
    /// The store directory couldn't be created.
    #[error("failed to create store directory `{path}`")]
    CreateDir {
        /// The directory.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that occurred while writing a run-list artifact.
#[derive(Debug, Error)]
#[error("failed to write run list `{path}`")]
pub struct RunListWriteError {
    path: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl RunListWriteError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// Returns the run list's path.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// An error in a command template or launcher.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandTemplateError {
    /// The template refers to a placeholder that doesn't exist.
    #[error(
        "unknown placeholder `{{{placeholder}}}` \
         (known placeholders: {{runner}}, {{args}}, {{output}})"
    )]
    UnknownPlaceholder {
        /// The placeholder's name.
        placeholder: String,
    },

    /// A `{` isn't closed.
    #[error("unclosed `{{` at byte {offset}")]
    Unclosed {
        /// Where the placeholder started.
        offset: usize,
    },

    /// The template doesn't mention the runner.
    #[error("template must contain `{{runner}}`")]
    MissingRunner,

    /// The rendered command line couldn't be split into arguments.
    #[error("failed to split command line `{command_line}`")]
    Split {
        /// The command line.
        command_line: String,
        /// The underlying error.
        #[source]
        error: shell_words::ParseError,
    },

    /// The launcher prefix is empty.
    #[error("launcher `{launcher}` has no program")]
    EmptyLauncher {
        /// The launcher string.
        launcher: String,
    },
}

/// An error that occurred while launching or waiting on a runner process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerExecuteError {
    /// The process couldn't be started.
    #[error("failed to start `{program}`")]
    Spawn {
        /// The program.
        program: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Waiting on the process failed.
    #[error("failed to wait on `{program}`")]
    Wait {
        /// The program.
        program: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The process couldn't be killed after a timeout or interrupt.
    #[error("failed to kill `{program}`")]
    Kill {
        /// The program.
        program: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },
}

/// An error that stopped a `run` before every framework was attempted.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestrateError {
    /// The tokio runtime couldn't be created.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),

    /// The signal handler couldn't be set up.
    #[error(transparent)]
    SignalHandlerSetup(#[from] SignalHandlerSetupError),

    /// The working artifacts couldn't be prepared.
    #[error("error preparing {test_type} run")]
    Artifacts {
        /// The framework.
        test_type: TestType,
        /// The underlying error.
        #[source]
        error: RunArtifactsError,
    },

    /// The run list couldn't be written.
    #[error("error preparing {test_type} run")]
    RunList {
        /// The framework.
        test_type: TestType,
        /// The underlying error.
        #[source]
        error: RunListWriteError,
    },

    /// The command line couldn't be built.
    #[error("error building {test_type} command line")]
    Command {
        /// The framework.
        test_type: TestType,
        /// The underlying error.
        #[source]
        error: CommandTemplateError,
    },

    /// The runner process failed to start or couldn't be waited on.
    #[error("error running {test_type} runner")]
    Execute {
        /// The framework.
        test_type: TestType,
        /// The underlying error.
        #[source]
        error: RunnerExecuteError,
    },
}
